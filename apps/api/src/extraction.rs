//! Tolerant JSON extraction from free-form LLM output.
//!
//! Models are told to answer with JSON only, but replies still arrive wrapped in
//! code fences, prefixed with "Sure!", followed by notes, or carrying trailing
//! commas and comments. `extract_json` recovers the first JSON object or array
//! from such text; `interpret` turns the outcome into a tagged result so callers
//! must handle the plain-text path explicitly.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const FENCE: &str = "```";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("AI response is empty")]
    Empty,

    #[error("AI response does not appear to contain JSON")]
    NoJson,

    #[error("malformed or incomplete JSON structure")]
    Unbalanced,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Outcome of interpreting raw model text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A JSON payload was recovered.
    Parsed(Value),
    /// No usable JSON; the trimmed raw text for plain display.
    Fallback(String),
}

impl Extraction {
    /// Deserializes the parsed value into `T`. `Err` carries the text to show
    /// instead: the raw reply on fallback, or the JSON text when its shape does
    /// not match `T`.
    pub fn parse_as<T: DeserializeOwned>(self) -> Result<T, String> {
        match self {
            Extraction::Parsed(value) => {
                let text = value.to_string();
                serde_json::from_value(value).map_err(|e| {
                    warn!("Extracted JSON has unexpected shape ({e}); using plain text");
                    text
                })
            }
            Extraction::Fallback(text) => Err(text),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Extraction::Fallback(_))
    }
}

/// Recovers the first JSON object or array embedded in `raw`.
pub fn extract_json(raw: &str) -> Result<Value, ExtractionError> {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw).trim();

    let payload = match fenced_interior(text) {
        Some(inner) if inner.contains(['{', '[']) => scan_payload(inner)?,
        _ => scan_payload(text)?,
    };

    let cleaned = strip_trailing_commas(&payload);
    Ok(serde_json::from_str(&cleaned)?)
}

/// Interprets raw model text: parsed JSON when possible, otherwise the text itself.
pub fn interpret(raw: &str) -> Result<Extraction, ExtractionError> {
    let trimmed = raw.strip_prefix('\u{feff}').unwrap_or(raw).trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }
    match extract_json(trimmed) {
        Ok(value) => Ok(Extraction::Parsed(value)),
        Err(reason) => {
            warn!("Falling back to plain text: {reason}");
            Ok(Extraction::Fallback(trimmed.to_string()))
        }
    }
}

/// Text between the first pair of triple-backtick fences. The remainder of the
/// opening fence line (a language tag) is skipped; an unterminated fence runs to
/// the end of the text.
fn fenced_interior(text: &str) -> Option<&str> {
    let open = text.find(FENCE)?;
    let after_fence = &text[open + FENCE.len()..];
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => after_fence,
    };
    let inner = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    Some(inner.trim())
}

/// Copies the balanced JSON payload starting at the first `{` or `[`, dropping
/// comments outside string literals.
fn scan_payload(text: &str) -> Result<String, ExtractionError> {
    let start = text.find(['{', '[']).ok_or(ExtractionError::NoJson)?;

    let mut out = String::with_capacity(text.len() - start);
    let mut chars = text[start..].chars().peekable();
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        closed = true;
                        break;
                    }
                    prev = skipped;
                }
                if !closed {
                    return Err(ExtractionError::Unbalanced);
                }
                out.push(' ');
            }
            '{' | '[' => {
                depth += 1;
                out.push(c);
            }
            '}' | ']' => {
                // Mismatched pairs are not tracked; serde_json rejects them later.
                depth = depth.saturating_sub(1);
                out.push(c);
                if depth == 0 {
                    return Ok(out);
                }
            }
            _ => out.push(c),
        }
    }

    Err(ExtractionError::Unbalanced)
}

/// Removes commas that directly precede a closing `}` or `]`.
fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().copied().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
