// Shared prompt fragments.
// Feature templates live in the prompt store; these are appended by the services
// to the stored system prompt so every structured call asks for the same format.

/// System prompt fragment that asks for JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps avatar replies short enough to read side by side in the conversation view.
pub const CONVERSATIONAL_SYSTEM: &str = "Respond in plain conversational prose. \
    Stay in character. Keep the reply under 150 words. \
    Do NOT respond on behalf of any other participant.";

/// Joins a stored system prompt with a shared fragment.
pub fn with_fragment(system: &str, fragment: &str) -> String {
    let system = system.trim();
    if system.is_empty() {
        fragment.to_string()
    } else {
        format!("{system}\n\n{fragment}")
    }
}
