//! Placeholder substitution for stored prompt templates.
//!
//! Two token syntaxes are recognised:
//! - `$(name)`: whitespace inside the parens is ignored and lookup is case-insensitive.
//! - `{name}`: `name` must be an identifier; lookup is exact. Braces around anything
//!   else (JSON samples embedded in prompts) are left alone.
//!
//! Substitution is a single pass over the template: values are never re-scanned.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Values available to a template, keyed by placeholder name. Last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionContext {
    values: BTreeMap<String, String>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Case-insensitive lookup used by `$(name)` tokens. An exact match is preferred.
    fn get_folded(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        let folded = fold(key);
        self.values
            .iter()
            .rev()
            .find(|(k, _)| fold(k) == folded)
            .map(|(_, v)| v.as_str())
    }
}

/// Case folding shared by `$(name)` lookup and `placeholders`.
fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SubstitutionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

/// What to do with a placeholder the context has no value for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPlaceholder {
    /// Replace the token with an empty string.
    #[default]
    Empty,
    /// Leave the token text in place.
    KeepLiteral,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\(\s*([^()]*?)\s*\)|\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .expect("placeholder pattern is valid")
    })
}

/// Fills every recognised placeholder in `template` from `context`.
pub fn populate(template: &str, context: &SubstitutionContext, missing: MissingPlaceholder) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            let resolved = if let Some(name) = caps.get(1) {
                context.get_folded(name.as_str())
            } else {
                caps.get(2).and_then(|name| context.get(name.as_str()))
            };
            match (resolved, missing) {
                (Some(value), _) => value.to_string(),
                (None, MissingPlaceholder::Empty) => String::new(),
                (None, MissingPlaceholder::KeepLiteral) => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Distinct placeholder names referenced by `template`, in order of first use.
/// `$(...)` names are lowercased since their lookup ignores case.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(template) {
        let name = match (caps.get(1), caps.get(2)) {
            (Some(n), _) => fold(n.as_str()),
            (None, Some(n)) => n.as_str().to_string(),
            (None, None) => continue,
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Placeholders in `template` that `context` cannot resolve.
pub fn unresolved(template: &str, context: &SubstitutionContext) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|name| context.get_folded(name).is_none())
        .collect()
}
