use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub llm_timeout: Duration,
    pub llm_max_attempts: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: optional_env("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: optional_env("OPENAI_MODEL", "gpt-4o-mini"),
            llm_timeout: Duration::from_secs(positive(
                "LLM_TIMEOUT_SECS",
                &optional_env("LLM_TIMEOUT_SECS", "60"),
            )?),
            llm_max_attempts: positive(
                "LLM_MAX_ATTEMPTS",
                &optional_env("LLM_MAX_ATTEMPTS", "3"),
            )?,
            port: optional_env("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parses a strictly positive integer setting; zero is rejected.
fn positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr + PartialEq + Default,
    T::Err: Display,
{
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))?;
    if value == T::default() {
        bail!("{key} must be a positive integer, got '{raw}'");
    }
    Ok(value)
}
