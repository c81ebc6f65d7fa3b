use std::env;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Model-provider settings, resolved from the environment. Absence of the
/// key degrades only outbound model calls; validation and execution operate
/// purely on local text and data.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: String,
    pub model: String,
    /// Optional base URL override (relay or compatible endpoint).
    pub base: Option<String>,
    /// Per-request timeout; expiry surfaces as an upstream timeout failure.
    pub timeout: Duration,
}

impl ModelSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingApiKey)?;
        let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base = env::var("OPENAI_BASE").ok();
        let timeout = match env::var("ALDER_MODEL_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid {
                    name: "ALDER_MODEL_TIMEOUT_SECS",
                    value: raw.clone(),
                }
            })?),
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        Ok(Self {
            api_key,
            model,
            base,
            timeout,
        })
    }
}
