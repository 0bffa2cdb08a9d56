//! Environment-driven configuration for the narrative provider.

use super::error::NarrativeError;

pub const ENV_PROVIDER: &str = "REPORTCARDD_AI_PROVIDER";
pub const ENV_API_KEY: &str = "REPORTCARDD_AI_API_KEY";
pub const ENV_MODEL: &str = "REPORTCARDD_AI_MODEL";
pub const ENV_ENDPOINT: &str = "REPORTCARDD_AI_ENDPOINT";
pub const ENV_TIMEOUT_SECS: &str = "REPORTCARDD_AI_TIMEOUT_SECS";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Http,
    Mock,
    Disabled,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Some(Self::Http),
            "mock" => Some(Self::Mock),
            "none" | "off" | "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeConfig {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl NarrativeConfig {
    pub fn from_env() -> Result<Self, NarrativeError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NarrativeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get(ENV_PROVIDER) {
            Some(raw) => ProviderKind::parse(&raw).ok_or_else(|| {
                NarrativeError::Config(format!("unknown {}: {}", ENV_PROVIDER, raw))
            })?,
            None => ProviderKind::Http,
        };
        let timeout_secs = match get(ENV_TIMEOUT_SECS) {
            Some(raw) => raw.parse::<u64>().ok().filter(|v| *v > 0).ok_or_else(|| {
                NarrativeError::Config(format!(
                    "{} must be a positive integer, got {}",
                    ENV_TIMEOUT_SECS, raw
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            provider,
            api_key: get(ENV_API_KEY),
            model: get(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: get(ENV_ENDPOINT)
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout_secs,
        })
    }
}
