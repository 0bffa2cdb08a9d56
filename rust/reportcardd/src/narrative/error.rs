//! Narrative service error types.

use thiserror::Error;

/// Errors raised while drafting feedback or insight text.
#[derive(Debug, Error)]
pub enum NarrativeError {
    /// The service handle was built without a working provider.
    #[error("narrative service unavailable: {0}")]
    Unavailable(String),

    /// Environment configuration could not be parsed.
    #[error("invalid narrative configuration: {0}")]
    Config(String),

    /// The request failed schema validation before reaching the provider.
    #[error("invalid narrative request: {0}")]
    InvalidRequest(String),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered but produced no usable text.
    #[error("provider returned no text")]
    EmptyResponse,

    /// The provider response did not match the expected shape.
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl NarrativeError {
    /// Wire error code for the IPC envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) | Self::Config(_) => "ai_unavailable",
            Self::InvalidRequest(_) => "ai_invalid_request",
            Self::Network(_) | Self::Api { .. } | Self::EmptyResponse | Self::Decode(_) => {
                "ai_failed"
            }
        }
    }
}
