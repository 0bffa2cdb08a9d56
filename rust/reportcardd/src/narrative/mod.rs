//! Generative feedback and insight text.
//!
//! The provider is built once at startup. If that fails the service keeps an
//! explicit `Unavailable` state and every call site checks it before use.

pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod types;

pub use config::{NarrativeConfig, ProviderKind};
pub use error::NarrativeError;
pub use types::{
    FeedbackRequest, InsightRequest, InsightScope, NarrativeResponse, SubjectMark, TopStudent,
};

pub trait NarrativeProvider {
    fn name(&self) -> &str;
    fn feedback(&self, request: &FeedbackRequest) -> Result<NarrativeResponse, NarrativeError>;
    fn insights(&self, request: &InsightRequest) -> Result<NarrativeResponse, NarrativeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrativeStatus {
    Available { provider: String },
    Unavailable { reason: String },
}

pub struct NarrativeService {
    provider: Result<Box<dyn NarrativeProvider>, String>,
}

impl NarrativeService {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            provider: Err(reason.into()),
        }
    }

    pub fn with_provider(provider: Box<dyn NarrativeProvider>) -> Self {
        Self {
            provider: Ok(provider),
        }
    }

    /// Fallible factory. Never fails outright; a bad config or client error
    /// becomes the `Unavailable` reason.
    pub fn from_config(cfg: Result<NarrativeConfig, NarrativeError>) -> Self {
        let cfg = match cfg {
            Ok(c) => c,
            Err(e) => return Self::unavailable(e.to_string()),
        };
        match cfg.provider {
            ProviderKind::Disabled => Self::unavailable("narrative provider disabled"),
            ProviderKind::Mock => Self::with_provider(Box::new(mock::MockProvider)),
            ProviderKind::Http => match http::HttpProvider::new(&cfg) {
                Ok(p) => Self::with_provider(Box::new(p)),
                Err(e) => Self::unavailable(e.to_string()),
            },
        }
    }

    pub fn status(&self) -> NarrativeStatus {
        match &self.provider {
            Ok(p) => NarrativeStatus::Available {
                provider: p.name().to_string(),
            },
            Err(reason) => NarrativeStatus::Unavailable {
                reason: reason.clone(),
            },
        }
    }

    pub fn status_json(&self) -> serde_json::Value {
        match self.status() {
            NarrativeStatus::Available { provider } => serde_json::json!({
                "available": true,
                "provider": provider,
            }),
            NarrativeStatus::Unavailable { reason } => serde_json::json!({
                "available": false,
                "reason": reason,
            }),
        }
    }

    fn provider(&self) -> Result<&dyn NarrativeProvider, NarrativeError> {
        match &self.provider {
            Ok(p) => Ok(p.as_ref()),
            Err(reason) => Err(NarrativeError::Unavailable(reason.clone())),
        }
    }

    pub fn feedback(&self, request: &FeedbackRequest) -> Result<NarrativeResponse, NarrativeError> {
        let provider = self.provider()?;
        request.validate()?;
        provider.feedback(request)?.validate()
    }

    pub fn insights(&self, request: &InsightRequest) -> Result<NarrativeResponse, NarrativeError> {
        let provider = self.provider()?;
        request.validate()?;
        provider.insights(request)?.validate()
    }
}
