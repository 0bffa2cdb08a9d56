//! Hosted generative-language provider (`models/{model}:generateContent`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::config::NarrativeConfig;
use super::error::NarrativeError;
use super::types::{FeedbackRequest, InsightRequest, NarrativeResponse};
use super::NarrativeProvider;

const FEEDBACK_INSTRUCTION: &str = "Write a short, encouraging report-card comment (3-4 sentences) for the student described by this JSON. Refer only to the marks given. Plain text only.";
const INSIGHT_INSTRUCTION: &str = "Summarise the academic performance described by this JSON in one paragraph for school leadership: strengths, weak subjects, and one recommendation. Plain text only.";

pub struct HttpProvider {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl HttpProvider {
    pub fn new(cfg: &NarrativeConfig) -> Result<Self, NarrativeError> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            NarrativeError::Config(format!("{} is not set", super::config::ENV_API_KEY))
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| NarrativeError::Network(e.to_string()))?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
            client,
        })
    }

    #[instrument(skip(self, payload), fields(model = %self.model))]
    fn generate(&self, instruction: &str, payload: &impl Serialize) -> Result<NarrativeResponse, NarrativeError> {
        let data = serde_json::to_string_pretty(payload)
            .map_err(|e| NarrativeError::InvalidRequest(e.to_string()))?;
        let body = GenerateBody {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: format!("{}\n\n{}", instruction, data),
                }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.endpoint, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .map_err(|e| NarrativeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(NarrativeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| NarrativeError::Decode(e.to_string()))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        NarrativeResponse { text }.validate()
    }
}

#[derive(Serialize)]
struct GenerateBody {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl NarrativeProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn feedback(&self, request: &FeedbackRequest) -> Result<NarrativeResponse, NarrativeError> {
        self.generate(FEEDBACK_INSTRUCTION, request)
    }

    fn insights(&self, request: &InsightRequest) -> Result<NarrativeResponse, NarrativeError> {
        self.generate(INSIGHT_INSTRUCTION, request)
    }
}
