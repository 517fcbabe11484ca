//! Regulatory summary for a location, generated by an external language
//! model and returned as the model's JSON object.

use crate::config::RegulationsConfig;
use crate::types::Coordinate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RegulationsError {
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("Language model API key not set (env var '{0}')")]
    MissingApiKey(String),
    #[error("Language model server busy: HTTP {0}")]
    ServerBusy(reqwest::StatusCode),
    #[error("Language model returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed regulations response: {0}")]
    Malformed(String),
}

impl RegulationsError {
    fn is_retryable(&self) -> bool {
        match self {
            RegulationsError::ServerBusy(_) => true,
            RegulationsError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Text completion from an external language model.
#[async_trait]
pub trait RegulationsProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, RegulationsError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiClient {
    pub fn new(config: &RegulationsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no language model API key; regulations lookups will fail");
        }
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn candidate_text(response: GenerateResponse) -> Result<String, RegulationsError> {
    let content = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .ok_or_else(|| RegulationsError::Malformed("no candidates in response".to_string()))?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        return Err(RegulationsError::Malformed("candidate has no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl RegulationsProvider for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, RegulationsError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RegulationsError::MissingApiKey(self.api_key_env.clone()))?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        tracing::debug!(model = %self.model, "requesting regulations completion");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}]
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RegulationsError::ServerBusy(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegulationsError::Status { status, body });
        }

        candidate_text(response.json().await?)
    }
}

fn build_prompt(coordinate: Coordinate) -> String {
    format!(
        "Summarise the rules for installing rooftop solar panels at latitude {lat}, longitude {lon}.\n\
         Reply with one JSON object and nothing else, with these keys:\n\
         \"location\" (city or area), \"summary\" (one sentence),\n\
         \"approvals\" (list of {{\"approval_name\", \"required\", \"explanation\"}}; always include \
         Planning Approval, Grid Connection Approval and Special Permits),\n\
         \"restrictions\" (short paragraph), \"instructions\" (short paragraph),\n\
         \"additional_costs\" (list of {{\"cost_name\", \"price\", \"currency\", \"description\"}}, \
         regulatory costs only),\n\
         \"links\" (list of {{\"name\", \"link\"}}, including \"Official Regulation Page\" and \
         \"Guidelines PDF\"),\n\
         \"ai_reasoning\" (optional short paragraph).",
        lat = coordinate.lat,
        lon = coordinate.lon,
    )
}

/// Removes a surrounding Markdown code fence, with or without a `json` tag.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_regulations(text: &str) -> Result<Map<String, Value>, RegulationsError> {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(RegulationsError::Malformed("expected a JSON object".to_string())),
        Err(e) => Err(RegulationsError::Malformed(e.to_string())),
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RegulationsRequest {
    pub lat: f64,
    pub lon: f64,
}

/// The model's object with `success` added, or `success: false` and an
/// `error` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulationsReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RegulationsReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            details: Map::new(),
        }
    }
}

pub struct RegulationsFinder {
    provider: Arc<dyn RegulationsProvider>,
    attempts: u32,
    retry_delay: Duration,
}

impl RegulationsFinder {
    pub fn new(provider: Arc<dyn RegulationsProvider>, config: &RegulationsConfig) -> Self {
        Self {
            provider,
            attempts: config.attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Never fails: errors are reported through `success` and `error`.
    pub async fn find(&self, request: RegulationsRequest) -> RegulationsReport {
        tracing::info!(lat = request.lat, lon = request.lon, "fetching regulations");
        match self.try_find(request).await {
            Ok(mut details) => {
                details.remove("success");
                details.remove("error");
                RegulationsReport {
                    success: true,
                    error: None,
                    details,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "regulations lookup failed");
                RegulationsReport::failed(e.to_string())
            }
        }
    }

    async fn try_find(
        &self,
        request: RegulationsRequest,
    ) -> Result<Map<String, Value>, RegulationsError> {
        let coordinate = Coordinate::new(request.lat, request.lon);
        if coordinate.validate().is_err() {
            return Err(RegulationsError::InvalidCoordinate {
                lat: request.lat,
                lon: request.lon,
            });
        }

        let prompt = build_prompt(coordinate);
        let text = self.complete_with_retry(&prompt).await?;
        parse_regulations(&text)
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, RegulationsError> {
        let mut attempt = 1;
        loop {
            match self.provider.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(
                        attempt,
                        max = self.attempts,
                        delay_secs = self.retry_delay.as_secs(),
                        error = %e,
                        "retrying regulations request"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
