//! Text generation through the hosted Gemini models.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generator request failed: {0}")]
    Transport(String),
    #[error("generator returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed generator response: {0}")]
    Malformed(String),
    #[error("generator returned no text")]
    Empty,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Clone)]
pub struct GeminiGenerator {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GenerateError::Transport(err.to_string()))?;
        Ok(Self {
            endpoint: config.endpoint(),
            api_key: config.api_key,
            http,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        debug!(endpoint = %self.endpoint, prompt_len = prompt.len(), "generating text");
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerateError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GenerateError::Transport(err.to_string()))?;
        let result = parse_generation(status, &bytes);
        if let Err(err) = &result {
            warn!(status, error = %err, "text generation failed");
        }
        result
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Text of the first candidate, all parts concatenated.
pub fn parse_generation(status: u16, body: &[u8]) -> Result<String, GenerateError> {
    let parsed = serde_json::from_slice::<GenerateResponse>(body);
    if !(200..300).contains(&status) {
        let message = parsed
            .ok()
            .and_then(|parsed| parsed.error)
            .map(|error| error.message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        return Err(GenerateError::Status { status, message });
    }
    let parsed = parsed.map_err(|err| GenerateError::Malformed(err.to_string()))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerateError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_names_model() {
        let config = GeminiConfig::new("key");
        assert_eq!(
            config.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn joins_parts_of_first_candidate() {
        let body = br#"{"candidates":[{"content":{"parts":[{"text":"Energy "},{"text":"organelle."}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#;
        assert_eq!(parse_generation(200, body).unwrap(), "Energy organelle.");
    }

    #[test]
    fn empty_candidates_are_an_error() {
        assert!(matches!(
            parse_generation(200, br#"{"candidates":[]}"#),
            Err(GenerateError::Empty)
        ));
    }

    #[test]
    fn error_status_uses_api_message() {
        let err = parse_generation(403, br#"{"error":{"code":403,"message":"API key not valid"}}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "generator returned 403: API key not valid");
    }
}
