//! Boundary to the remote definition generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://leveler.dev/api/chat";
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// What the core asks for: a term, the text around it, and the terms already explored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRequest {
    pub selected_text: String,
    pub context: String,
    #[serde(default)]
    pub history: Vec<String>,
}

impl DefinitionRequest {
    pub fn new(
        selected_text: impl Into<String>,
        context: impl Into<String>,
        history: Vec<String>,
    ) -> Self {
        Self {
            selected_text: selected_text.into(),
            context: context.into(),
            history,
        }
    }

    pub fn depth(&self) -> usize {
        self.history.len()
    }

    pub fn original_topic(&self) -> Option<&str> {
        self.history.first().map(String::as_str)
    }

    /// The body the definition service expects.
    pub fn to_chat_request(&self) -> ChatRequest {
        ChatRequest {
            message: self.selected_text.clone(),
            immediate_context: Some(self.context.clone()),
            depth: self.depth(),
            original_topic: self.original_topic().map(str::to_string),
            used_terms: self.history.clone(),
        }
    }
}

/// `{ definition }` on success, `{ definition: "", error }` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionResponse {
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<String, FetchError>> for DefinitionResponse {
    fn from(value: Result<String, FetchError>) -> Self {
        match value {
            Ok(definition) => Self {
                definition,
                error: None,
            },
            Err(err) => Self {
                definition: String::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Wire body of the definition service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_context: Option<String>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_topic: Option<String>,
    #[serde(default)]
    pub used_terms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait DefinitionFetcher: Send + Sync {
    async fn fetch(&self, request: DefinitionRequest) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Interprets a definition-service reply body for the given HTTP status.
pub fn parse_reply(status: u16, body: &[u8]) -> Result<String, FetchError> {
    let success = (200..300).contains(&status);
    let reply = serde_json::from_slice::<ChatReply>(body);
    if !success {
        let message = reply
            .ok()
            .and_then(|reply| reply.error)
            .unwrap_or_else(|| format!("API error: {status}"));
        return Err(FetchError::Status { status, message });
    }
    let reply = reply.map_err(|err| FetchError::Malformed(err.to_string()))?;
    match (reply.response, reply.error) {
        (Some(response), _) => Ok(response),
        (None, Some(error)) => Err(FetchError::Status { status, message: error }),
        (None, None) => Err(FetchError::Malformed("missing `response` field".to_string())),
    }
}

#[cfg(feature = "client")]
pub use remote::HttpFetcher;

#[cfg(feature = "client")]
mod remote {
    use super::{ClientConfig, DefinitionFetcher, DefinitionRequest, FetchError, parse_reply};
    use async_trait::async_trait;
    use reqwest::header::{CONTENT_TYPE, HeaderValue};
    use tracing::{debug, warn};

    /// Posts definition requests to the definition service over HTTP.
    #[derive(Clone, Debug)]
    pub struct HttpFetcher {
        endpoint: String,
        http: reqwest::Client,
    }

    impl HttpFetcher {
        pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
            let http = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            Ok(Self {
                endpoint: config.endpoint,
                http,
            })
        }
    }

    #[async_trait]
    impl DefinitionFetcher for HttpFetcher {
        async fn fetch(&self, request: DefinitionRequest) -> Result<String, FetchError> {
            let body = request.to_chat_request();
            debug!(
                term = %body.message,
                depth = body.depth,
                context_len = request.context.len(),
                "requesting definition"
            );
            let response = self
                .http
                .post(&self.endpoint)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    warn!(error = %err, "definition request failed");
                    FetchError::Transport(err.to_string())
                })?;
            let status = response.status().as_u16();
            let bytes = response
                .bytes()
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            let result = parse_reply(status, &bytes);
            if let Err(err) = &result {
                warn!(status, error = %err, "definition service returned an error");
            }
            result
        }
    }
}
