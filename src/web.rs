use crate::fetch::{ChatReply, ChatRequest};
use crate::gemini::{DEFAULT_MODEL, GeminiConfig, GeminiGenerator, GenerateError, TextGenerator};
use crate::limiter::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW, RateDecision, RateLimiter};
use crate::prompt::build_prompt;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;
const RATE_LIMITED: &str = "Rate limit exceeded. Please try again later.";
const GENERATION_FAILED: &str = "Failed to get response from Gemini";
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn TextGenerator>,
    pub limiter: RateLimiter,
}

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no API key configured (set GEMINI_API_KEY)")]
    MissingApiKey,
    #[error("generator setup failed: {0}")]
    Generator(#[from] GenerateError),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or(WebError::MissingApiKey)?;
    let generator = GeminiGenerator::new(GeminiConfig {
        model: config.model.clone(),
        ..GeminiConfig::new(api_key)
    })?;
    let state = Arc::new(AppState {
        generator: Arc::new(generator),
        limiter: RateLimiter::new(config.rate_limit, config.rate_window),
    });
    let router = build_router(state);
    info!(
        %config.addr,
        model = %config.model,
        rate_limit = config.rate_limit,
        window_secs = config.rate_window.as_secs(),
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    Router::new()
        .route("/api/chat", post(chat))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(cors)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "leveler-web" }))
}

/// First hop of `x-forwarded-for`, the key requests are counted under.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

async fn chat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let client = client_key(&headers);
    if let RateDecision::Limited { retry_after_secs } = state.limiter.check(&client) {
        warn!(%client, retry_after_secs, "rate limit exceeded");
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED));
    }

    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("`message` must not be empty"));
    }

    let prompt = build_prompt(&request);
    let text = state.generator.generate(&prompt).await.map_err(|err| {
        warn!(term = %request.message, depth = request.depth, error = %err, "definition generation failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, GENERATION_FAILED)
    })?;
    Ok(Json(ChatReply {
        response: Some(text),
        error: None,
    }))
}
