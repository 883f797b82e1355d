//! HTTP and WebSocket surface.
//!
//! Thin axum layer over the [`Orchestrator`]: status, run and stop
//! endpoints plus the live event stream at `/ws/pipeline`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ResolvedConfig;
use crate::core::Orchestrator;
use crate::domain::{PipelineState, RunConfig, RunConfigError};

pub mod ws;

/// State shared by every handler
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Fills fields a run request leaves out
    pub defaults: RunConfig,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, defaults: RunConfig) -> SharedState {
        Arc::new(Self {
            orchestrator,
            defaults,
        })
    }
}

// ── Request / response bodies ─────────────────────────────────────────

/// Body of `POST /api/pipeline/run`; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub niche: Option<String>,
    pub max_sites: Option<u32>,
}

impl RunRequest {
    fn into_config(self, defaults: &RunConfig) -> RunConfig {
        RunConfig {
            niche: self.niche.unwrap_or_else(|| defaults.niche.clone()),
            max_sites: self.max_sites.unwrap_or(defaults.max_sites),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Unprocessable(String),
}

impl From<RunConfigError> for ApiError {
    fn from(err: RunConfigError) -> Self {
        ApiError::Unprocessable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn pipeline_status(State(state): State<SharedState>) -> Json<PipelineState> {
    Json(state.orchestrator.status())
}

async fn run_pipeline(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<RunResponse>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice::<RunRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid run request: {}", e)))?
    };

    let outcome = state
        .orchestrator
        .start(request.into_config(&state.defaults))
        .await?;

    Ok(Json(RunResponse {
        success: outcome.accepted,
        message: outcome.message,
        run_id: outcome.run_id,
    }))
}

async fn stop_pipeline(State(state): State<SharedState>) -> Json<StopResponse> {
    let outcome = state.orchestrator.stop();
    Json(StopResponse {
        success: outcome.acknowledged,
        message: outcome.message,
    })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/pipeline/status", get(pipeline_status))
        .route("/api/pipeline/run", post(run_pipeline))
        .route("/api/pipeline/stop", post(stop_pipeline))
        .route("/ws/pipeline", get(ws::ws_handler))
}

/// Build the full application router
pub fn build_router(state: SharedState) -> Router {
    api_router().with_state(state)
}

/// CORS layer allowing the given origins; unparseable entries are skipped
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Start the HTTP server and serve until Ctrl-C
pub async fn start_server(config: ResolvedConfig) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(&config));
    let state = AppState::new(Arc::clone(&orchestrator), config.defaults.clone());
    let app = build_router(state).layer(cors_layer(&config.cors_origins));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    let local_addr = listener.local_addr()?;
    info!(
        address = %local_addr,
        project_root = %config.project_root.display(),
        max_connections = config.max_connections,
        "auditrun server listening"
    );
    println!("auditrun running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let an in-flight run observe the stop and settle before exiting
    orchestrator.stop();
    orchestrator.wait_idle().await;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
