//! HTTP API: swap requests, status, claims, cancellation and health

use crate::config::ApiConfig;
use crate::coordination::SwapOrchestrator;
use crate::error::{ErrorKind, RelayerError, RelayerResult};
use crate::escrow::{ChainId, Secret};
use crate::state::{SwapEventRecord, SwapStats};
use crate::swap::{SwapIntent, SwapRequest};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SwapOrchestrator>,
    pub started_at: Instant,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/swaps", post(initiate_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/events", get(get_swap_events))
        .route("/swaps/:id/claim", post(claim_swap))
        .route("/swaps/:id/cancel", post(cancel_swap))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, orchestrator: Arc<SwapOrchestrator>) -> RelayerResult<()> {
    let app = router(AppState {
        orchestrator,
        started_at: Instant::now(),
    });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Relayer error rendered as `{kind, code, message}`
pub struct ApiError(RelayerError);

impl From<RelayerError> for ApiError {
    fn from(err: RelayerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Safety => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unrecoverable | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("API request failed: {}", self.0);
        }

        let body = ErrorResponse {
            kind: kind.as_str(),
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Initiate a swap
async fn initiate_swap(
    State(state): State<AppState>,
    Json(request): Json<SwapRequest>,
) -> ApiResult<(StatusCode, Json<SwapIntent>)> {
    let intent = state.orchestrator.initiate(request).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<Uuid>,
) -> ApiResult<Json<SwapIntent>> {
    Ok(Json(state.orchestrator.status(swap_id).await?))
}

async fn get_swap_events(
    State(state): State<AppState>,
    Path(swap_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SwapEventRecord>>> {
    Ok(Json(state.orchestrator.events(swap_id).await?))
}

/// Push a swap forward with a preimage the caller holds
async fn claim_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<Uuid>,
    Json(claim): Json<ClaimRequest>,
) -> ApiResult<Json<SwapIntent>> {
    Ok(Json(state.orchestrator.claim(swap_id, claim.secret).await?))
}

async fn cancel_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<Uuid>,
) -> ApiResult<Json<SwapIntent>> {
    Ok(Json(state.orchestrator.cancel(swap_id).await?))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and every chain reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.orchestrator.store().health_check().await.is_ok();

    let chain_health = state.orchestrator.chains().health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if store_ok && chains_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: store_ok && chains_ok,
            store: store_ok,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

/// Get relayer status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let chains = state.orchestrator.chains();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_chains: chains.connected_chains(),
        live_swaps: state.orchestrator.registry().len(),
    })
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<SwapStats>> {
    Ok(Json(state.orchestrator.stats().await?))
}

// Request and response types

#[derive(Deserialize)]
struct ClaimRequest {
    secret: Secret,
}

#[derive(Serialize)]
struct ErrorResponse {
    kind: &'static str,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: ChainId,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    connected_chains: Vec<ChainId>,
    live_swaps: usize,
}
