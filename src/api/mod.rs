//! HTTP API for health checks, tracking control and status queries

use crate::auction::{Auction, AuctionTracker};
use crate::config::ApiConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::transfer::{Transfer, TransferKey, TransferOrchestrator, TransferRequest, TransferState};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferOrchestrator>,
    pub auctions: Arc<AuctionTracker>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/transfers", get(list_transfers).post(initiate_transfer))
        .route("/transfers/resume", post(resume_transfer))
        .route(
            "/transfers/:chain/:sequence",
            get(get_transfer).delete(stop_transfer),
        )
        .route("/auctions", get(list_auctions).post(register_auction))
        .route(
            "/auctions/:order_hash",
            get(get_auction).delete(stop_auction),
        )
        .route("/auctions/:order_hash/secret", post(reveal_secret))
        .route("/auctions/:order_hash/refund", post(begin_refund))
        .route("/auctions/:order_hash/refund/complete", post(complete_refund))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> TrackerResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TrackerError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| TrackerError::Internal(format!("API server: {}", e)))
}

/// Tracker errors as HTTP responses
struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::TransferNotFound(_) | TrackerError::AuctionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TrackerError::AlreadyTracked(_) | TrackerError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            TrackerError::ChainNotFound { .. } => StatusCode::BAD_REQUEST,
            TrackerError::Decode(_) | TrackerError::MissingSequence { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TrackerError::Submission { .. } | TrackerError::StatusQuery { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_transfers: state.transfers.active_transfers().len(),
        active_auctions: state.auctions.active_auctions().len(),
    })
}

async fn list_transfers(State(state): State<AppState>) -> Json<Vec<Transfer>> {
    Json(state.transfers.active_transfers())
}

/// Submit the lock now; attestation and completion continue in the background
async fn initiate_transfer(
    State(state): State<AppState>,
    Json(body): Json<InitiateTransferBody>,
) -> ApiResult<(StatusCode, Json<TrackingResponse>)> {
    let key = state.transfers.initiate(body.request).await?;
    state.transfers.spawn_tracking(key, body.auto_complete)?;
    Ok((StatusCode::ACCEPTED, Json(tracking(&state, key))))
}

async fn resume_transfer(
    State(state): State<AppState>,
    Json(body): Json<ResumeTransferBody>,
) -> ApiResult<(StatusCode, Json<TrackingResponse>)> {
    let key = state.transfers.resume(
        body.source_chain,
        body.target_chain,
        body.emitter.0,
        body.sequence,
    )?;
    state.transfers.spawn_tracking(key, body.auto_complete)?;
    Ok((StatusCode::ACCEPTED, Json(tracking(&state, key))))
}

fn tracking(state: &AppState, key: TransferKey) -> TrackingResponse {
    TrackingResponse {
        key,
        state: state.transfers.get_state(key),
    }
}

async fn get_transfer(
    State(state): State<AppState>,
    Path((chain, sequence)): Path<(u16, u64)>,
) -> ApiResult<Json<Transfer>> {
    let key = TransferKey::new(chain, sequence);
    state
        .transfers
        .get_transfer(key)
        .map(Json)
        .ok_or_else(|| TrackerError::TransferNotFound(key.to_string()).into())
}

async fn stop_transfer(
    State(state): State<AppState>,
    Path((chain, sequence)): Path<(u16, u64)>,
) -> ApiResult<StatusCode> {
    let key = TransferKey::new(chain, sequence);
    if state.transfers.stop(key) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TrackerError::TransferNotFound(key.to_string()).into())
    }
}

async fn list_auctions(State(state): State<AppState>) -> Json<Vec<Auction>> {
    Json(state.auctions.active_auctions())
}

async fn register_auction(
    State(state): State<AppState>,
    Json(body): Json<RegisterAuctionBody>,
) -> ApiResult<(StatusCode, Json<Auction>)> {
    let auction = state.auctions.register(&body.order_hash)?;
    Ok((StatusCode::CREATED, Json(auction)))
}

async fn get_auction(
    State(state): State<AppState>,
    Path(order_hash): Path<String>,
) -> ApiResult<Json<Auction>> {
    state
        .auctions
        .get_auction(&order_hash)
        .map(Json)
        .ok_or_else(|| TrackerError::AuctionNotFound(order_hash).into())
}

async fn stop_auction(
    State(state): State<AppState>,
    Path(order_hash): Path<String>,
) -> ApiResult<StatusCode> {
    if state.auctions.stop(&order_hash) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TrackerError::AuctionNotFound(order_hash).into())
    }
}

async fn reveal_secret(
    State(state): State<AppState>,
    Path(order_hash): Path<String>,
    Json(body): Json<SecretBody>,
) -> ApiResult<Json<Auction>> {
    Ok(Json(state.auctions.reveal_secret(&order_hash, &body.secret).await?))
}

async fn begin_refund(
    State(state): State<AppState>,
    Path(order_hash): Path<String>,
) -> ApiResult<Json<Auction>> {
    Ok(Json(state.auctions.begin_refund(&order_hash)?))
}

async fn complete_refund(
    State(state): State<AppState>,
    Path(order_hash): Path<String>,
    Json(body): Json<RefundBody>,
) -> ApiResult<Json<Auction>> {
    Ok(Json(state.auctions.complete_refund(&order_hash, &body.tx_hash)?))
}

// Request and response types

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct InitiateTransferBody {
    #[serde(flatten)]
    request: TransferRequest,
    #[serde(default = "default_true")]
    auto_complete: bool,
}

#[derive(Deserialize)]
struct ResumeTransferBody {
    source_chain: u16,
    target_chain: u16,
    emitter: H256,
    sequence: u64,
    #[serde(default = "default_true")]
    auto_complete: bool,
}

#[derive(Deserialize)]
struct RegisterAuctionBody {
    order_hash: String,
}

#[derive(Deserialize)]
struct SecretBody {
    secret: String,
}

#[derive(Deserialize)]
struct RefundBody {
    tx_hash: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    active_transfers: usize,
    active_auctions: usize,
}

#[derive(Serialize)]
struct TrackingResponse {
    key: TransferKey,
    state: Option<TransferState>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
