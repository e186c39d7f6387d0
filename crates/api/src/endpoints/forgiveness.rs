//! Forgiveness endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use surplus_common::AppResult;
use surplus_core::ForgivenessDecision;

use super::reservations::ReservationResponse;
use crate::{
    middleware::AppState,
    response::{ApiResponse, OkResponse, ok},
};

/// Forgiveness request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestForgivenessRequest {
    pub reservation_id: String,
    pub customer_id: String,
    pub reason: String,
}

/// Ask the partner to forgive a missed pickup.
async fn request(
    State(state): State<AppState>,
    Json(req): Json<RequestForgivenessRequest>,
) -> AppResult<ApiResponse<OkResponse>> {
    state
        .forgiveness_service
        .request(&req.reservation_id, &req.customer_id, &req.reason)
        .await?;
    Ok(ok())
}

/// Partner decision request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideForgivenessRequest {
    pub reservation_id: String,
    pub partner_id: String,
    pub decision: ForgivenessDecision,
    pub message: Option<String>,
}

/// Grant or deny a pending request.
async fn decide(
    State(state): State<AppState>,
    Json(req): Json<DecideForgivenessRequest>,
) -> AppResult<ApiResponse<OkResponse>> {
    state
        .forgiveness_service
        .decide(
            &req.reservation_id,
            &req.partner_id,
            req.decision,
            req.message.as_deref(),
        )
        .await?;
    Ok(ok())
}

/// Pending requests query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub partner_id: String,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

const fn default_limit() -> u64 {
    20
}

/// Requests still waiting on the partner, oldest first.
async fn pending(
    State(state): State<AppState>,
    Json(req): Json<PendingRequest>,
) -> AppResult<ApiResponse<Vec<ReservationResponse>>> {
    let reservations = state
        .forgiveness_service
        .list_pending_for_partner(&req.partner_id, req.limit.min(100))
        .await?;
    Ok(ApiResponse::ok(
        reservations
            .into_iter()
            .map(|r| state.reservation_service.view(r).into())
            .collect(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/request", post(request))
        .route("/decide", post(decide))
        .route("/pending", post(pending))
}
