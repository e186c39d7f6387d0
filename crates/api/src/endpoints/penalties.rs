//! Penalty endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use surplus_common::AppResult;
use surplus_core::PenaltyStatus;
use surplus_db::entities::user_penalty::{self, LiftReason, PenaltyType};

use crate::{
    middleware::AppState,
    response::{ApiResponse, OkResponse, ok},
};

/// Penalty as returned to clients.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyResponse {
    pub id: String,
    pub penalty_type: PenaltyType,
    pub reason: String,
    pub reservation_id: String,
    pub offense_number: i32,
    pub ends_at: Option<String>,
    pub is_active: bool,
    pub acknowledged: bool,
    pub lifted_at: Option<String>,
    pub lift_reason: Option<LiftReason>,
    pub points_spent: Option<i64>,
    pub created_at: String,
}

impl From<user_penalty::Model> for PenaltyResponse {
    fn from(p: user_penalty::Model) -> Self {
        Self {
            id: p.id,
            penalty_type: p.penalty_type,
            reason: p.reason,
            reservation_id: p.reservation_id,
            offense_number: p.offense_number,
            ends_at: p.ends_at.map(|t| t.to_rfc3339()),
            is_active: p.is_active,
            acknowledged: p.acknowledged,
            lifted_at: p.lifted_at.map(|t| t.to_rfc3339()),
            lift_reason: p.lift_reason,
            points_spent: p.points_spent,
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

/// Penalty status response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyStatusResponse {
    pub blocked: bool,
    pub permanent: bool,
    pub blocked_until: Option<String>,
    pub remaining_seconds: Option<i64>,
    pub offense_count: i32,
    pub total_penalties_received: i32,
    pub active_penalty: Option<PenaltyResponse>,
    pub can_lift_with_points: bool,
    pub lift_cost: i64,
    pub recent_penalties: Vec<PenaltyResponse>,
}

impl From<PenaltyStatus> for PenaltyStatusResponse {
    fn from(s: PenaltyStatus) -> Self {
        Self {
            blocked: s.blocked,
            permanent: s.permanent,
            blocked_until: s.blocked_until.map(|t| t.to_rfc3339()),
            remaining_seconds: s.remaining_seconds,
            offense_count: s.offense_count,
            total_penalties_received: s.total_penalties_received,
            active_penalty: s.active_penalty.map(Into::into),
            can_lift_with_points: s.can_lift_with_points,
            lift_cost: s.lift_cost,
            recent_penalties: s.recent_penalties.into_iter().map(Into::into).collect(),
        }
    }
}

/// Status request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyStatusRequest {
    pub user_id: String,
}

/// A user's current standing.
async fn status(
    State(state): State<AppState>,
    Json(req): Json<PenaltyStatusRequest>,
) -> AppResult<ApiResponse<PenaltyStatusResponse>> {
    let status = state.penalty_service.status(&req.user_id).await?;
    Ok(ApiResponse::ok(status.into()))
}

/// Acknowledge request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub penalty_id: String,
    pub user_id: String,
}

/// Mark a penalty as seen.
async fn acknowledge(
    State(state): State<AppState>,
    Json(req): Json<AcknowledgeRequest>,
) -> AppResult<ApiResponse<OkResponse>> {
    state
        .penalty_service
        .acknowledge(&req.penalty_id, &req.user_id)
        .await?;
    Ok(ok())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", post(status))
        .route("/acknowledge", post(acknowledge))
}
