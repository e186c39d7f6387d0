//! Cooldown endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use surplus_common::AppResult;
use surplus_core::LiftOutcome;

use crate::{middleware::AppState, response::ApiResponse};

/// Lift request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiftRequest {
    pub user_id: String,
}

/// Lift response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiftResponse {
    pub ok: bool,
    pub new_balance: i64,
    /// True when an earlier request already paid for this suspension.
    pub already_lifted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_spent: Option<i64>,
}

impl From<LiftOutcome> for LiftResponse {
    fn from(outcome: LiftOutcome) -> Self {
        match outcome {
            LiftOutcome::Lifted {
                points_spent,
                new_balance,
                ..
            } => Self {
                ok: true,
                new_balance,
                already_lifted: false,
                points_spent: Some(points_spent),
            },
            LiftOutcome::AlreadyLifted { balance } => Self {
                ok: true,
                new_balance: balance,
                already_lifted: true,
                points_spent: None,
            },
        }
    }
}

/// Pay points to end the current suspension.
async fn lift(
    State(state): State<AppState>,
    Json(req): Json<LiftRequest>,
) -> AppResult<ApiResponse<LiftResponse>> {
    let outcome = state.cooldown_service.lift_with_points(&req.user_id).await?;
    Ok(ApiResponse::ok(outcome.into()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/lift", post(lift))
}
