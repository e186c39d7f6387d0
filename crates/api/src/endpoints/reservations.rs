//! Reservation endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use surplus_common::AppResult;
use surplus_core::{CreateReservationInput, ReservationView};
use surplus_db::entities::reservation::{ForgivenessStatus, ReservationStatus};

use crate::{
    middleware::AppState,
    response::{ApiResponse, OkResponse, ok},
};

/// Reservation as returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: String,
    pub customer_id: String,
    pub partner_id: String,
    pub offer_id: String,
    pub quantity: i32,
    pub qr_code: String,
    pub status: ReservationStatus,
    pub total_price: i64,
    pub created_at: String,
    /// Pickup deadline.
    pub expires_at: String,
    pub picked_up_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub forgiveness_status: ForgivenessStatus,
    pub forgiveness_reason: Option<String>,
    pub forgiveness_requested_at: Option<String>,
    pub forgiveness_decided_at: Option<String>,
    pub forgiveness_message: Option<String>,
    pub can_request_forgiveness: bool,
    pub forgiveness_pending: bool,
    pub deadline_passed: bool,
}

impl From<ReservationView> for ReservationResponse {
    fn from(v: ReservationView) -> Self {
        let r = v.reservation;
        Self {
            id: r.id,
            customer_id: r.customer_id,
            partner_id: r.partner_id,
            offer_id: r.offer_id,
            quantity: r.quantity,
            qr_code: r.qr_code,
            status: r.status,
            total_price: r.total_price,
            created_at: r.created_at.to_rfc3339(),
            expires_at: r.expires_at.to_rfc3339(),
            picked_up_at: r.picked_up_at.map(|t| t.to_rfc3339()),
            cancelled_at: r.cancelled_at.map(|t| t.to_rfc3339()),
            forgiveness_status: v.forgiveness_status,
            forgiveness_reason: r.forgiveness_reason,
            forgiveness_requested_at: r.forgiveness_requested_at.map(|t| t.to_rfc3339()),
            forgiveness_decided_at: r.forgiveness_decided_at.map(|t| t.to_rfc3339()),
            forgiveness_message: r.forgiveness_message,
            can_request_forgiveness: v.can_request_forgiveness,
            forgiveness_pending: v.forgiveness_pending,
            deadline_passed: v.deadline_passed,
        }
    }
}

/// Created reservation response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedReservationResponse {
    pub reservation_id: String,
    pub qr_code: String,
    pub expires_at: String,
    pub quantity: i32,
    pub total_price: i64,
}

/// Reserve units of an offer.
async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateReservationInput>,
) -> AppResult<ApiResponse<CreatedReservationResponse>> {
    let reservation = state.reservation_service.create(req).await?;
    Ok(ApiResponse::ok(CreatedReservationResponse {
        reservation_id: reservation.id,
        qr_code: reservation.qr_code,
        expires_at: reservation.expires_at.to_rfc3339(),
        quantity: reservation.quantity,
        total_price: reservation.total_price,
    }))
}

/// Cancel reservation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationRequest {
    pub reservation_id: String,
    /// Customer or partner on the reservation.
    pub actor_id: String,
}

/// Cancel an active reservation.
async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<CancelReservationRequest>,
) -> AppResult<ApiResponse<OkResponse>> {
    state
        .reservation_service
        .cancel(&req.reservation_id, &req.actor_id)
        .await?;
    Ok(ok())
}

/// Show reservation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowReservationRequest {
    pub reservation_id: String,
    pub viewer_id: String,
}

/// Show one reservation; clients poll this while waiting at the counter.
async fn show(
    State(state): State<AppState>,
    Json(req): Json<ShowReservationRequest>,
) -> AppResult<ApiResponse<ReservationResponse>> {
    let view = state
        .reservation_service
        .show(&req.reservation_id, &req.viewer_id)
        .await?;
    Ok(ApiResponse::ok(view.into()))
}

/// List reservations request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReservationsRequest {
    pub customer_id: String,
    pub status: Option<ReservationStatus>,
    /// Maximum results (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Cursor for pagination (before this ID)
    pub until_id: Option<String>,
}

const fn default_limit() -> u64 {
    10
}

/// List a customer's reservations, newest first.
async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListReservationsRequest>,
) -> AppResult<ApiResponse<Vec<ReservationResponse>>> {
    let limit = req.limit.min(100);
    let views = state
        .reservation_service
        .list_for_customer(&req.customer_id, req.status, limit, req.until_id.as_deref())
        .await?;
    Ok(ApiResponse::ok(views.into_iter().map(Into::into).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/cancel", post(cancel))
        .route("/show", post(show))
        .route("/list", post(list))
}
