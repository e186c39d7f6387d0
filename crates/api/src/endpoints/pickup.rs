//! Pickup endpoints.

use axum::{Json, Router, extract::State, middleware, routing::post};
use serde::{Deserialize, Serialize};
use surplus_common::AppResult;
use surplus_db::entities::offer;

use super::reservations::ReservationResponse;
use crate::{
    middleware::AppState,
    rate_limit::{RateLimiterState, rate_limit_pickup_middleware},
    response::ApiResponse,
};

/// Redeem request, sent by the partner's scanner.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub code: String,
    pub partner_id: String,
}

/// Offer summary shown after a pickup.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSummary {
    pub id: String,
    pub title: String,
    pub original_price: i64,
    pub smart_price: i64,
    pub quantity_available: i32,
}

impl From<offer::Model> for OfferSummary {
    fn from(o: offer::Model) -> Self {
        Self {
            id: o.id,
            title: o.title,
            original_price: o.original_price,
            smart_price: o.smart_price,
            quantity_available: o.quantity_available,
        }
    }
}

/// Redeem response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub reservation: ReservationResponse,
    pub offer: OfferSummary,
    pub savings: i64,
}

/// Validate a pickup code and mark the reservation picked up.
async fn redeem(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> AppResult<ApiResponse<RedeemResponse>> {
    let redeemed = state
        .pickup_service
        .redeem(&req.code, &req.partner_id)
        .await?;
    let view = state.reservation_service.view(redeemed.reservation);

    Ok(ApiResponse::ok(RedeemResponse {
        reservation: view.into(),
        offer: redeemed.offer.into(),
        savings: redeemed.savings,
    }))
}

pub fn router(limiter: RateLimiterState) -> Router<AppState> {
    Router::new()
        .route("/redeem", post(redeem))
        .route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_pickup_middleware,
        ))
}
