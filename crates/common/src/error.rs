//! Error types for surplus.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Reservation Errors ===
    #[error("Offer is out of stock")]
    OutOfStock,

    #[error("Offer is no longer available")]
    OfferExpired,

    #[error("Customer is blocked from reserving")]
    CustomerBlocked {
        /// End of the blocking penalty; `None` for a permanent ban.
        until: Option<DateTime<Utc>>,
        /// Seconds left at the time the block was checked.
        remaining_seconds: Option<i64>,
    },

    #[error("Customer already has an active reservation")]
    DuplicateActiveReservation,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // === Pickup Errors ===
    #[error("Pickup code not found")]
    CodeNotFound,

    #[error("Reservation belongs to another partner")]
    WrongPartner,

    #[error("Reservation has already been picked up")]
    AlreadyRedeemed,

    #[error("Reservation has expired")]
    ReservationExpired,

    // === Forgiveness / Cooldown Errors ===
    #[error("Forgiveness has already been requested")]
    AlreadyRequested,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Forgiveness request has already been decided")]
    AlreadyDecided,

    #[error("Insufficient points: {available} available, {required} required")]
    InsufficientPoints { required: i64, available: i64 },

    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // === Server Errors ===
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_) | Self::CodeNotFound => StatusCode::NOT_FOUND,
            Self::Forbidden(_) | Self::WrongPartner | Self::CustomerBlocked { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::OutOfStock
            | Self::DuplicateActiveReservation
            | Self::InvalidStateTransition { .. }
            | Self::AlreadyRedeemed
            | Self::AlreadyRequested
            | Self::AlreadyDecided => StatusCode::CONFLICT,
            Self::OfferExpired | Self::ReservationExpired => StatusCode::GONE,
            Self::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientPoints { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 5xx Server Errors
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Queue(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::OfferExpired => "OFFER_EXPIRED",
            Self::CustomerBlocked { .. } => "CUSTOMER_BLOCKED",
            Self::DuplicateActiveReservation => "DUPLICATE_ACTIVE_RESERVATION",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::CodeNotFound => "CODE_NOT_FOUND",
            Self::WrongPartner => "WRONG_PARTNER",
            Self::AlreadyRedeemed => "ALREADY_REDEEMED",
            Self::ReservationExpired => "RESERVATION_EXPIRED",
            Self::AlreadyRequested => "ALREADY_REQUESTED",
            Self::NotEligible(_) => "NOT_ELIGIBLE",
            Self::AlreadyDecided => "ALREADY_DECIDED",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns whether the caller may retry the same request later.
    ///
    /// Only storage outages are transient; every domain error is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Structured details shown to the user alongside the message.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::CustomerBlocked {
                until: Some(until),
                remaining_seconds,
            } => Some(json!({
                "permanent": false,
                "blockedUntil": until,
                "remainingSeconds": remaining_seconds,
            })),
            Self::CustomerBlocked { until: None, .. } => Some(json!({ "permanent": true })),
            Self::RateLimited { retry_after_secs } => {
                Some(json!({ "retryAfterSeconds": retry_after_secs }))
            }
            Self::InsufficientPoints {
                required,
                available,
            } => Some(json!({
                "required": required,
                "available": available,
                "shortfall": required - available,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Log server errors
        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
