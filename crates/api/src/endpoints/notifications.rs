//! Notifications endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surplus_common::AppResult;
use surplus_db::entities::notification::{Model as NotificationModel, NotificationKind};

use crate::{middleware::AppState, response::ApiResponse};

/// List notifications request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsRequest {
    pub user_id: String,
    /// Maximum results (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Cursor for pagination (before this ID)
    pub until_id: Option<String>,
    /// Only unread notifications
    #[serde(default)]
    pub unread_only: bool,
    /// Include only these kinds
    pub include_kinds: Option<Vec<NotificationKind>>,
    /// Include unread count in response metadata
    #[serde(default)]
    pub with_unread_count: bool,
}

const fn default_limit() -> u64 {
    10
}

/// Notifications response with optional metadata.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsListResponse {
    pub notifications: Vec<NotificationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u64>,
}

/// Notification response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: String,
    pub created_at: String,
    pub is_read: bool,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub payload: Value,
}

impl From<NotificationModel> for NotificationResponse {
    fn from(n: NotificationModel) -> Self {
        Self {
            id: n.id,
            created_at: n.created_at.to_rfc3339(),
            is_read: n.is_read,
            kind: n.kind,
            payload: n.payload,
        }
    }
}

/// Get notifications for a user.
async fn get_notifications(
    State(state): State<AppState>,
    Json(req): Json<ListNotificationsRequest>,
) -> AppResult<ApiResponse<NotificationsListResponse>> {
    let limit = req.limit.min(100);

    let mut notifications = state
        .notification_service
        .get_notifications(&req.user_id, limit, req.until_id.as_deref(), req.unread_only)
        .await?;

    if let Some(include_kinds) = &req.include_kinds {
        notifications.retain(|n| include_kinds.contains(&n.kind));
    }

    let unread_count = if req.with_unread_count {
        Some(state.notification_service.count_unread(&req.user_id).await?)
    } else {
        None
    };

    Ok(ApiResponse::ok(NotificationsListResponse {
        notifications: notifications.into_iter().map(Into::into).collect(),
        unread_count,
    }))
}

/// Mark all as read request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllAsReadRequest {
    pub user_id: String,
}

/// Mark all as read response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllAsReadResponse {
    pub count: u64,
}

/// Mark all notifications as read.
async fn mark_all_as_read(
    State(state): State<AppState>,
    Json(req): Json<MarkAllAsReadRequest>,
) -> AppResult<ApiResponse<MarkAllAsReadResponse>> {
    let count = state
        .notification_service
        .mark_all_as_read(&req.user_id)
        .await?;
    Ok(ApiResponse::ok(MarkAllAsReadResponse { count }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list", post(get_notifications))
        .route("/mark-all-read", post(mark_all_as_read))
}
