//! Notification dispatch.
//!
//! Services hand a [`Notice`] to a [`Notifier`] after their transaction has
//! committed. Delivery failures are logged and counted, never returned to the
//! caller whose state change already succeeded.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surplus_common::{AppResult, get_metrics};
use surplus_db::entities::notification::NotificationKind;

/// A message for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub user_id: String,
    pub kind: NotificationKind,
    pub payload: Value,
}

impl Notice {
    /// Build a notice.
    #[must_use]
    pub fn new(user_id: impl Into<String>, kind: NotificationKind, payload: Value) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            payload,
        }
    }
}

/// Trait for delivering notices to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand off a notice for delivery.
    async fn notify(&self, notice: Notice) -> AppResult<()>;
}

/// A no-op notifier for tests or when notifications are disabled.
#[derive(Clone, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(&self, _notice: Notice) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps every notice in memory.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices received so far, oldest first.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds received so far, oldest first.
    #[must_use]
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notices().into_iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) -> AppResult<()> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
        Ok(())
    }
}

/// Shared notifier handle.
pub type NotifierService = Arc<dyn Notifier>;

/// The notifier services start with.
#[must_use]
pub fn noop_notifier() -> NotifierService {
    Arc::new(NoOpNotifier)
}

/// Deliver a notice, logging instead of failing.
pub async fn dispatch(notifier: &NotifierService, notice: Notice) {
    let user_id = notice.user_id.clone();
    let kind = notice.kind;

    match notifier.notify(notice).await {
        Ok(()) => {
            get_metrics()
                .notifications_enqueued
                .fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            get_metrics()
                .notifications_failed
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                user_id = %user_id,
                kind = kind.as_str(),
                "Failed to deliver notification"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use surplus_common::AppError;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notice: Notice) -> AppResult<()> {
            Err(AppError::Queue("redis down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_order() {
        let recorder = RecordingNotifier::new();
        let notifier: NotifierService = Arc::new(recorder.clone());

        dispatch(
            &notifier,
            Notice::new("u1", NotificationKind::ReservationCreated, json!({})),
        )
        .await;
        dispatch(
            &notifier,
            Notice::new("u1", NotificationKind::PickupConfirmed, json!({})),
        )
        .await;

        assert_eq!(
            recorder.kinds(),
            vec![
                NotificationKind::ReservationCreated,
                NotificationKind::PickupConfirmed
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier: NotifierService = Arc::new(FailingNotifier);
        let before = get_metrics().notifications_failed.load(Ordering::Relaxed);

        dispatch(
            &notifier,
            Notice::new("u1", NotificationKind::MissedPickup, json!({})),
        )
        .await;

        assert!(get_metrics().notifications_failed.load(Ordering::Relaxed) > before);
    }

    #[test]
    fn test_notice_serializes_camel_case() {
        let notice = Notice::new("u1", NotificationKind::CooldownLifted, json!({ "cost": 100 }));
        let value = serde_json::to_value(&notice).unwrap();

        assert_eq!(value["userId"], "u1");
        assert_eq!(value["kind"], "cooldown_lifted");
    }
}
