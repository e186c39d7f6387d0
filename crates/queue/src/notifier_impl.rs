//! Redis-backed notifier.
//!
//! Notices are pushed onto an apalis queue and stored by the notify worker,
//! so a slow inbox write never holds up the request that caused it.

use async_trait::async_trait;
use surplus_common::{AppError, AppResult};
use surplus_core::{Notice, Notifier};

use crate::jobs::NotifyJob;

/// Notifier that queues every notice as a [`NotifyJob`].
#[derive(Clone)]
pub struct RedisNotifier {
    storage: apalis_redis::RedisStorage<NotifyJob>,
}

impl RedisNotifier {
    /// Create a new Redis notifier.
    #[must_use]
    pub const fn new(storage: apalis_redis::RedisStorage<NotifyJob>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, notice: Notice) -> AppResult<()> {
        use apalis::prelude::*;

        let user_id = notice.user_id.clone();
        let kind = notice.kind;

        self.storage
            .clone()
            .push(NotifyJob::new(notice))
            .await
            .map_err(|e| AppError::Queue(format!("Failed to queue notification: {e}")))?;

        tracing::debug!(user_id = %user_id, kind = kind.as_str(), "Queued notification");
        Ok(())
    }
}
