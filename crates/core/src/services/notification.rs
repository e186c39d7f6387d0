//! Notification service.

use async_trait::async_trait;
use sea_orm::Set;
use surplus_common::{AppResult, IdGenerator, SharedClock};
use surplus_db::{entities::notification, repositories::NotificationRepository};

use crate::services::notifier::{Notice, Notifier};

/// Notification inbox: stores notices and serves them back to their users.
#[derive(Clone)]
pub struct NotificationService {
    notification_repo: NotificationRepository,
    clock: SharedClock,
    id_gen: IdGenerator,
}

impl NotificationService {
    /// Create a new notification service.
    #[must_use]
    pub const fn new(notification_repo: NotificationRepository, clock: SharedClock) -> Self {
        Self {
            notification_repo,
            clock,
            id_gen: IdGenerator::new(),
        }
    }

    /// Persist a notice in its recipient's inbox.
    pub async fn store(&self, notice: Notice) -> AppResult<notification::Model> {
        let model = notification::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(notice.user_id),
            kind: Set(notice.kind),
            payload: Set(notice.payload),
            is_read: Set(false),
            created_at: Set(self.clock.now().into()),
        };

        self.notification_repo.create(model).await
    }

    /// Get notifications for a user.
    pub async fn get_notifications(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        self.notification_repo
            .find_by_user(user_id, limit, until_id, unread_only)
            .await
    }

    /// Mark all notifications as read for a user.
    pub async fn mark_all_as_read(&self, user_id: &str) -> AppResult<u64> {
        self.notification_repo.mark_all_as_read(user_id).await
    }

    /// Count unread notifications for a user.
    pub async fn count_unread(&self, user_id: &str) -> AppResult<u64> {
        self.notification_repo.count_unread(user_id).await
    }
}

/// Writes notices straight into the inbox, for deployments without a queue.
#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, notice: Notice) -> AppResult<()> {
        self.store(notice).await?;
        Ok(())
    }
}
