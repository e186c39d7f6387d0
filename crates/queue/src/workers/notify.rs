//! Notify worker.

use apalis::prelude::*;
use surplus_core::NotificationService;
use tracing::{debug, error};

use crate::jobs::NotifyJob;

/// Context for the notify worker.
#[derive(Clone)]
pub struct NotifyContext {
    pub notifications: NotificationService,
}

impl NotifyContext {
    /// Create a new notify context.
    #[must_use]
    pub const fn new(notifications: NotificationService) -> Self {
        Self { notifications }
    }
}

/// Worker function for storing notices.
///
/// # Errors
/// Returns an error if the notice could not be stored; apalis retries it.
pub async fn notify_worker(job: NotifyJob, ctx: Data<NotifyContext>) -> Result<(), Error> {
    let user_id = job.notice.user_id.clone();
    let kind = job.notice.kind;

    match ctx.notifications.store(job.notice).await {
        Ok(stored) => {
            debug!(
                notification_id = %stored.id,
                user_id = %user_id,
                kind = kind.as_str(),
                "Notification stored"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                user_id = %user_id,
                kind = kind.as_str(),
                error = %e,
                "Failed to store notification"
            );
            let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
            Err(Error::Failed(boxed.into()))
        }
    }
}
