//! Notification delivery job.

use serde::{Deserialize, Serialize};
use surplus_core::Notice;

/// Job to store a notice in its recipient's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJob {
    /// The notice to deliver.
    pub notice: Notice,
}

impl NotifyJob {
    /// Create a new notify job.
    #[must_use]
    pub const fn new(notice: Notice) -> Self {
        Self { notice }
    }
}
