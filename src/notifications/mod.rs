//! Per-user notification history.
//!
//! - [`model`]: the [`Notification`] record and its closed kind taxonomy
//! - [`storage`]: key/value backends ([`FileStorage`], [`MemoryStorage`])
//! - [`migration`]: run-once schema migrations of persisted state
//! - [`store`]: the [`NotificationStore`] itself plus the background pruner
//!
//! Each signed-in user owns one namespace, `notifications:<userId>`, holding
//! a JSON array of records. Entries owned by anyone else are never loaded.

pub mod migration;
pub mod model;
pub mod storage;
pub mod store;

pub use model::{Notification, NotificationDraft, NotificationKind};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{spawn_pruner, Clock, NotificationStore, PrunerHandle, SharedNotificationStore};

use crate::constants;

/// Storage key of `user_id`'s namespace.
#[must_use]
pub fn user_key(user_id: &str) -> String {
    format!("{}{}", constants::NOTIFICATIONS_KEY_PREFIX, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key() {
        assert_eq!(user_key("42"), "notifications:42");
        assert_ne!(user_key(""), constants::LEGACY_NOTIFICATIONS_KEY);
    }
}
