//! Offline maintenance of a user's persisted notifications.
//!
//! # Examples
//!
//! ```bash
//! bidwatch notifications list --user 42
//! bidwatch notifications read 5f0c... --user 42
//! bidwatch notifications read-all --user 42
//! bidwatch notifications prune --user 42
//! bidwatch notifications clear --user 42
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::notifications::{FileStorage, Notification, NotificationStore, Storage};

/// Open `user`'s store from the configured storage directory.
pub fn open(config: &Config, user: &str) -> Result<NotificationStore> {
    let storage = FileStorage::new(Config::storage_dir()?)
        .context("Failed to open notification storage")?;
    Ok(open_with(Arc::new(storage), config, user))
}

/// Open `user`'s store on an explicit backend.
pub fn open_with(storage: Arc<dyn Storage>, config: &Config, user: &str) -> NotificationStore {
    let mut store = NotificationStore::new(storage, config.retention());
    store.load(user);
    store
}

/// Render notifications as one line each, newest first.
pub fn render(notifications: &[Notification]) -> String {
    if notifications.is_empty() {
        return "No notifications.\n".to_string();
    }
    let mut out = String::new();
    for n in notifications {
        let marker = if n.is_read() { ' ' } else { '*' };
        let auction = if n.auction_id().is_empty() {
            String::new()
        } else {
            format!(" [auction {}]", n.auction_id())
        };
        let _ = writeln!(
            out,
            "{marker} {}  {}  {:<14} {}{}",
            n.id(),
            n.created_at().format("%Y-%m-%d %H:%M"),
            n.kind().to_string(),
            n.title(),
            auction
        );
    }
    out
}

/// Print `user`'s notifications.
pub fn list(config: &Config, user: &str) -> Result<()> {
    let store = open(config, user)?;
    print!("{}", render(&store.list()));
    println!("{} unread", store.unread_count());
    Ok(())
}

/// Mark one notification read.
pub fn read(config: &Config, user: &str, id: &str) -> Result<()> {
    let mut store = open(config, user)?;
    if store.get(id).is_none() {
        anyhow::bail!("No notification '{}' for user {}", id, user);
    }
    if store.mark_read(id) {
        println!("Marked {} read.", id);
    } else {
        println!("{} was already read.", id);
    }
    Ok(())
}

/// Mark everything read.
pub fn read_all(config: &Config, user: &str) -> Result<()> {
    let mut store = open(config, user)?;
    println!("Marked {} notification(s) read.", store.mark_all_read());
    Ok(())
}

/// Prune expired read notifications.
pub fn prune(config: &Config, user: &str) -> Result<()> {
    let mut store = open(config, user)?;
    println!("Pruned {} notification(s).", store.prune());
    Ok(())
}

/// Delete `user`'s namespace and the legacy unscoped key.
pub fn clear(config: &Config, user: &str) -> Result<()> {
    let mut store = open(config, user)?;
    store.clear(user);
    println!("Cleared notifications for {}.", user);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{MemoryStorage, NotificationDraft, NotificationKind};

    #[test]
    fn test_render_marks_unread_and_auction() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = open_with(Arc::clone(&storage), &Config::default(), "u1");
        assert_eq!(render(&store.list()), "No notifications.\n");

        let n = store
            .add(NotificationDraft {
                kind: NotificationKind::AuctionWon,
                title: "Ganaste".into(),
                message: String::new(),
                auction_id: "a9".into(),
            })
            .unwrap();
        let text = render(&store.list());
        assert!(text.starts_with('*'));
        assert!(text.contains("AUCTION_WON"));
        assert!(text.contains("[auction a9]"));

        store.mark_read(n.id());
        assert!(render(&store.list()).starts_with(' '));
    }

    #[test]
    fn test_open_with_reads_persisted_entries() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut first = open_with(Arc::clone(&storage), &Config::default(), "u1");
        first.add(NotificationDraft {
            kind: NotificationKind::Bid,
            title: "t".into(),
            message: "m".into(),
            auction_id: String::new(),
        });
        let second = open_with(storage, &Config::default(), "u1");
        assert_eq!(second.len(), 1);
    }
}
