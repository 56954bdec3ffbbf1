//! Versioned, run-once migrations of persisted notification state.
//!
//! The applied version lives under [`constants::MIGRATION_MARKER_KEY`]. Each
//! step runs at most once per storage backend.
//!
//! Version 1 retires the unscoped legacy blob written before notifications
//! were namespaced per user. The blob is adopted into the active user's
//! namespace only when every entry in it provably belongs to that user;
//! anything else (foreign or ownerless entries, corrupt JSON) is deleted.

use crate::constants;
use crate::error::StorageError;

use super::model::Notification;
use super::storage::Storage;
use super::user_key;

/// Latest schema version.
pub const CURRENT_VERSION: u32 = 1;

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Marker already at [`CURRENT_VERSION`].
    UpToDate,
    /// No legacy blob existed.
    NothingToMigrate,
    /// Legacy entries merged into the active user's namespace.
    Adopted(usize),
    /// Legacy blob deleted without adopting anything.
    Discarded,
}

/// Applied schema version, 0 if none.
pub fn applied_version(storage: &dyn Storage) -> Result<u32, StorageError> {
    Ok(storage
        .get(constants::MIGRATION_MARKER_KEY)?
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0))
}

/// Bring `storage` to [`CURRENT_VERSION`] on behalf of `active_user`.
pub fn run(storage: &dyn Storage, active_user: &str) -> Result<MigrationOutcome, StorageError> {
    if applied_version(storage)? >= CURRENT_VERSION {
        return Ok(MigrationOutcome::UpToDate);
    }

    let outcome = retire_legacy_blob(storage, active_user)?;
    storage.set(
        constants::MIGRATION_MARKER_KEY,
        &CURRENT_VERSION.to_string(),
    )?;
    log::info!(
        "[Migration] Notifications schema at v{}: {:?}",
        CURRENT_VERSION,
        outcome
    );
    Ok(outcome)
}

fn retire_legacy_blob(
    storage: &dyn Storage,
    active_user: &str,
) -> Result<MigrationOutcome, StorageError> {
    let Some(raw) = storage.get(constants::LEGACY_NOTIFICATIONS_KEY)? else {
        return Ok(MigrationOutcome::NothingToMigrate);
    };

    let legacy: Vec<Notification> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("[Migration] Discarding unreadable legacy notifications: {}", e);
            storage.remove(constants::LEGACY_NOTIFICATIONS_KEY)?;
            return Ok(MigrationOutcome::Discarded);
        }
    };

    let owned = !legacy.is_empty() && legacy.iter().all(|n| n.owner_user_id() == active_user);
    if !owned {
        storage.remove(constants::LEGACY_NOTIFICATIONS_KEY)?;
        return Ok(MigrationOutcome::Discarded);
    }

    let key = user_key(active_user);
    let mut merged: Vec<Notification> = match storage.get(&key)? {
        Some(current) => serde_json::from_str(&current).map_err(|source| StorageError::Json {
            key: key.clone(),
            source,
        })?,
        None => Vec::new(),
    };
    let mut adopted = 0;
    for entry in legacy {
        if merged.iter().all(|n| n.id() != entry.id()) {
            merged.push(entry);
            adopted += 1;
        }
    }
    merged.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

    let json = serde_json::to_string(&merged).map_err(|source| StorageError::Json {
        key: key.clone(),
        source,
    })?;
    storage.set(&key, &json)?;
    storage.remove(constants::LEGACY_NOTIFICATIONS_KEY)?;
    Ok(MigrationOutcome::Adopted(adopted))
}
