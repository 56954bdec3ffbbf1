//! Session credential management: `save-session`, `logout`, `status`.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::IdentityError;
use crate::notifications::{FileStorage, NotificationStore, Storage};

/// Store a session cookie for later runs.
pub fn save(config: &mut Config, cookie: &str) -> Result<()> {
    let cookie = cookie.trim();
    if cookie.is_empty() {
        anyhow::bail!("Session cookie must not be empty");
    }
    config.save_session(cookie)?;
    println!("Session saved.");
    Ok(())
}

/// Log out server-side (best effort) and forget the local credential along
/// with the signed-in user's persisted notifications.
pub async fn logout(config: &mut Config) -> Result<()> {
    if config.has_session() {
        let api = ApiClient::from_config(config)?;
        match api.fetch_identity().await {
            Ok(identity) => {
                let storage = FileStorage::new(Config::storage_dir()?)
                    .context("Failed to open notification storage")?;
                forget_notifications(Arc::new(storage), config, &identity.id);
            }
            Err(e) => log::warn!("Cannot resolve signed-in user, keeping notifications: {}", e),
        }
        if let Err(e) = api.logout().await {
            log::warn!("Server logout failed, clearing local session anyway: {}", e);
        }
    }
    config.clear_session()?;
    println!("Logged out.");
    Ok(())
}

/// Delete `user`'s notification namespace from `storage`.
fn forget_notifications(storage: Arc<dyn Storage>, config: &Config, user: &str) {
    NotificationStore::new(storage, config.retention()).clear(user);
}

/// Print identity and configuration summary.
pub async fn status(config: &Config) -> Result<()> {
    println!("Server:          {}", config.server_url);
    println!("Environment:     {}", crate::env::Environment::current());
    println!("Session stored:  {}", if config.has_session() { "yes" } else { "no" });
    println!("Exempt session:  {}", config.exempt_session);
    println!("Reconnection:    {} attempt(s), {} ms timeout", config.reconnection_attempts, config.connect_timeout_ms);
    println!("Retention:       {} h", config.retention_hours);

    let api = ApiClient::from_config(config)?;
    match api.fetch_identity().await {
        Ok(identity) => println!("Signed in as:    {} ({})", identity.name, identity.id),
        Err(IdentityError::Unauthenticated) => println!("Signed in as:    nobody (session not recognised)"),
        Err(IdentityError::Unavailable(reason)) => println!("Signed in as:    unknown ({})", reason),
    }
    Ok(())
}
