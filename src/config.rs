//! Configuration loading and persistence.
//!
//! Handles reading and writing the bidwatch configuration file. The session
//! credential is kept out of `config.json`: it lives in a separate
//! owner-only file (or the `BIDWATCH_SESSION` env var).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants;

/// Configuration for the bidwatch client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the auction server (REST and push channel).
    pub server_url: String,
    /// Socket.IO endpoint path.
    pub socket_path: String,
    /// Session cookie value - NOT serialized to disk (see [`Config::save_session`]).
    #[serde(skip)]
    pub session_cookie: String,
    /// Reconnection attempts before the push channel settles into `Error`.
    pub reconnection_attempts: u32,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Initial reconnection delay in milliseconds (doubles per attempt).
    pub reconnection_delay_ms: u64,
    /// Read notifications older than this many hours are pruned.
    pub retention_hours: u64,
    /// Seconds between background prune passes.
    pub prune_interval_secs: u64,
    /// Seconds between periodic identity checks.
    pub identity_check_interval_secs: u64,
    /// Milliseconds a forced redirect blocks further redirects.
    pub redirect_window_ms: u64,
    /// Route of the login surface.
    pub login_route: String,
    /// Glob patterns of routes that never force a login redirect.
    pub public_routes: Vec<String>,
    /// Glob patterns of request paths whose 401s never force a redirect.
    pub public_endpoints: Vec<String>,
    /// Glob patterns of auth-flow routes (login, register, password reset).
    pub auth_routes: Vec<String>,
    /// Shared demo/analysis session: 401s never log the user out.
    pub exempt_session: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: crate::env::Environment::current()
                .default_server_url()
                .to_string(),
            socket_path: constants::SOCKET_PATH.to_string(),
            session_cookie: String::new(),
            reconnection_attempts: constants::RECONNECTION_ATTEMPTS,
            connect_timeout_ms: duration_ms(constants::CONNECT_TIMEOUT),
            reconnection_delay_ms: duration_ms(constants::RECONNECTION_DELAY),
            retention_hours: constants::NOTIFICATION_RETENTION.as_secs() / 3600,
            prune_interval_secs: constants::PRUNE_INTERVAL.as_secs(),
            identity_check_interval_secs: constants::IDENTITY_CHECK_INTERVAL.as_secs(),
            redirect_window_ms: duration_ms(constants::REDIRECT_WINDOW),
            login_route: constants::LOGIN_ROUTE.to_string(),
            public_routes: [
                "/",
                "/login",
                "/register",
                "/forgot-password",
                "/reset-password/**",
                "/auctions",
                "/auctions/*",
                "/products",
                "/products/*",
            ]
            .map(String::from)
            .to_vec(),
            public_endpoints: [
                "/api/auth/login",
                "/api/auth/register",
                "/api/auth/me",
                "/api/auctions",
                "/api/auctions/*",
                "/api/products/**",
            ]
            .map(String::from)
            .to_vec(),
            auth_routes: ["/login", "/register", "/forgot-password", "/reset-password/**"]
                .map(String::from)
                .to_vec(),
            exempt_session: false,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/bidwatch-test`
    /// 2. `BIDWATCH_CONFIG_DIR` env var: explicit override
    /// 3. `BIDWATCH_ENV=test`: `tmp/bidwatch-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/bidwatch)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/bidwatch-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(custom_dir) = std::env::var("BIDWATCH_CONFIG_DIR") {
                    PathBuf::from(custom_dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/bidwatch-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("bidwatch")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Directory holding the persisted notification namespaces.
    pub fn storage_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("storage"))
    }

    /// Loads configuration from file, with environment variable overrides.
    /// The session cookie comes from the env var or the session file.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file() {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config file: {:#}", e);
                Self::default()
            }
        };
        config.apply_env_overrides();

        if config.session_cookie.is_empty() {
            if let Some(cookie) = Self::load_session()? {
                config.session_cookie = cookie;
            }
        }

        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::config_dir()?.join("config.json");
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = serde_json::from_str(&content).context("Invalid config.json")?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("BIDWATCH_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(cookie) = std::env::var("BIDWATCH_SESSION") {
            self.session_cookie = cookie;
        }

        if let Ok(attempts) = std::env::var("BIDWATCH_RECONNECTION_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.reconnection_attempts = attempts;
            }
        }

        if let Ok(timeout) = std::env::var("BIDWATCH_CONNECT_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.connect_timeout_ms = timeout;
            }
        }

        if let Ok(exempt) = std::env::var("BIDWATCH_EXEMPT_SESSION") {
            self.exempt_session = matches!(exempt.as_str(), "1" | "true" | "yes");
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the session cookie is NOT saved here (use `save_session` for that).
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Set a single top-level key from a JSON (or bare string) value.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        let obj = json
            .as_object_mut()
            .context("config does not serialize to an object")?;
        if !obj.contains_key(key) {
            anyhow::bail!("Unknown config key '{}'", key);
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        obj.insert(key.to_string(), value);

        let mut updated: Self = serde_json::from_value(json)
            .with_context(|| format!("Invalid value for config key '{}'", key))?;
        updated.session_cookie = std::mem::take(&mut self.session_cookie);
        *self = updated;
        Ok(())
    }

    /// Look up a single top-level key as JSON.
    pub fn get_value(&self, key: &str) -> Result<serde_json::Value> {
        let json = serde_json::to_value(self)?;
        json.get(key)
            .cloned()
            .with_context(|| format!("Unknown config key '{}'", key))
    }

    fn session_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("session"))
    }

    fn load_session() -> Result<Option<String>> {
        let path = Self::session_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let cookie = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let cookie = cookie.trim().to_string();
        Ok((!cookie.is_empty()).then_some(cookie))
    }

    /// Save a new session cookie to the owner-only session file.
    pub fn save_session(&mut self, cookie: &str) -> Result<()> {
        self.session_cookie = cookie.to_string();
        let path = Self::session_path()?;
        fs::write(&path, cookie)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Forget the session cookie.
    pub fn clear_session(&mut self) -> Result<()> {
        self.session_cookie.clear();
        let path = Self::session_path()?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Check if a session credential is available.
    pub fn has_session(&self) -> bool {
        !self.session_cookie.is_empty()
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Initial reconnection delay.
    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    /// Retention window for read notifications. Saturates on absurd values.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// Background prune cadence.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Periodic identity check cadence.
    pub fn identity_check_interval(&self) -> Duration {
        Duration::from_secs(self.identity_check_interval_secs)
    }

    /// Redirect window.
    pub fn redirect_window(&self) -> Duration {
        Duration::from_millis(self.redirect_window_ms)
    }
}
