//! Application-wide constants for bidwatch.
//!
//! Defaults for the values that [`crate::config::Config`] can override,
//! plus the fixed protocol and storage names.

use std::time::Duration;

// ============================================================================
// Push channel
// ============================================================================

/// Reconnection attempts after a lost or failed handshake before the
/// transport settles into `Error`.
pub const RECONNECTION_ATTEMPTS: u32 = 3;

/// Upper bound for one handshake (WebSocket upgrade + Engine.IO open +
/// namespace connect).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// First reconnection delay; doubles per attempt.
pub const RECONNECTION_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the doubling reconnection delay.
pub const MAX_RECONNECTION_DELAY: Duration = Duration::from_secs(5);

/// Default Socket.IO endpoint path.
pub const SOCKET_PATH: &str = "/socket.io/";

/// Buffered inbound events per live link before backpressure.
pub const LINK_BUFFER: usize = 256;

// ============================================================================
// Notifications
// ============================================================================

/// Read notifications older than this are pruned.
pub const NOTIFICATION_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Cadence of the background pruner.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Storage key prefix for per-user notification namespaces.
pub const NOTIFICATIONS_KEY_PREFIX: &str = "notifications:";

/// Unscoped key written by older clients.
pub const LEGACY_NOTIFICATIONS_KEY: &str = "notifications";

/// Marker key holding the applied notification schema version.
pub const MIGRATION_MARKER_KEY: &str = "migrations:notifications";

/// Capacity of the live-update broadcast channel.
pub const LIVE_UPDATE_CAPACITY: usize = 64;

// ============================================================================
// Session
// ============================================================================

/// HTTP client request timeout for the REST collaborators.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a forced redirect blocks further redirects.
pub const REDIRECT_WINDOW: Duration = Duration::from_secs(1);

/// Cadence of the periodic identity check.
pub const IDENTITY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Login surface.
pub const LOGIN_ROUTE: &str = "/login";

/// Identity-check endpoint (returns the current user or 401).
pub const IDENTITY_ENDPOINT: &str = "/api/auth/me";

/// Logout endpoint.
pub const LOGOUT_ENDPOINT: &str = "/api/auth/logout";

/// Session cookie name carried on every request and on the WebSocket upgrade.
pub const SESSION_COOKIE_NAME: &str = "session";
