//! Reaction to 401 responses from authenticated calls.
//!
//! Two independent non-reentrant flags drive the guard:
//!
//! - `logging_out`: set on the first unexempted 401, cleared once the logout
//!   call resolves (either way) and the cached identity is purged. While set,
//!   further 401s start no new logout call.
//! - redirect window: set when a forced login redirect is issued, expires
//!   after `redirect_window`. While open, further 401s issue no redirect.
//!
//! Both are real synchronization primitives so the guard is sound on the
//! multi-threaded runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::time::Instant;

use super::state::SessionState;
use crate::config::Config;
use crate::error::SessionError;
use crate::navigation::Navigator;

/// Observable guard state. `LoggingOut` wins over `Redirecting` when both
/// hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionGuardState {
    /// Nothing in flight.
    Settled,
    /// A logout call is in flight.
    LoggingOut,
    /// A forced redirect happened within the redirect window.
    Redirecting,
}

/// What the guard did about the logout call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutDecision {
    /// Exempted session; nothing happened at all.
    Exempted,
    /// This 401 started the logout call.
    Started,
    /// A logout call was already in flight.
    AlreadyInFlight,
}

/// Decision taken for one 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOutcome {
    /// Logout handling.
    pub logout: LogoutDecision,
    /// Whether a login redirect was issued.
    pub redirected: bool,
}

impl GuardOutcome {
    /// Whether the 401 was swallowed because the session is exempt.
    pub fn is_exempted(&self) -> bool {
        self.logout == LogoutDecision::Exempted
    }
}

/// Server-side logout endpoint.
#[async_trait]
pub trait LogoutClient: Send + Sync + std::fmt::Debug {
    /// Invalidate the session server-side.
    async fn logout(&self) -> Result<(), SessionError>;
}

/// Glob allowlists for routes and endpoints.
#[derive(Debug, Clone)]
pub struct RouteRules {
    public_routes: GlobSet,
    public_endpoints: GlobSet,
    auth_routes: GlobSet,
}

impl RouteRules {
    /// Build from the configured patterns. Invalid patterns are logged and
    /// skipped.
    pub fn new(public_routes: &[String], public_endpoints: &[String], auth_routes: &[String]) -> Self {
        Self {
            public_routes: build_set("public_routes", public_routes),
            public_endpoints: build_set("public_endpoints", public_endpoints),
            auth_routes: build_set("auth_routes", auth_routes),
        }
    }

    /// Rules from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.public_routes,
            &config.public_endpoints,
            &config.auth_routes,
        )
    }

    /// Whether `route` never forces a login redirect.
    pub fn is_public_route(&self, route: &str) -> bool {
        self.public_routes.is_match(normalize(route))
    }

    /// Whether 401s from `request_url` never force a login redirect.
    pub fn is_public_endpoint(&self, request_url: &str) -> bool {
        self.public_endpoints.is_match(normalize(&request_path(request_url)))
    }

    /// Whether `route` is part of the sign-in flow.
    pub fn is_auth_route(&self, route: &str) -> bool {
        self.auth_routes.is_match(normalize(route))
    }
}

fn build_set(name: &str, patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("[SessionGuard] Invalid pattern in {}: '{}' - {}", name, pattern, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("[SessionGuard] Cannot build {} allowlist: {}", name, e);
        GlobSet::empty()
    })
}

/// Path part of an absolute or relative request URL.
fn request_path(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        return parsed.path().to_string();
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}

/// Drop a trailing slash (except on the root).
fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Decides what a 401 means for the session.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<SessionState>,
    rules: Arc<RouteRules>,
    logout_client: Arc<dyn LogoutClient>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    redirect_window: Duration,
    logging_out: Arc<AtomicBool>,
    redirect_until: Mutex<Option<Instant>>,
}

impl SessionGuard {
    /// Guard with explicit collaborators.
    pub fn new(
        session: Arc<SessionState>,
        rules: Arc<RouteRules>,
        logout_client: Arc<dyn LogoutClient>,
        navigator: Arc<dyn Navigator>,
        login_route: String,
        redirect_window: Duration,
    ) -> Self {
        Self {
            session,
            rules,
            logout_client,
            navigator,
            login_route,
            redirect_window,
            logging_out: Arc::new(AtomicBool::new(false)),
            redirect_until: Mutex::new(None),
        }
    }

    /// Route rules in use.
    pub fn rules(&self) -> &Arc<RouteRules> {
        &self.rules
    }

    /// Current state.
    pub fn state(&self) -> SessionGuardState {
        if self.logging_out.load(Ordering::Acquire) {
            SessionGuardState::LoggingOut
        } else if self.redirect_pending() {
            SessionGuardState::Redirecting
        } else {
            SessionGuardState::Settled
        }
    }

    fn redirect_pending(&self) -> bool {
        self.redirect_until
            .lock()
            .expect("redirect window lock poisoned")
            .is_some_and(|until| Instant::now() < until)
    }

    /// React to a 401 from `request_url` while the UI shows `current_path`.
    ///
    /// The logout call runs on a spawned task; the caller is never blocked.
    pub fn handle_unauthorized(&self, request_url: &str, current_path: &str) -> GuardOutcome {
        if self.session.is_exempt() {
            log::debug!(
                "[SessionGuard] 401 from {} swallowed: exempt session",
                request_url
            );
            return GuardOutcome {
                logout: LogoutDecision::Exempted,
                redirected: false,
            };
        }

        let logout = if self
            .logging_out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::warn!("[SessionGuard] 401 from {}; logging out", request_url);
            self.start_logout();
            LogoutDecision::Started
        } else {
            log::debug!(
                "[SessionGuard] 401 from {}; logout already in flight",
                request_url
            );
            LogoutDecision::AlreadyInFlight
        };

        GuardOutcome {
            logout,
            redirected: self.maybe_redirect(request_url, current_path),
        }
    }

    fn start_logout(&self) {
        let client = Arc::clone(&self.logout_client);
        let session = Arc::clone(&self.session);
        let flag = Arc::clone(&self.logging_out);
        let task = async move {
            if let Err(e) = client.logout().await {
                log::warn!("[SessionGuard] Logout call failed, cleaning up anyway: {}", e);
            }
            session.purge();
            flag.store(false, Ordering::Release);
            log::info!("[SessionGuard] Logged out");
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => {
                log::error!("[SessionGuard] No async runtime; purging identity without logout call");
                self.session.purge();
                self.logging_out.store(false, Ordering::Release);
            }
        }
    }

    fn maybe_redirect(&self, request_url: &str, current_path: &str) -> bool {
        if self.rules.is_public_route(current_path) {
            log::debug!("[SessionGuard] No redirect: {} is public", current_path);
            return false;
        }
        if self.rules.is_public_endpoint(request_url) {
            log::debug!("[SessionGuard] No redirect: {} is a public endpoint", request_url);
            return false;
        }
        {
            let mut until = self
                .redirect_until
                .lock()
                .expect("redirect window lock poisoned");
            let now = Instant::now();
            if until.is_some_and(|t| now < t) {
                log::debug!("[SessionGuard] No redirect: one is already pending");
                return false;
            }
            *until = Some(now + self.redirect_window);
        }
        log::info!("[SessionGuard] Redirecting {} -> {}", current_path, self.login_route);
        self.navigator.navigate(&self.login_route);
        true
    }
}
