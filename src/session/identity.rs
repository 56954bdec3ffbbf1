//! Periodic identity check and the redirect decision that follows it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::guard::RouteRules;
use super::state::{Identity, SessionState};
use crate::error::IdentityError;
use crate::navigation::Navigator;

/// Result of the most recent identity fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    /// Fetch in progress.
    Loading,
    /// The server knows the session.
    Authenticated(Identity),
    /// The fetch failed.
    Failed(IdentityError),
}

/// Identity-check endpoint.
#[async_trait]
pub trait IdentitySource: Send + Sync + std::fmt::Debug {
    /// Current user, or why it could not be determined.
    async fn fetch_identity(&self) -> Result<Identity, IdentityError>;
}

/// Decides whether a failed identity check forces a login redirect.
///
/// At most one redirect is attempted per route; the attempt is forgotten as
/// soon as the route changes.
#[derive(Debug)]
pub struct IdentityRedirectGuard {
    rules: Arc<RouteRules>,
    session: Arc<SessionState>,
    attempted_for: Option<String>,
}

impl IdentityRedirectGuard {
    /// New guard.
    pub fn new(rules: Arc<RouteRules>, session: Arc<SessionState>) -> Self {
        Self {
            rules,
            session,
            attempted_for: None,
        }
    }

    /// Returns `true` when the caller should navigate to the login surface.
    pub fn evaluate(&mut self, check: &IdentityCheck, route: &str) -> bool {
        if self.attempted_for.as_deref().is_some_and(|r| r != route) {
            self.attempted_for = None;
        }

        let unauthenticated = match check {
            IdentityCheck::Loading | IdentityCheck::Authenticated(_) => false,
            IdentityCheck::Failed(IdentityError::Unauthenticated) => true,
            IdentityCheck::Failed(IdentityError::Unavailable(reason)) => {
                log::debug!("[IdentityGuard] Identity unavailable ({}), not redirecting", reason);
                false
            }
        };
        if !unauthenticated
            || self.session.is_exempt()
            || self.rules.is_auth_route(route)
            || self.attempted_for.is_some()
        {
            return false;
        }

        self.attempted_for = Some(route.to_string());
        true
    }
}

/// Handle of the periodic identity check; stops when dropped.
#[derive(Debug)]
pub struct IdentityMonitor {
    task: JoinHandle<()>,
}

impl Drop for IdentityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Check identity every `interval` (first check immediately), update the
/// cached identity, and redirect to `login_route` when the guard says so.
///
/// An exempt session keeps its cached identity across 401s.
pub fn spawn_identity_monitor(
    source: Arc<dyn IdentitySource>,
    session: Arc<SessionState>,
    rules: Arc<RouteRules>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    interval: Duration,
) -> IdentityMonitor {
    let task = tokio::spawn(async move {
        let mut guard = IdentityRedirectGuard::new(rules, Arc::clone(&session));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let check = match source.fetch_identity().await {
                Ok(identity) => IdentityCheck::Authenticated(identity),
                Err(e) => IdentityCheck::Failed(e),
            };
            match &check {
                IdentityCheck::Authenticated(identity) => {
                    log::debug!("[IdentityGuard] Signed in as {}", identity.id);
                    session.set_identity(Some(identity.clone()));
                }
                IdentityCheck::Failed(IdentityError::Unauthenticated) if !session.is_exempt() => {
                    if session.identity().is_some() {
                        log::info!("[IdentityGuard] Session no longer valid");
                    }
                    session.purge();
                }
                _ => {}
            }

            let route = navigator.current_route();
            if guard.evaluate(&check, &route) {
                log::info!("[IdentityGuard] Redirecting {} -> {}", route, login_route);
                navigator.navigate(&login_route);
            }
        }
    });
    IdentityMonitor { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::navigation::RouteTracker;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn guard(exempt: bool) -> IdentityRedirectGuard {
        IdentityRedirectGuard::new(
            Arc::new(RouteRules::from_config(&Config::default())),
            Arc::new(SessionState::new(exempt)),
        )
    }

    const UNAUTH: IdentityCheck = IdentityCheck::Failed(IdentityError::Unauthenticated);

    #[test]
    fn test_redirects_once_per_route() {
        let mut g = guard(false);
        assert!(g.evaluate(&UNAUTH, "/orders"));
        assert!(!g.evaluate(&UNAUTH, "/orders"));
        assert!(g.evaluate(&UNAUTH, "/profile"));
        assert!(g.evaluate(&UNAUTH, "/orders"));
    }

    #[test]
    fn test_never_redirects_while_loading_or_authenticated() {
        let mut g = guard(false);
        assert!(!g.evaluate(&IdentityCheck::Loading, "/orders"));
        let ok = IdentityCheck::Authenticated(Identity {
            id: "u".into(),
            name: String::new(),
            email: None,
        });
        assert!(!g.evaluate(&ok, "/orders"));
    }

    #[test]
    fn test_unavailable_is_not_unauthenticated() {
        let mut g = guard(false);
        let down = IdentityCheck::Failed(IdentityError::Unavailable("503".into()));
        assert!(!g.evaluate(&down, "/orders"));
        assert!(g.evaluate(&UNAUTH, "/orders"));
    }

    #[test]
    fn test_auth_routes_and_exempt_sessions_never_redirect() {
        let mut g = guard(false);
        assert!(!g.evaluate(&UNAUTH, "/login"));
        assert!(!g.evaluate(&UNAUTH, "/reset-password/token"));
        let mut exempt = guard(true);
        assert!(!exempt.evaluate(&UNAUTH, "/orders"));
    }

    #[derive(Debug)]
    struct Scripted(Mutex<VecDeque<Result<Identity, IdentityError>>>);

    #[async_trait]
    impl IdentitySource for Scripted {
        async fn fetch_identity(&self) -> Result<Identity, IdentityError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(IdentityError::Unavailable("script exhausted".into())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_tracks_identity_and_redirects() {
        let ana = Identity {
            id: "ana".into(),
            name: "Ana".into(),
            email: None,
        };
        let source = Arc::new(Scripted(Mutex::new(VecDeque::from([
            Ok(ana.clone()),
            Err(IdentityError::Unauthenticated),
            Err(IdentityError::Unauthenticated),
        ]))));
        let session = Arc::new(SessionState::default());
        let router = Arc::new(RouteTracker::new("/orders"));
        let _monitor = spawn_identity_monitor(
            source,
            Arc::clone(&session),
            Arc::new(RouteRules::from_config(&Config::default())),
            Arc::clone(&router) as Arc<dyn Navigator>,
            "/login".into(),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.identity(), Some(ana));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.identity(), None);
        assert_eq!(router.history(), vec!["/login"]);

        // on the login route itself nothing further happens
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(router.history(), vec!["/login"]);
    }
}
