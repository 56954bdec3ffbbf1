//! The UI's router, as seen from this crate.
//!
//! The dispatcher navigates to auction details and the session guards force
//! navigation to the login surface; both only need the current route and a
//! way to change it.

use std::sync::Mutex;

/// Router seam.
pub trait Navigator: Send + Sync + std::fmt::Debug {
    /// Path of the route currently shown.
    fn current_route(&self) -> String;

    /// Navigate to `route`.
    fn navigate(&self, route: &str);
}

/// In-process router that tracks the current route and the navigation
/// history. Used by the CLI front-end, which has no real pages.
#[derive(Debug)]
pub struct RouteTracker {
    current: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl RouteTracker {
    /// Tracker starting at `initial`.
    pub fn new(initial: &str) -> Self {
        Self {
            current: Mutex::new(initial.to_string()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Record a user-initiated route change (not counted as a navigation).
    pub fn set_route(&self, route: &str) {
        *self.current.lock().expect("route lock poisoned") = route.to_string();
    }

    /// Every route passed to [`Navigator::navigate`], oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().expect("route lock poisoned").clone()
    }
}

impl Default for RouteTracker {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for RouteTracker {
    fn current_route(&self) -> String {
        self.current.lock().expect("route lock poisoned").clone()
    }

    fn navigate(&self, route: &str) {
        log::info!("[Navigator] -> {}", route);
        self.set_route(route);
        self.history
            .lock()
            .expect("route lock poisoned")
            .push(route.to_string());
    }
}

/// Route of an auction's detail page.
#[must_use]
pub fn auction_route(auction_id: &str) -> String {
    format!("/auctions/{auction_id}")
}
