//! Session consistency: what a 401 or a failed identity check means for the
//! signed-in user.
//!
//! - [`guard::SessionGuard`] handles 401s from authenticated calls
//!   (single in-flight logout, login redirect with a short window).
//! - [`identity`] runs the periodic identity check and its own redirect
//!   rules.
//! - [`state::SessionState`] caches the identity and the exemption flag for
//!   everyone else.

pub mod guard;
pub mod identity;
pub mod state;

pub use guard::{GuardOutcome, LogoutClient, LogoutDecision, RouteRules, SessionGuard, SessionGuardState};
pub use identity::{
    spawn_identity_monitor, IdentityCheck, IdentityMonitor, IdentityRedirectGuard, IdentitySource,
};
pub use state::{Identity, SessionState};
