//! Bidwatch - live auction notifications client.
//!
//! This crate keeps a signed-in client informed of server-pushed auction
//! events while keeping a per-user notification history consistent with the
//! current session.
//!
//! # Architecture
//!
//! - **Connection** - single push-channel transport with bounded reconnects
//! - **Binding** - stable listeners that always call the latest handler
//! - **Dispatcher** - normalizes push events into notifications and alerts
//! - **Notifications** - per-user persisted store with TTL pruning
//! - **Session** - 401 guard and identity-check guard
//! - **Client** - wires the above for one process
//!
//! # Modules
//!
//! - [`connection`] - Connection manager, transport, Socket.IO codec
//! - [`notifications`] - Notification model, storage, store
//! - [`session`] - Session guards and cached identity
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod api;
pub mod binding;
pub mod client;
pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod navigation;
pub mod notifications;
pub mod session;
pub mod ws;

pub mod config;
pub mod constants;
pub mod env;
pub mod error;
mod lenient;

// Re-export commonly used types
pub use client::{BidwatchClient, ClientParts};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::Dispatcher;
pub use notifications::{Notification, NotificationKind, NotificationStore};
pub use session::{SessionGuard, SessionState};
