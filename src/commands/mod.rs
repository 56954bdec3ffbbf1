//! CLI subcommand implementations for bidwatch.
//!
//! Commands are organized into submodules by domain:
//!
//! - [`listen`] - Long-running push-channel listener
//! - [`notifications`] - Inspect and maintain a user's persisted notifications
//! - [`session`] - Session credential management and status
//! - [`config`] - Show or set configuration values
//!
//! # Usage
//!
//! ```ignore
//! use bidwatch::commands;
//!
//! commands::notifications::list(&config, "user-42")?;
//! commands::session::save(&mut config, "cookie-value")?;
//! ```

pub mod config;
pub mod listen;
pub mod notifications;
pub mod session;
