#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Cirrus shared plumbing
//!
//! Configuration, database pool construction with embedded migrations, and
//! the notification outbox used by every service crate.

pub mod config;
pub mod db;
pub mod notify;

pub use config::Config;
pub use db::{create_pool, run_migrations};
pub use notify::{Notification, NotificationColor, Notifier};
