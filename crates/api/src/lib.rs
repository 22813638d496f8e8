#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Cirrus API Server
//!
//! HTTP surface of the control panel's storage product: bucket lifecycle,
//! access keys, presigned URLs, and account balance endpoints. Session
//! authentication is handled by the fronting auth proxy; see
//! [`auth`] for the trusted identity headers.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
