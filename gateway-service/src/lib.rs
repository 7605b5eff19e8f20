//! gateway-service: token-gated metering proxy.
//!
//! Authenticates API tokens, counts each forwarded request against the
//! account's monthly included quota, reports overage units to the metered
//! billing provider, and forwards the request to the downstream automation
//! backend.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

pub use startup::{AppState, Application};
