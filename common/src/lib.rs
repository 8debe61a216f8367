//! Shared building blocks for the Cosmos query-session crates.
//!
//! Models, the error type, configuration loading, the HTTP response
//! envelope and query-text helpers live here so that `session-core` and
//! `session-service` agree on them.

pub mod config;
pub mod errors;
pub mod models;
pub mod response;
pub mod utils;
