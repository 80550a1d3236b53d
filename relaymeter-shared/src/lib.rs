//! # Relaymeter Shared Library
//!
//! This crate contains the types and persistence operations shared across
//! the relaymeter control plane: database models with their SQL, the
//! connection pool, configuration loading, and the notification event
//! types and transports.
//!
//! ## Module Organization
//!
//! - `models`: Database models and their operations
//! - `db`: Connection pool and migration runner
//! - `config`: Environment-based configuration
//! - `error`: Store error types
//! - `notification`: Notification events, gating and dispatch

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notification;

/// Current version of the relaymeter shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
