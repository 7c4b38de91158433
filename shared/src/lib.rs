//! Shared data structures and utilities for the zubot core daemon
//!
//! This crate contains the domain model, configuration, and HTTP DTOs used
//! by the `core` daemon and, eventually, any external collaborator (control
//! API client, task body) that needs to agree on wire types without
//! depending on the daemon's internals.

pub mod api;
pub mod config;
pub mod defaults;
pub mod metrics;
pub mod model;
pub mod utils;

pub use config::DaemonConfig;
pub use model::{
    MisfirePolicy, RunOutcome, RunStatus, Schedule, ScheduleMode, TaskKind, TaskProfile,
};

/// Result type alias used throughout the shared crate and the core daemon.
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy shared by the store, gateway, and domain-type parsing.
///
/// This is deliberately narrow: it covers the validation/programmer-error
/// class from the error design (bad enum strings, schema violations caught
/// before they reach SQLite). Transient I/O and timeout/cancellation
/// outcomes are represented as data (`Run.error`, `GatewayResponse.error`),
/// not as this enum, since they are expected operating conditions rather
/// than exceptional ones.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
#[path = "tests/test_utils.rs"]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_messages_are_stable() {
        let err = CoreError::NotFound("task xyz".to_string());
        assert_eq!(err.to_string(), "not found: task xyz");
    }
}
