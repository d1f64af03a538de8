//! Core error definitions for the Conductor orchestration engine.
//!
//! This crate provides the foundational error type shared across all Conductor
//! crates. Domain types live next to the subsystems that own them; only the
//! error taxonomy is universal enough to sit here.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.

/// Top-level error type for the Conductor engine.
///
/// Each variant corresponds to a subsystem that can produce errors. Mission
/// outcomes that are ordinary terminal states (deadlock, iteration limit,
/// cancellation) are reported through the mission status, not through this
/// type — these variants cover failures that prevent a mission from being
/// driven at all.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// The planner produced or received a malformed task graph.
    #[error("Planning error: {0}")]
    Planning(String),

    /// An error from the mission engine or state store.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;
