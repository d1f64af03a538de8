//! External boundaries of the Conductor engine: the completion service port
//! and the agent capability registry.
//!
//! The orchestrator never talks to a language model directly. It dispatches
//! work through the [`CompletionClient`] trait and picks workers out of an
//! [`AgentRegistry`] snapshot. Both boundaries are deliberately thin so that
//! production backends, fakes, and test doubles are interchangeable.
//!
//! # Main types
//!
//! - [`CompletionClient`] — Async port to the external completion service.
//! - [`CompletionResult`] / [`CompletionError`] — Boundary result taxonomy.
//! - [`AgentSpec`] — Static identity and capability set of one agent.
//! - [`AgentRegistry`] — Insertion-ordered lookup of available agents.

/// Completion service port and result types.
pub mod completion;
/// Agent capability registry.
pub mod registry;

pub use completion::{CompletionClient, CompletionContext, CompletionError, CompletionResult};
pub use registry::{AgentRegistry, AgentSpec};
