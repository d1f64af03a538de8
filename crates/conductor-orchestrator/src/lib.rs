//! Multi-agent mission orchestration: planning, delegation, scheduling, and
//! bounded execution.
//!
//! Takes one natural-language objective, decomposes it into a dependency
//! graph of tasks, assigns each task to the best-matching agent, and drives
//! execution through a bounded, cancellable, partially-concurrent control
//! loop — including mid-flight delegation between agents via handoffs.
//!
//! # Main types
//!
//! - [`MissionEngine`] — Top-level engine that plans, delegates, and executes.
//! - [`Planner`] — Objective → validated task graph, via the completion service.
//! - [`Scheduler`] — Ready-set computation and per-strategy dispatch selection.
//! - [`TaskGraph`] — Insertion-ordered dependency graph with cycle detection.
//! - [`MissionStateStore`] — Injectable state port with an observer channel.
//! - [`HandoffRequest`] — Runtime request to insert a new task into the graph.

/// Engine configuration.
pub mod config;
/// Agent assignment with load balancing.
pub mod delegator;
/// Mission engine and bounded execution loop.
pub mod engine;
/// Task dependency graph.
pub mod graph;
/// Mid-flight delegation between agents.
pub mod handoff;
/// Objective decomposition and plan validation.
pub mod planner;
/// Ready-set computation and dispatch selection.
pub mod scheduler;
/// Mission state store and observer events.
pub mod store;
/// Shared orchestration types (Mission, Task, AgentState, etc.).
pub mod types;

pub use config::EngineConfig;
pub use delegator::DelegationOutcome;
pub use engine::MissionEngine;
pub use graph::TaskGraph;
pub use handoff::HandoffRequest;
pub use planner::{Complexity, MissionPlan, Planner};
pub use scheduler::Scheduler;
pub use store::{InMemoryStore, MissionStateStore, StateEvent};
pub use types::{
    AgentState, AgentStatus, Mission, MissionReport, MissionStatus, Strategy, Task, TaskStatus,
};
