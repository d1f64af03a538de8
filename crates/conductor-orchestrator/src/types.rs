use crate::graph::TaskGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Status of a task in the mission graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet assigned to an agent.
    Pending,
    /// Permanently parked: unassignable, or downstream of a failed task.
    Blocked,
    /// Assigned to an agent and waiting for its dependencies.
    Assigned,
    /// Dispatched to the completion service (or awaiting a blocking handoff).
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error. Never retried.
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal (`Completed` or `Failed`).
    /// `Blocked` is deliberately non-terminal: it marks abandoned work,
    /// which the engine classifies when the mission winds down.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One unit of work in the mission's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Description of the unit of work.
    pub description: String,
    /// Task ids that must reach `Completed` before this task is eligible.
    pub dependencies: Vec<Uuid>,
    /// Current status.
    pub status: TaskStatus,
    /// Capability tags used for agent matching.
    pub required_capabilities: BTreeSet<String>,
    /// Agent assigned by the delegator.
    pub assigned_agent: Option<Uuid>,
    /// Success payload, present only when `Completed`.
    pub result: Option<String>,
    /// Failure or blocked-reason annotation.
    pub error: Option<String>,
    /// Parent task id when this task was created by a handoff.
    #[serde(default)]
    pub parent_task: Option<Uuid>,
    /// Whether mission success structurally depends on this task.
    #[serde(default = "default_required")]
    pub required_for_success: bool,
    /// Creation time. Insertion order in the graph is authoritative for
    /// scheduling; this is informational.
    pub created_at: DateTime<Utc>,
    /// Completion time, set on reaching a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_required() -> bool {
    true
}

impl Task {
    /// Create a new pending task.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            required_capabilities: BTreeSet::new(),
            assigned_agent: None,
            result: None,
            error: None,
            parent_task: None,
            required_for_success: true,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the required capability tags.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the task as advisory: its failure does not fail the mission.
    pub fn advisory(mut self) -> Self {
        self.required_for_success = false;
        self
    }
}

/// Status of an agent as observed within one mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No task in flight.
    Idle,
    /// Selected for dispatch; the call has not left yet.
    Thinking,
    /// A completion call is in flight.
    Working,
    /// Waiting on an external condition (reserved for observers).
    Blocked,
    /// The most recent dispatch failed. Still schedulable.
    Failed,
}

/// Per-mission dynamic state of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// The agent this state belongs to.
    pub agent_id: Uuid,
    /// Current status.
    pub status: AgentStatus,
    /// The task the agent is working on, if any. Capacity is 1.
    pub current_task: Option<Uuid>,
    /// Advisory progress, 0–100. Never used for scheduling decisions.
    pub progress: u8,
}

impl AgentState {
    /// Create an idle state for the given agent.
    pub fn idle(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Idle,
            current_task: None,
            progress: 0,
        }
    }

    /// Whether the agent can take a dispatch this iteration.
    pub fn is_free(&self) -> bool {
        self.current_task.is_none()
    }
}

/// How many ready tasks a mission dispatches per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One task per iteration, in creation order.
    Sequential,
    /// The whole ready set, bounded by distinct idle agents.
    Parallel,
    /// Same dispatch rule as parallel; planning down-weights fan-out for
    /// low-complexity objectives.
    Hybrid,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
            Strategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Mission lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Created, planner not yet invoked.
    Idle,
    /// The planner call is in flight.
    Planning,
    /// Tasks are being matched to agents.
    Delegating,
    /// The execution loop is driving the graph.
    Executing,
    /// All required tasks completed.
    Completed,
    /// Terminal failure with a human-readable reason.
    Failed {
        /// Why the mission failed (taxonomy case in plain words).
        reason: String,
    },
    /// Cancellation observed at an iteration boundary.
    Cancelled,
}

impl MissionStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Completed | MissionStatus::Failed { .. } | MissionStatus::Cancelled
        )
    }
}

/// One end-to-end orchestration run for a single objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    /// Unique identifier.
    pub id: Uuid,
    /// The original objective text.
    pub objective: String,
    /// Dispatch strategy chosen at planning time.
    pub strategy: Strategy,
    /// The task graph, in creation order.
    pub tasks: TaskGraph,
    /// Lifecycle status.
    pub status: MissionStatus,
    /// Completed passes through the execution loop.
    pub iteration_count: u32,
    /// Bounded-loop safety valve.
    pub max_iterations: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the mission reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// Create a new idle mission for the given objective.
    pub fn new(objective: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            objective: objective.into(),
            strategy: Strategy::Hybrid,
            tasks: TaskGraph::new(),
            status: MissionStatus::Idle,
            iteration_count: 0,
            max_iterations,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Terminal summary of a mission, with partial results retained even on
/// failure or cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionReport {
    /// The mission this report describes.
    pub mission_id: Uuid,
    /// Terminal status.
    pub status: MissionStatus,
    /// Human-readable outcome summary.
    pub summary: String,
    /// Iterations the execution loop completed.
    pub iterations: u32,
    /// Total tasks in the final graph (including handoff tasks).
    pub total_tasks: usize,
    /// Tasks that completed.
    pub completed_tasks: usize,
    /// Tasks that failed.
    pub failed_tasks: usize,
    /// Tasks abandoned as blocked.
    pub blocked_tasks: usize,
    /// `(task_id, result)` for every completed task, in creation order.
    pub results: Vec<(Uuid, String)>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("summarize findings");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.required_for_success);
        assert!(task.dependencies.is_empty());
        assert!(task.assigned_agent.is_none());
    }

    #[test]
    fn test_task_builders() {
        let dep = Uuid::new_v4();
        let task = Task::new("draft report")
            .with_dependencies(vec![dep])
            .with_capabilities(["writing"])
            .advisory();
        assert_eq!(task.dependencies, vec![dep]);
        assert!(task.required_capabilities.contains("writing"));
        assert!(!task.required_for_success);
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_mission_status_terminal() {
        assert!(MissionStatus::Cancelled.is_terminal());
        assert!(MissionStatus::Failed { reason: "deadlock".into() }.is_terminal());
        assert!(!MissionStatus::Executing.is_terminal());
    }

    #[test]
    fn test_agent_state_free() {
        let mut state = AgentState::idle(Uuid::new_v4());
        assert!(state.is_free());
        state.current_task = Some(Uuid::new_v4());
        assert!(!state.is_free());
    }

    #[test]
    fn test_status_serialization() {
        let status = MissionStatus::Failed {
            reason: "iteration limit exceeded".into(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("iteration limit exceeded"));
        let parsed: MissionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Sequential.to_string(), "sequential");
        assert_eq!(Strategy::Hybrid.to_string(), "hybrid");
    }
}
