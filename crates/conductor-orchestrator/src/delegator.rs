use crate::graph::TaskGraph;
use crate::types::{Task, TaskStatus};
use conductor_agent::AgentSpec;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome counters of a delegation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationOutcome {
    /// Tasks that received an agent.
    pub assigned: usize,
    /// Tasks parked as unassignable.
    pub blocked: usize,
}

/// Pick the best agent for one task: capabilities must be a superset of the
/// task's requirements; among candidates, prefer the fewest already-assigned
/// tasks (`load`), then the earliest in registry order.
pub fn candidate_for(
    task: &Task,
    agents: &[AgentSpec],
    load: &HashMap<Uuid, usize>,
) -> Option<Uuid> {
    agents
        .iter()
        .filter(|agent| agent.covers(&task.required_capabilities))
        .min_by_key(|agent| load.get(&agent.id).copied().unwrap_or(0))
        .map(|agent| agent.id)
}

/// Assign every `Pending` task in the graph to an agent.
///
/// Unassignable tasks are parked as `Blocked` with an annotation instead of
/// failing the mission; the execution loop surfaces them through deadlock
/// detection so the assignable subset can still make progress.
pub fn assign_all(graph: &mut TaskGraph, agents: &[AgentSpec]) -> DelegationOutcome {
    let mut load: HashMap<Uuid, usize> = HashMap::new();
    for task in graph.iter() {
        if let Some(agent) = task.assigned_agent {
            *load.entry(agent).or_insert(0) += 1;
        }
    }

    let pending: Vec<Uuid> = graph
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| t.id)
        .collect();

    let mut outcome = DelegationOutcome {
        assigned: 0,
        blocked: 0,
    };

    for id in pending {
        // Immutable pass to pick, mutable pass to record.
        let choice = graph
            .get(id)
            .and_then(|task| candidate_for(task, agents, &load));

        let Some(task) = graph.get_mut(id) else {
            continue;
        };
        match choice {
            Some(agent_id) => {
                task.status = TaskStatus::Assigned;
                task.assigned_agent = Some(agent_id);
                *load.entry(agent_id).or_insert(0) += 1;
                outcome.assigned += 1;
                debug!(task_id = %id, agent_id = %agent_id, "Delegator: assigned");
            }
            None => {
                task.status = TaskStatus::Blocked;
                task.error = Some(format!(
                    "unassignable: no agent covers capabilities {:?}",
                    task.required_capabilities
                ));
                outcome.blocked += 1;
                warn!(task_id = %id, "Delegator: no qualifying agent");
            }
        }
    }
    outcome
}
