use crate::graph::TaskGraph;
use crate::types::{AgentState, Strategy};
use std::collections::HashSet;
use uuid::Uuid;

/// Computes the ready set each iteration and decides how much of it to
/// dispatch, given the mission's strategy and agent availability.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    strategy: Strategy,
}

impl Scheduler {
    /// Create a scheduler for the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    /// Tasks eligible for dispatch: `Assigned`, every dependency `Completed`.
    /// Creation order.
    pub fn ready_set(&self, graph: &TaskGraph) -> Vec<Uuid> {
        graph.ready_ids()
    }

    /// Select the subset of the ready set to dispatch this iteration.
    ///
    /// Sequential: the first ready task whose agent is free. Parallel and
    /// hybrid: every ready task whose agent is free, at most one task per
    /// agent — a task whose agent is busy is skipped this iteration, never
    /// reassigned.
    pub fn select(&self, graph: &TaskGraph, agent_states: &[AgentState]) -> Vec<Uuid> {
        let free: HashSet<Uuid> = agent_states
            .iter()
            .filter(|s| s.is_free())
            .map(|s| s.agent_id)
            .collect();

        let mut claimed: HashSet<Uuid> = HashSet::new();
        let mut selected = Vec::new();

        for id in self.ready_set(graph) {
            let Some(agent) = graph.get(id).and_then(|t| t.assigned_agent) else {
                continue;
            };
            if free.contains(&agent) && claimed.insert(agent) {
                selected.push(id);
                if self.strategy == Strategy::Sequential {
                    break;
                }
            }
        }
        selected
    }

    /// The mission cannot progress: nothing ready, nothing running, and
    /// non-terminal tasks remain.
    pub fn is_deadlocked(&self, graph: &TaskGraph) -> bool {
        self.ready_set(graph).is_empty() && !graph.any_running() && !graph.all_terminal()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Task, TaskStatus};

    fn setup() -> (TaskGraph, Vec<AgentState>, Vec<Uuid>) {
        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();

        let mut graph = TaskGraph::new();
        for (desc, agent) in [("one", agent_a), ("two", agent_b), ("three", agent_a)] {
            let mut task = Task::new(desc);
            task.status = TaskStatus::Assigned;
            task.assigned_agent = Some(agent);
            graph.insert(task);
        }

        let states = vec![AgentState::idle(agent_a), AgentState::idle(agent_b)];
        (graph, states, vec![agent_a, agent_b])
    }

    #[test]
    fn test_sequential_selects_exactly_one() {
        let (graph, states, _) = setup();
        let scheduler = Scheduler::new(Strategy::Sequential);
        let selected = scheduler.select(&graph, &states);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0], graph.iter().next().unwrap().id);
    }

    #[test]
    fn test_parallel_selects_one_task_per_free_agent() {
        let (graph, states, _) = setup();
        let scheduler = Scheduler::new(Strategy::Parallel);
        let selected = scheduler.select(&graph, &states);
        // Three ready tasks over two agents: the third shares an agent with
        // the first and waits for the next iteration.
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_busy_agent_is_skipped_not_reassigned() {
        let (graph, mut states, agents) = setup();
        states[0].current_task = Some(Uuid::new_v4());

        let scheduler = Scheduler::new(Strategy::Parallel);
        let selected = scheduler.select(&graph, &states);
        assert_eq!(selected.len(), 1);
        let chosen_agent = graph.get(selected[0]).unwrap().assigned_agent.unwrap();
        assert_eq!(chosen_agent, agents[1]);
    }

    #[test]
    fn test_ready_set_respects_dependencies() {
        let agent = Uuid::new_v4();
        let mut graph = TaskGraph::new();
        let mut root = Task::new("root");
        root.status = TaskStatus::Assigned;
        root.assigned_agent = Some(agent);
        let root_id = graph.insert(root);

        let mut child = Task::new("child");
        child.status = TaskStatus::Assigned;
        child.assigned_agent = Some(agent);
        child.dependencies = vec![root_id];
        graph.insert(child);

        let scheduler = Scheduler::new(Strategy::Parallel);
        assert_eq!(scheduler.ready_set(&graph), vec![root_id]);
    }

    #[test]
    fn test_deadlock_detection() {
        let scheduler = Scheduler::new(Strategy::Parallel);

        // A single permanently blocked task: nothing ready, nothing running,
        // not all terminal.
        let mut graph = TaskGraph::new();
        let mut task = Task::new("unassignable");
        task.status = TaskStatus::Blocked;
        graph.insert(task);
        assert!(scheduler.is_deadlocked(&graph));

        // A running task means progress is still possible.
        let mut graph = TaskGraph::new();
        let mut task = Task::new("in flight");
        task.status = TaskStatus::Running;
        graph.insert(task);
        assert!(!scheduler.is_deadlocked(&graph));

        // All terminal is completion, not deadlock.
        let mut graph = TaskGraph::new();
        let mut task = Task::new("done");
        task.status = TaskStatus::Completed;
        graph.insert(task);
        assert!(!scheduler.is_deadlocked(&graph));
    }
}
