use crate::types::{Task, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The mission's task graph: an insertion-ordered collection with dependency
/// resolution.
///
/// Insertion order is creation order and is the deterministic dispatch order
/// for the scheduler. The graph itself carries no notion of agents or
/// strategies; it only answers structural questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<Task>", into = "Vec<Task>")]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<Uuid, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a task, preserving creation order. Returns its id.
    pub fn insert(&mut self, task: Task) -> Uuid {
        let id = task.id;
        self.index.insert(id, self.tasks.len());
        self.tasks.push(task);
        id
    }

    /// Look up a task by id.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.index.get(&id).map(|&i| &mut self.tasks[i])
    }

    /// Iterate tasks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count tasks in the given status.
    pub fn count_status(&self, status: &TaskStatus) -> usize {
        self.tasks.iter().filter(|t| &t.status == status).count()
    }

    /// Ids of tasks eligible for dispatch: `Assigned` with every dependency
    /// `Completed`. Creation order.
    pub fn ready_ids(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Assigned
                    && t.dependencies.iter().all(|dep| {
                        self.get(*dep)
                            .is_some_and(|d| d.status == TaskStatus::Completed)
                    })
            })
            .map(|t| t.id)
            .collect()
    }

    /// Whether every task is terminal (`Completed` or `Failed`).
    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Whether any task is currently `Running`.
    pub fn any_running(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Running)
    }

    /// Whether the dependency relation contains a cycle.
    pub fn has_cycle(&self) -> bool {
        let mut visited: HashMap<Uuid, u8> = HashMap::new();
        for &id in self.index.keys() {
            if self.dfs_cycle(id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(&self, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.get(id) {
            for dep in &task.dependencies {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Permanently park every `Pending`/`Assigned` task that directly or
    /// transitively depends on `failed_id`. Returns the affected ids in the
    /// order they were blocked.
    ///
    /// Running and terminal tasks are left alone; a running parent awaiting a
    /// failed handoff child is finalized by the engine, not here.
    pub fn block_dependents(&mut self, failed_id: Uuid) -> Vec<Uuid> {
        let mut blocked = Vec::new();
        let mut frontier = vec![failed_id];
        while let Some(current) = frontier.pop() {
            let dependents: Vec<Uuid> = self
                .tasks
                .iter()
                .filter(|t| {
                    t.dependencies.contains(&current)
                        && matches!(t.status, TaskStatus::Pending | TaskStatus::Assigned)
                })
                .map(|t| t.id)
                .collect();
            for id in dependents {
                if let Some(task) = self.get_mut(id) {
                    task.status = TaskStatus::Blocked;
                    task.error = Some(format!("blocked by failed dependency {current}"));
                    task.completed_at = Some(Utc::now());
                    blocked.push(id);
                    frontier.push(id);
                }
            }
        }
        blocked
    }

    /// Whether the task transitively depends on a `Failed` task.
    pub fn failure_blocked(&self, id: Uuid) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };
        task.dependencies.iter().any(|&dep| {
            self.get(dep)
                .is_some_and(|d| d.status == TaskStatus::Failed)
                || self.failure_blocked(dep)
        })
    }

    /// `(task_id, result)` for every completed task, creation order.
    pub fn completed_results(&self) -> Vec<(Uuid, String)> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.result.clone().map(|r| (t.id, r)))
            .collect()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Task>> for TaskGraph {
    fn from(tasks: Vec<Task>) -> Self {
        let mut graph = TaskGraph::new();
        for task in tasks {
            graph.insert(task);
        }
        graph
    }
}

impl From<TaskGraph> for Vec<Task> {
    fn from(graph: TaskGraph) -> Self {
        graph.tasks
    }
}
