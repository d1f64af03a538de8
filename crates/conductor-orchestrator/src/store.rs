use crate::types::{AgentState, AgentStatus, Mission, MissionStatus, Strategy, Task, TaskStatus};
use chrono::Utc;
use conductor_agent::AgentSpec;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// One event per applied state transition, delivered to observers in the
/// order transitions were applied within a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateEvent {
    /// The mission moved to a new lifecycle status.
    MissionStatusChanged {
        /// Mission the transition belongs to.
        mission_id: Uuid,
        /// The new status.
        status: MissionStatus,
    },
    /// A task moved to a new status.
    TaskStatusChanged {
        /// Mission the task belongs to.
        mission_id: Uuid,
        /// The task that changed.
        task_id: Uuid,
        /// The new status.
        status: TaskStatus,
    },
    /// An agent's per-mission state changed.
    AgentStatusChanged {
        /// Mission the state belongs to.
        mission_id: Uuid,
        /// The agent that changed.
        agent_id: Uuid,
        /// The new status.
        status: AgentStatus,
    },
    /// A handoff inserted a new task into the graph.
    HandoffOccurred {
        /// Mission the handoff belongs to.
        mission_id: Uuid,
        /// The originating task.
        parent_task_id: Uuid,
        /// The newly created task.
        new_task_id: Uuid,
    },
}

/// The authoritative holder of mission, task, and agent-assignment state.
///
/// This is an explicit port: the execution loop only ever talks to this
/// trait, so the in-memory backend can be swapped for a durable one without
/// touching the loop. Each mission is owned by exactly one execution loop;
/// the store serializes nothing across missions beyond its own locking.
pub trait MissionStateStore: Send + Sync {
    /// Insert a new mission. Returns its id.
    fn create(&self, mission: Mission) -> Uuid;
    /// Clone the current mission state.
    fn snapshot(&self, mission_id: Uuid) -> Option<Mission>;
    /// Apply a mission status transition. Terminal states are absorbing:
    /// returns false (and emits nothing) once the mission is terminal.
    fn set_mission_status(&self, mission_id: Uuid, status: MissionStatus) -> bool;
    /// Record the planner's output: the task graph and the strategy.
    fn install_plan(&self, mission_id: Uuid, tasks: Vec<Task>, strategy: Strategy) -> bool;
    /// Increment the iteration counter, returning the new count.
    fn bump_iteration(&self, mission_id: Uuid) -> Option<u32>;

    /// Insert a task (handoff path). Emits its current status.
    fn insert_task(&self, mission_id: Uuid, task: Task) -> bool;
    /// Add a dependency edge: `task_id` depends on `dep_id`.
    fn add_dependency(&self, mission_id: Uuid, task_id: Uuid, dep_id: Uuid) -> bool;
    /// `Pending` → `Assigned` with the chosen agent.
    fn assign_task(&self, mission_id: Uuid, task_id: Uuid, agent_id: Uuid) -> bool;
    /// Park a task as `Blocked` with a reason annotation.
    fn block_task(&self, mission_id: Uuid, task_id: Uuid, reason: String) -> bool;
    /// `Assigned` → `Running`.
    fn start_task(&self, mission_id: Uuid, task_id: Uuid) -> bool;
    /// `Running` → `Completed`, storing the result payload.
    fn complete_task(&self, mission_id: Uuid, task_id: Uuid, result: String) -> bool;
    /// → `Failed`, storing the failure reason.
    fn fail_task(&self, mission_id: Uuid, task_id: Uuid, error: String) -> bool;
    /// Transitively park dependents of a failed task. Returns affected ids.
    fn block_dependents(&self, mission_id: Uuid, failed_id: Uuid) -> Vec<Uuid>;

    /// Initialize per-mission agent state from a registry snapshot.
    fn init_agents(&self, mission_id: Uuid, agents: &[AgentSpec]) -> bool;
    /// Update one agent's per-mission state.
    fn set_agent(
        &self,
        mission_id: Uuid,
        agent_id: Uuid,
        status: AgentStatus,
        current_task: Option<Uuid>,
        progress: u8,
    ) -> bool;
    /// Snapshot of all per-mission agent states, registry order.
    fn agent_states(&self, mission_id: Uuid) -> Vec<AgentState>;

    /// Record a handoff insertion (observer notification).
    fn record_handoff(&self, mission_id: Uuid, parent_task_id: Uuid, new_task_id: Uuid);

    /// Set the cancellation flag. Idempotent; no effect once the mission is
    /// terminal. Returns whether the flag is set after the call.
    fn cancel(&self, mission_id: Uuid) -> bool;
    /// Whether cancellation has been requested.
    fn is_cancelled(&self, mission_id: Uuid) -> bool;

    /// Subscribe to state transition events.
    fn subscribe(&self) -> broadcast::Receiver<StateEvent>;
}

struct MissionRecord {
    mission: Mission,
    agents: Vec<AgentState>,
    cancelled: bool,
}

/// In-memory mission state store.
///
/// Keeps all state in process memory, matching the source system: a process
/// restart loses in-flight missions. The [`MissionStateStore`] trait is the
/// seam for a durable backend.
pub struct InMemoryStore {
    inner: RwLock<HashMap<Uuid, MissionRecord>>,
    events: broadcast::Sender<StateEvent>,
}

impl InMemoryStore {
    /// Create a store whose event channel buffers `event_buffer` events.
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer);
        Self {
            inner: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: StateEvent) {
        // No receivers is fine; events are fire-and-forget for observers.
        let _ = self.events.send(event);
    }

    fn with_record<R>(
        &self,
        mission_id: Uuid,
        f: impl FnOnce(&mut MissionRecord) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write();
        inner.get_mut(&mission_id).map(f)
    }

    fn task_transition(
        &self,
        mission_id: Uuid,
        task_id: Uuid,
        f: impl FnOnce(&mut Task) -> bool,
    ) -> bool {
        let status = self.with_record(mission_id, |record| {
            let task = record.mission.tasks.get_mut(task_id)?;
            f(task).then(|| task.status.clone())
        });
        match status.flatten() {
            Some(status) => {
                self.emit(StateEvent::TaskStatusChanged {
                    mission_id,
                    task_id,
                    status,
                });
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MissionStateStore for InMemoryStore {
    fn create(&self, mission: Mission) -> Uuid {
        let id = mission.id;
        let status = mission.status.clone();
        self.inner.write().insert(
            id,
            MissionRecord {
                mission,
                agents: Vec::new(),
                cancelled: false,
            },
        );
        self.emit(StateEvent::MissionStatusChanged {
            mission_id: id,
            status,
        });
        id
    }

    fn snapshot(&self, mission_id: Uuid) -> Option<Mission> {
        self.inner.read().get(&mission_id).map(|r| r.mission.clone())
    }

    fn set_mission_status(&self, mission_id: Uuid, status: MissionStatus) -> bool {
        let applied = self.with_record(mission_id, |record| {
            if record.mission.status.is_terminal() {
                return false;
            }
            record.mission.status = status.clone();
            if status.is_terminal() {
                record.mission.completed_at = Some(Utc::now());
            }
            true
        });
        if applied == Some(true) {
            debug!(%mission_id, ?status, "Mission status changed");
            self.emit(StateEvent::MissionStatusChanged { mission_id, status });
            true
        } else {
            false
        }
    }

    fn install_plan(&self, mission_id: Uuid, tasks: Vec<Task>, strategy: Strategy) -> bool {
        let inserted = self.with_record(mission_id, |record| {
            record.mission.strategy = strategy;
            let mut ids = Vec::with_capacity(tasks.len());
            for task in tasks {
                let status = task.status.clone();
                ids.push((record.mission.tasks.insert(task), status));
            }
            ids
        });
        match inserted {
            Some(ids) => {
                for (task_id, status) in ids {
                    self.emit(StateEvent::TaskStatusChanged {
                        mission_id,
                        task_id,
                        status,
                    });
                }
                true
            }
            None => false,
        }
    }

    fn bump_iteration(&self, mission_id: Uuid) -> Option<u32> {
        self.with_record(mission_id, |record| {
            record.mission.iteration_count += 1;
            record.mission.iteration_count
        })
    }

    fn insert_task(&self, mission_id: Uuid, task: Task) -> bool {
        let task_id = task.id;
        let status = task.status.clone();
        let inserted = self.with_record(mission_id, |record| {
            record.mission.tasks.insert(task);
        });
        if inserted.is_some() {
            self.emit(StateEvent::TaskStatusChanged {
                mission_id,
                task_id,
                status,
            });
            true
        } else {
            false
        }
    }

    fn add_dependency(&self, mission_id: Uuid, task_id: Uuid, dep_id: Uuid) -> bool {
        self.with_record(mission_id, |record| {
            match record.mission.tasks.get_mut(task_id) {
                Some(task) => {
                    task.dependencies.push(dep_id);
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
    }

    fn assign_task(&self, mission_id: Uuid, task_id: Uuid, agent_id: Uuid) -> bool {
        self.task_transition(mission_id, task_id, |task| {
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Assigned;
            task.assigned_agent = Some(agent_id);
            true
        })
    }

    fn block_task(&self, mission_id: Uuid, task_id: Uuid, reason: String) -> bool {
        self.task_transition(mission_id, task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Blocked;
            task.error = Some(reason);
            true
        })
    }

    fn start_task(&self, mission_id: Uuid, task_id: Uuid) -> bool {
        self.task_transition(mission_id, task_id, |task| {
            if task.status != TaskStatus::Assigned {
                return false;
            }
            task.status = TaskStatus::Running;
            true
        })
    }

    fn complete_task(&self, mission_id: Uuid, task_id: Uuid, result: String) -> bool {
        self.task_transition(mission_id, task_id, |task| {
            if task.status != TaskStatus::Running {
                return false;
            }
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.completed_at = Some(Utc::now());
            true
        })
    }

    fn fail_task(&self, mission_id: Uuid, task_id: Uuid, error: String) -> bool {
        self.task_transition(mission_id, task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
            true
        })
    }

    fn block_dependents(&self, mission_id: Uuid, failed_id: Uuid) -> Vec<Uuid> {
        let blocked = self
            .with_record(mission_id, |record| {
                record.mission.tasks.block_dependents(failed_id)
            })
            .unwrap_or_default();
        for &task_id in &blocked {
            self.emit(StateEvent::TaskStatusChanged {
                mission_id,
                task_id,
                status: TaskStatus::Blocked,
            });
        }
        blocked
    }

    fn init_agents(&self, mission_id: Uuid, agents: &[AgentSpec]) -> bool {
        self.with_record(mission_id, |record| {
            record.agents = agents.iter().map(|a| AgentState::idle(a.id)).collect();
        })
        .is_some()
    }

    fn set_agent(
        &self,
        mission_id: Uuid,
        agent_id: Uuid,
        status: AgentStatus,
        current_task: Option<Uuid>,
        progress: u8,
    ) -> bool {
        let applied = self.with_record(mission_id, |record| {
            match record.agents.iter_mut().find(|s| s.agent_id == agent_id) {
                Some(state) => {
                    state.status = status;
                    state.current_task = current_task;
                    state.progress = progress;
                    true
                }
                None => false,
            }
        });
        if applied == Some(true) {
            self.emit(StateEvent::AgentStatusChanged {
                mission_id,
                agent_id,
                status,
            });
            true
        } else {
            false
        }
    }

    fn agent_states(&self, mission_id: Uuid) -> Vec<AgentState> {
        self.inner
            .read()
            .get(&mission_id)
            .map(|r| r.agents.clone())
            .unwrap_or_default()
    }

    fn record_handoff(&self, mission_id: Uuid, parent_task_id: Uuid, new_task_id: Uuid) {
        self.emit(StateEvent::HandoffOccurred {
            mission_id,
            parent_task_id,
            new_task_id,
        });
    }

    fn cancel(&self, mission_id: Uuid) -> bool {
        self.with_record(mission_id, |record| {
            if record.mission.status.is_terminal() {
                return false;
            }
            record.cancelled = true;
            true
        })
        .unwrap_or(false)
    }

    fn is_cancelled(&self, mission_id: Uuid) -> bool {
        self.inner
            .read()
            .get(&mission_id)
            .is_some_and(|r| r.cancelled)
    }

    fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store_with_mission() -> (InMemoryStore, Uuid) {
        let store = InMemoryStore::default();
        let id = store.create(Mission::new("test objective", 100));
        (store, id)
    }

    #[test]
    fn test_create_and_snapshot() {
        let (store, id) = store_with_mission();
        let mission = store.snapshot(id).unwrap();
        assert_eq!(mission.objective, "test objective");
        assert_eq!(mission.status, MissionStatus::Idle);
    }

    #[test]
    fn test_terminal_status_is_absorbing() {
        let (store, id) = store_with_mission();
        assert!(store.set_mission_status(id, MissionStatus::Cancelled));
        assert!(!store.set_mission_status(id, MissionStatus::Completed));
        assert_eq!(store.snapshot(id).unwrap().status, MissionStatus::Cancelled);
        assert!(store.snapshot(id).unwrap().completed_at.is_some());
    }

    #[test]
    fn test_task_lifecycle_transitions() {
        let (store, id) = store_with_mission();
        let task = Task::new("work").with_capabilities(["x"]);
        let task_id = task.id;
        let agent_id = Uuid::new_v4();
        assert!(store.insert_task(id, task));

        assert!(store.assign_task(id, task_id, agent_id));
        assert!(!store.assign_task(id, task_id, agent_id)); // already assigned
        assert!(store.start_task(id, task_id));
        assert!(store.complete_task(id, task_id, "result".into()));
        assert!(!store.fail_task(id, task_id, "too late".into())); // terminal

        let mission = store.snapshot(id).unwrap();
        let task = mission.tasks.get(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("result"));
        assert_eq!(task.assigned_agent, Some(agent_id));
    }

    #[test]
    fn test_events_delivered_in_application_order() {
        let (store, id) = store_with_mission();
        let mut rx = store.subscribe();

        let task = Task::new("observed");
        let task_id = task.id;
        store.insert_task(id, task);
        store.assign_task(id, task_id, Uuid::new_v4());
        store.set_mission_status(id, MissionStatus::Executing);

        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::TaskStatusChanged {
                mission_id: id,
                task_id,
                status: TaskStatus::Pending
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::TaskStatusChanged {
                mission_id: id,
                task_id,
                status: TaskStatus::Assigned
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::MissionStatusChanged {
                mission_id: id,
                status: MissionStatus::Executing
            }
        );
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (store, id) = store_with_mission();
        assert!(store.cancel(id));
        assert!(store.cancel(id));
        assert!(store.is_cancelled(id));

        store.set_mission_status(id, MissionStatus::Cancelled);
        // No effect once terminal.
        assert!(!store.cancel(id));
    }

    #[test]
    fn test_cancel_unknown_mission() {
        let store = InMemoryStore::default();
        assert!(!store.cancel(Uuid::new_v4()));
        assert!(!store.is_cancelled(Uuid::new_v4()));
    }

    #[test]
    fn test_agent_state_tracking() {
        let (store, id) = store_with_mission();
        let agents = vec![AgentSpec::new("Ada", "researcher", ["research"])];
        assert!(store.init_agents(id, &agents));

        let task_id = Uuid::new_v4();
        assert!(store.set_agent(id, agents[0].id, AgentStatus::Working, Some(task_id), 50));

        let states = store.agent_states(id);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, AgentStatus::Working);
        assert_eq!(states[0].current_task, Some(task_id));
        assert!(!states[0].is_free());
    }

    #[test]
    fn test_install_plan_sets_strategy_and_emits() {
        let (store, id) = store_with_mission();
        let mut rx = store.subscribe();
        let tasks = vec![Task::new("a"), Task::new("b")];
        assert!(store.install_plan(id, tasks, Strategy::Parallel));

        let mission = store.snapshot(id).unwrap();
        assert_eq!(mission.strategy, Strategy::Parallel);
        assert_eq!(mission.tasks.len(), 2);
        assert!(matches!(
            rx.try_recv().unwrap(),
            StateEvent::TaskStatusChanged { .. }
        ));
    }

    #[test]
    fn test_block_dependents_emits_per_task() {
        let (store, id) = store_with_mission();
        let root = Task::new("root");
        let root_id = root.id;
        let child = Task::new("child").with_dependencies(vec![root_id]);
        let child_id = child.id;
        store.insert_task(id, root);
        store.insert_task(id, child);
        store.assign_task(id, child_id, Uuid::new_v4());

        store.fail_task(id, root_id, "boom".into());
        let mut rx = store.subscribe();
        let blocked = store.block_dependents(id, root_id);
        assert_eq!(blocked, vec![child_id]);
        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::TaskStatusChanged {
                mission_id: id,
                task_id: child_id,
                status: TaskStatus::Blocked
            }
        );
    }
}
