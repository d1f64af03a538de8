use crate::config::EngineConfig;
use crate::delegator::{self, DelegationOutcome};
use crate::graph::TaskGraph;
use crate::handoff::{extract_handoff, HandoffRequest};
use crate::planner::Planner;
use crate::scheduler::Scheduler;
use crate::store::MissionStateStore;
use crate::types::{AgentStatus, Mission, MissionReport, MissionStatus, Task, TaskStatus};
use conductor_agent::{AgentRegistry, AgentSpec, CompletionClient, CompletionContext};
use conductor_core::{ConductorError, ConductorResult};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const WORKER_PROMPT: &str = "\
You are one worker agent in a multi-agent orchestration engine. Execute the \
task below and respond with your result as text.

If you need another specialist to take over part of the work, include in your \
structured output a `handoff` object:
{
  \"description\": \"what the new task does\",
  \"required_capabilities\": [\"skill tags\"],
  \"blocks_original_completion\": true or false
}
Set blocks_original_completion to true only when your own task cannot be \
considered finished until the handed-off work is done.
";

/// Reason strings for mission-terminal failures.
mod reason {
    pub const DEADLOCK: &str = "deadlock";
    pub const ITERATION_LIMIT: &str = "iteration limit exceeded";
    pub const REQUIRED_FAILED: &str = "required task failed";
    pub const REQUIRED_BLOCKED: &str = "required task blocked by upstream failure";
}

/// The mission engine: plans an objective, delegates the resulting graph,
/// and drives the bounded execution loop to a terminal status.
///
/// One engine instance may run many missions; each `run` call owns its
/// mission's state exclusively. The capability registry is read-only for the
/// lifetime of every mission.
pub struct MissionEngine {
    store: Arc<dyn MissionStateStore>,
    registry: Arc<AgentRegistry>,
    client: Arc<dyn CompletionClient>,
    config: EngineConfig,
}

/// Result of one dispatched unit of work.
type DispatchResult = (
    Uuid,
    Uuid,
    Result<conductor_agent::CompletionResult, conductor_agent::CompletionError>,
);

impl MissionEngine {
    /// Create an engine over the given store, registry, and completion client.
    pub fn new(
        store: Arc<dyn MissionStateStore>,
        registry: Arc<AgentRegistry>,
        client: Arc<dyn CompletionClient>,
        config: EngineConfig,
    ) -> ConductorResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            registry,
            client,
            config,
        })
    }

    /// The state store, for subscribing to events and requesting cancellation.
    pub fn store(&self) -> &Arc<dyn MissionStateStore> {
        &self.store
    }

    /// Run one mission end to end: plan, delegate, execute.
    ///
    /// Planning and delegation failures terminate the mission before the
    /// execution loop starts; the returned report always retains the results
    /// of every completed task, whatever the terminal status.
    pub async fn run(&self, objective: &str) -> ConductorResult<MissionReport> {
        let mission_id = self
            .store
            .create(Mission::new(objective, self.config.max_iterations));
        info!(%mission_id, objective, "Mission created");

        // Plan
        self.store
            .set_mission_status(mission_id, MissionStatus::Planning);
        let planner = Planner::new(
            Arc::clone(&self.client),
            self.config.replan_on_invalid_graph,
        );
        let plan = match planner.plan(objective).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(%mission_id, error = %e, "Planning failed");
                return self.finish(mission_id, MissionStatus::Failed {
                    reason: e.to_string(),
                });
            }
        };
        self.store
            .install_plan(mission_id, plan.tasks, plan.strategy);

        // The planner validated acyclicity on its draft; re-check the
        // materialized graph before anything reaches the delegator.
        let mission = self.snapshot(mission_id)?;
        if mission.tasks.has_cycle() {
            return self.finish(mission_id, MissionStatus::Failed {
                reason: "dependency cycle detected in task graph".to_string(),
            });
        }

        // Delegate
        self.store
            .set_mission_status(mission_id, MissionStatus::Delegating);
        let agents = self.registry.list();
        if agents.is_empty() {
            return self.finish(mission_id, MissionStatus::Failed {
                reason: "delegation failed: no agents registered".to_string(),
            });
        }
        let outcome = self.delegate(mission_id, &agents)?;
        info!(
            %mission_id,
            assigned = outcome.assigned,
            blocked = outcome.blocked,
            "Delegation complete"
        );
        self.store.init_agents(mission_id, &agents);

        // Execute
        self.store
            .set_mission_status(mission_id, MissionStatus::Executing);
        let status = self.execute(mission_id, &agents).await?;
        info!(%mission_id, ?status, "Mission reached terminal status");
        self.report(mission_id, status)
    }

    /// Run the delegator on a snapshot and apply its decisions to the store,
    /// one observable transition per task.
    fn delegate(
        &self,
        mission_id: Uuid,
        agents: &[AgentSpec],
    ) -> ConductorResult<DelegationOutcome> {
        let mut graph = self.snapshot(mission_id)?.tasks;
        let outcome = delegator::assign_all(&mut graph, agents);
        for task in graph.iter() {
            match task.status {
                TaskStatus::Assigned => {
                    if let Some(agent_id) = task.assigned_agent {
                        self.store.assign_task(mission_id, task.id, agent_id);
                    }
                }
                TaskStatus::Blocked => {
                    let reason = task.error.clone().unwrap_or_else(|| "unassignable".into());
                    self.store.block_task(mission_id, task.id, reason);
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// The bounded control loop. One pass: cancellation check, limit check,
    /// ready-set computation, dispatch, joint await, result application,
    /// handoff processing, iteration increment. State transitions are
    /// strictly serialized by this loop; only the completion calls overlap.
    async fn execute(
        &self,
        mission_id: Uuid,
        agents: &[AgentSpec],
    ) -> ConductorResult<MissionStatus> {
        let agent_index: HashMap<Uuid, &AgentSpec> =
            agents.iter().map(|a| (a.id, a)).collect();
        // Parent results held back by a blocking handoff, keyed by child id.
        let mut awaiting_handoff: HashMap<Uuid, (Uuid, String)> = HashMap::new();

        loop {
            // (1) Cancellation wins over every other pending transition.
            if self.store.is_cancelled(mission_id) {
                info!(%mission_id, "Cancellation observed at iteration boundary");
                self.store
                    .set_mission_status(mission_id, MissionStatus::Cancelled);
                return Ok(MissionStatus::Cancelled);
            }

            let mission = self.snapshot(mission_id)?;

            // (2) Bounded-loop safety valve.
            if mission.iteration_count >= mission.max_iterations
                && !mission.tasks.all_terminal()
            {
                warn!(%mission_id, iterations = mission.iteration_count, "Iteration limit hit");
                return Ok(self.terminate(
                    mission_id,
                    MissionStatus::Failed {
                        reason: reason::ITERATION_LIMIT.to_string(),
                    },
                ));
            }

            // (3–5) Terminal classification: every task settled, or the
            // scheduler finds no progress possible.
            let scheduler = Scheduler::new(mission.strategy);
            if mission.tasks.all_terminal() || scheduler.is_deadlocked(&mission.tasks) {
                let status = classify_terminal(&mission.tasks);
                return Ok(self.terminate(mission_id, status));
            }

            // (6) Select and dispatch.
            let selected = scheduler.select(&mission.tasks, &self.store.agent_states(mission_id));
            if selected.is_empty() {
                // Ready tasks (or handoff-awaiting parents) exist but nothing
                // can be dispatched, and no dispatch is outstanding between
                // iterations. No pass can change that: report deadlock now
                // instead of burning iterations.
                return Ok(self.terminate(
                    mission_id,
                    MissionStatus::Failed {
                        reason: reason::DEADLOCK.to_string(),
                    },
                ));
            }

            let mut dispatches: FuturesUnordered<JoinHandle<DispatchResult>> =
                FuturesUnordered::new();
            for task_id in selected {
                let Some(task) = mission.tasks.get(task_id) else {
                    continue;
                };
                let Some(agent) = task.assigned_agent.and_then(|id| agent_index.get(&id)) else {
                    continue;
                };
                self.store.start_task(mission_id, task_id);
                self.store.set_agent(
                    mission_id,
                    agent.id,
                    AgentStatus::Thinking,
                    Some(task_id),
                    0,
                );
                info!(%mission_id, %task_id, agent = %agent.name, "Dispatching task");

                let prompt = format!("{WORKER_PROMPT}\nTask: {}", task.description);
                let context = CompletionContext::for_role(agent.role.clone())
                    .with_capabilities(agent.capabilities.clone());
                let client = Arc::clone(&self.client);
                let store = Arc::clone(&self.store);
                let agent_id = agent.id;
                dispatches.push(tokio::spawn(async move {
                    store.set_agent(mission_id, agent_id, AgentStatus::Working, Some(task_id), 10);
                    let result = client.complete(&prompt, &context).await;
                    (task_id, agent_id, result)
                }));
            }

            // (7–8) Await the whole iteration; apply results as they arrive.
            let mut handoffs: Vec<(Uuid, String, HandoffRequest)> = Vec::new();
            while let Some(joined) = dispatches.next().await {
                let (task_id, agent_id, result) = joined.map_err(|e| {
                    ConductorError::Orchestrator(format!("dispatched task panicked: {e}"))
                })?;
                match result {
                    Ok(completion) => {
                        if let Some(request) = extract_handoff(&completion) {
                            // Graph mutation is deferred to step 9; the agent
                            // itself is done either way.
                            handoffs.push((task_id, completion.text, request));
                        } else {
                            self.finalize(
                                mission_id,
                                task_id,
                                Ok(completion.text),
                                &mut awaiting_handoff,
                            );
                        }
                        self.store
                            .set_agent(mission_id, agent_id, AgentStatus::Idle, None, 100);
                    }
                    Err(e) => {
                        error!(%mission_id, %task_id, error = %e, "Task dispatch failed");
                        self.finalize(
                            mission_id,
                            task_id,
                            Err(e.to_string()),
                            &mut awaiting_handoff,
                        );
                        self.store
                            .set_agent(mission_id, agent_id, AgentStatus::Failed, None, 0);
                    }
                }
            }

            // (9) Handoffs mutate the graph before the iteration closes.
            for (parent_id, parent_text, request) in handoffs {
                self.apply_handoff(mission_id, parent_id, parent_text, request, &mut awaiting_handoff);
            }

            self.store.bump_iteration(mission_id);
        }
    }

    /// Insert a handoff task, re-delegate it among agents not at capacity,
    /// and wire the parent's completion according to the blocking flag.
    fn apply_handoff(
        &self,
        mission_id: Uuid,
        parent_id: Uuid,
        parent_text: String,
        request: HandoffRequest,
        awaiting_handoff: &mut HashMap<Uuid, (Uuid, String)>,
    ) {
        let mut child = Task::new(request.description)
            .with_capabilities(request.required_capabilities);
        child.parent_task = Some(parent_id);
        let child_id = child.id;

        let states = self.store.agent_states(mission_id);
        let available: Vec<AgentSpec> = self
            .registry
            .list()
            .into_iter()
            .filter(|a| {
                states
                    .iter()
                    .find(|s| s.agent_id == a.id)
                    .map_or(true, |s| s.is_free())
            })
            .collect();
        let load = self.current_load(mission_id);
        let choice = delegator::candidate_for(&child, &available, &load);

        self.store.insert_task(mission_id, child);
        info!(%mission_id, parent = %parent_id, child = %child_id, "Handoff task inserted");

        match choice {
            Some(agent_id) => {
                self.store.assign_task(mission_id, child_id, agent_id);
            }
            None => {
                self.store.block_task(
                    mission_id,
                    child_id,
                    "unassignable: no free agent covers the handoff capabilities".to_string(),
                );
            }
        }

        if request.blocks_original_completion {
            self.store.add_dependency(mission_id, parent_id, child_id);
            if choice.is_some() {
                // Parent stays Running; its result is released when the
                // child reaches a terminal status.
                awaiting_handoff.insert(child_id, (parent_id, parent_text));
            } else {
                // The child can never run, so the parent can never complete.
                self.finalize(
                    mission_id,
                    parent_id,
                    Err("handoff task is unassignable".to_string()),
                    awaiting_handoff,
                );
            }
        } else {
            self.finalize(mission_id, parent_id, Ok(parent_text), awaiting_handoff);
        }
        self.store.record_handoff(mission_id, parent_id, child_id);
    }

    /// Apply a terminal task transition, propagate blocking to dependents on
    /// failure, and release any parent whose blocking handoff this task was.
    fn finalize(
        &self,
        mission_id: Uuid,
        task_id: Uuid,
        outcome: Result<String, String>,
        awaiting_handoff: &mut HashMap<Uuid, (Uuid, String)>,
    ) {
        let failed = outcome.is_err();
        match outcome {
            Ok(text) => {
                self.store.complete_task(mission_id, task_id, text);
            }
            Err(reason) => {
                self.store.fail_task(mission_id, task_id, reason);
                self.store.block_dependents(mission_id, task_id);
            }
        }
        if let Some((parent_id, parent_text)) = awaiting_handoff.remove(&task_id) {
            let parent_outcome = if failed {
                Err(format!("handed-off task {task_id} failed"))
            } else {
                Ok(parent_text)
            };
            self.finalize(mission_id, parent_id, parent_outcome, awaiting_handoff);
        }
    }

    fn terminate(&self, mission_id: Uuid, status: MissionStatus) -> MissionStatus {
        self.store.set_mission_status(mission_id, status.clone());
        status
    }

    fn finish(
        &self,
        mission_id: Uuid,
        status: MissionStatus,
    ) -> ConductorResult<MissionReport> {
        let status = self.terminate(mission_id, status);
        self.report(mission_id, status)
    }

    fn snapshot(&self, mission_id: Uuid) -> ConductorResult<Mission> {
        self.store
            .snapshot(mission_id)
            .ok_or_else(|| ConductorError::Orchestrator(format!("mission {mission_id} not found")))
    }

    /// Assigned-or-running task count per agent, for handoff load balancing.
    fn current_load(&self, mission_id: Uuid) -> HashMap<Uuid, usize> {
        let mut load = HashMap::new();
        if let Some(mission) = self.store.snapshot(mission_id) {
            for task in mission.tasks.iter() {
                if matches!(task.status, TaskStatus::Assigned | TaskStatus::Running) {
                    if let Some(agent) = task.assigned_agent {
                        *load.entry(agent).or_insert(0) += 1;
                    }
                }
            }
        }
        load
    }

    /// Terminal summary with partial results, regardless of outcome.
    fn report(
        &self,
        mission_id: Uuid,
        status: MissionStatus,
    ) -> ConductorResult<MissionReport> {
        let mission = self.snapshot(mission_id)?;
        let completed = mission.tasks.count_status(&TaskStatus::Completed);
        let failed = mission.tasks.count_status(&TaskStatus::Failed);
        let blocked = mission.tasks.count_status(&TaskStatus::Blocked);
        let summary = format!(
            "{completed}/{} tasks completed, {failed} failed, {blocked} blocked",
            mission.tasks.len()
        );
        Ok(MissionReport {
            mission_id,
            status,
            summary,
            iterations: mission.iteration_count,
            total_tasks: mission.tasks.len(),
            completed_tasks: completed,
            failed_tasks: failed,
            blocked_tasks: blocked,
            results: mission.tasks.completed_results(),
        })
    }
}

/// Classify a graph that can no longer progress (nothing ready, nothing
/// running) into a terminal mission status.
fn classify_terminal(graph: &TaskGraph) -> MissionStatus {
    if graph.all_terminal() {
        let required_failed = graph
            .iter()
            .any(|t| t.status == TaskStatus::Failed && t.required_for_success);
        return if required_failed {
            MissionStatus::Failed {
                reason: reason::REQUIRED_FAILED.to_string(),
            }
        } else {
            MissionStatus::Completed
        };
    }

    // Non-terminal tasks remain. If every one of them was abandoned because
    // of an upstream failure, the mission is resolved and its outcome turns
    // on criticality; anything else is a deadlock.
    let leftovers: Vec<&Task> = graph.iter().filter(|t| !t.status.is_terminal()).collect();
    let all_failure_blocked = leftovers
        .iter()
        .all(|t| t.status == TaskStatus::Blocked && graph.failure_blocked(t.id));

    if all_failure_blocked {
        let required_impacted = graph
            .iter()
            .any(|t| t.status == TaskStatus::Failed && t.required_for_success)
            || leftovers.iter().any(|t| t.required_for_success);
        if required_impacted {
            MissionStatus::Failed {
                reason: reason::REQUIRED_BLOCKED.to_string(),
            }
        } else {
            MissionStatus::Completed
        }
    } else {
        MissionStatus::Failed {
            reason: reason::DEADLOCK.to_string(),
        }
    }
}
