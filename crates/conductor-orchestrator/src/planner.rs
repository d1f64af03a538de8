use crate::types::{Strategy, Task};
use conductor_agent::{CompletionClient, CompletionContext, CompletionResult};
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Complexity classification of an objective, used only to suggest an
/// initial dispatch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Short, single-domain objective.
    Low,
    /// Moderate length or a couple of work domains.
    Medium,
    /// Long objective spanning several work domains.
    High,
}

/// A validated plan: materialized tasks plus the suggested strategy.
#[derive(Debug, Clone)]
pub struct MissionPlan {
    /// Tasks in creation order, all `Pending`.
    pub tasks: Vec<Task>,
    /// Strategy suggested from the complexity heuristic.
    pub strategy: Strategy,
    /// The classification that produced the suggestion.
    pub complexity: Complexity,
}

/// Task draft as returned by the completion service, before validation and
/// id materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlannedTask {
    id: String,
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    required_capabilities: Vec<String>,
    #[serde(default = "default_required")]
    required_for_success: bool,
}

fn default_required() -> bool {
    true
}

const PLANNER_PROMPT: &str = "\
You are the planning stage of a multi-agent orchestration engine. Decompose \
the objective below into a dependency graph of tasks.

Respond with ONLY a JSON array. Each element:
{
  \"id\": \"short unique string\",
  \"description\": \"what this task does\",
  \"depends_on\": [\"ids of tasks that must finish first\"],
  \"required_capabilities\": [\"skill tags, at least one\"],
  \"required_for_success\": true
}

Rules:
1. Every depends_on id must reference another task in the array.
2. The dependency graph must be acyclic.
3. Every task declares at least one capability tag.
4. Mark best-effort tasks with required_for_success = false.
";

/// Turns a free-text objective into a validated task graph via one call to
/// the completion service, with at most one corrective re-prompt.
pub struct Planner {
    client: Arc<dyn CompletionClient>,
    replan_on_invalid: bool,
}

impl Planner {
    /// Create a planner over the given completion client.
    pub fn new(client: Arc<dyn CompletionClient>, replan_on_invalid: bool) -> Self {
        Self {
            client,
            replan_on_invalid,
        }
    }

    /// Plan the objective: classify complexity, request a task breakdown,
    /// validate it locally, and materialize tasks.
    pub async fn plan(&self, objective: &str) -> ConductorResult<MissionPlan> {
        if objective.trim().is_empty() {
            return Err(ConductorError::Planning("empty objective".into()));
        }

        let complexity = classify_complexity(objective);
        let strategy = suggested_strategy(complexity);
        info!(%strategy, ?complexity, "Planner: requesting task breakdown");

        let prompt = format!(
            "{PLANNER_PROMPT}\nSuggested strategy: {strategy}\n\nObjective: {objective}"
        );
        let context = CompletionContext::for_role("planner");

        let result = self
            .client
            .complete(&prompt, &context)
            .await
            .map_err(|e| ConductorError::Planning(e.to_string()))?;
        let mut draft = parse_draft(&result)?;

        if let Err(violation) = validate_draft(&draft) {
            if !self.replan_on_invalid {
                return Err(ConductorError::Planning(violation));
            }
            warn!(%violation, "Planner: invalid graph, re-prompting once");
            let corrective = format!(
                "{prompt}\n\nYour previous plan was rejected: {violation}. \
                 Return a corrected JSON array."
            );
            let retry = self
                .client
                .complete(&corrective, &context)
                .await
                .map_err(|e| ConductorError::Planning(e.to_string()))?;
            draft = parse_draft(&retry)?;
            validate_draft(&draft).map_err(ConductorError::Planning)?;
        }

        let tasks = materialize(draft)?;
        info!(task_count = tasks.len(), "Planner: plan accepted");
        Ok(MissionPlan {
            tasks,
            strategy,
            complexity,
        })
    }
}

/// Multi-domain verbs used by the complexity heuristic.
const DOMAIN_VERBS: &[&str] = &[
    "implement",
    "test",
    "review",
    "research",
    "write",
    "design",
    "deploy",
    "analyze",
    "document",
    "refactor",
];

/// Classify an objective by length and distinct work-domain verbs.
pub fn classify_complexity(objective: &str) -> Complexity {
    let lower = objective.to_lowercase();
    let domains = DOMAIN_VERBS
        .iter()
        .filter(|verb| lower.contains(*verb))
        .count();
    let words = objective.split_whitespace().count();

    if domains >= 3 || words > 60 {
        Complexity::High
    } else if domains == 2 || words > 20 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

/// Strategy suggestion: low-complexity objectives avoid parallel fan-out.
pub fn suggested_strategy(complexity: Complexity) -> Strategy {
    match complexity {
        Complexity::Low => Strategy::Sequential,
        Complexity::Medium => Strategy::Hybrid,
        Complexity::High => Strategy::Parallel,
    }
}

/// Read the task draft from structured output when present, otherwise parse
/// the text as JSON (markdown fences stripped).
fn parse_draft(result: &CompletionResult) -> ConductorResult<Vec<PlannedTask>> {
    let value = match &result.structured_output {
        Some(value) => value.clone(),
        None => {
            let text = strip_code_fences(&result.text);
            serde_json::from_str(text)
                .map_err(|e| ConductorError::Planning(format!("unparseable plan: {e}")))?
        }
    };
    serde_json::from_value(value)
        .map_err(|e| ConductorError::Planning(format!("malformed plan: {e}")))
}

/// Strip a leading/trailing markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Local validation: unique ids, resolvable dependencies, acyclic relation,
/// at least one capability tag per task.
fn validate_draft(draft: &[PlannedTask]) -> Result<(), String> {
    if draft.is_empty() {
        return Err("plan contains no tasks".into());
    }

    let mut ids = HashSet::new();
    for task in draft {
        if !ids.insert(task.id.as_str()) {
            return Err(format!("duplicate task id '{}'", task.id));
        }
    }

    for task in draft {
        if task.required_capabilities.is_empty() {
            return Err(format!(
                "task '{}' declares no capability tags",
                task.id
            ));
        }
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.id
                ));
            }
        }
    }

    if draft_has_cycle(draft) {
        return Err("dependency cycle detected in task graph".into());
    }
    Ok(())
}

fn draft_has_cycle(draft: &[PlannedTask]) -> bool {
    let deps: HashMap<&str, &[String]> = draft
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();
    let mut visited: HashMap<&str, u8> = HashMap::new();
    draft
        .iter()
        .any(|t| dfs_cycle(t.id.as_str(), &deps, &mut visited))
}

fn dfs_cycle<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(id) {
        Some(1) => return true,
        Some(2) => return false,
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(children) = deps.get(id) {
        for dep in children.iter() {
            if let Some((&key, _)) = deps.get_key_value(dep.as_str()) {
                if dfs_cycle(key, deps, visited) {
                    return true;
                }
            }
        }
    }
    visited.insert(id, 2);
    false
}

/// Map the draft's string ids to fresh task ids and build `Pending` tasks.
fn materialize(draft: Vec<PlannedTask>) -> ConductorResult<Vec<Task>> {
    let id_map: HashMap<String, Uuid> = draft
        .iter()
        .map(|t| (t.id.clone(), Uuid::new_v4()))
        .collect();

    draft
        .into_iter()
        .map(|planned| {
            let deps = planned
                .depends_on
                .iter()
                .map(|dep| {
                    id_map.get(dep).copied().ok_or_else(|| {
                        ConductorError::Planning(format!("unknown dependency '{dep}'"))
                    })
                })
                .collect::<ConductorResult<Vec<Uuid>>>()?;

            let mut task = Task::new(planned.description)
                .with_dependencies(deps)
                .with_capabilities(planned.required_capabilities);
            task.id = id_map[&planned.id];
            task.required_for_success = planned.required_for_success;
            debug!(task_id = %task.id, "Planner: materialized task");
            Ok(task)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_agent::CompletionError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPlanner {
        responses: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedPlanner {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: responses.into_iter().map(String::from).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedPlanner {
        async fn complete(
            &self,
            _prompt: &str,
            _context: &CompletionContext,
        ) -> Result<CompletionResult, CompletionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.responses.get(n).cloned().ok_or_else(|| {
                CompletionError::InvalidResponse("no scripted response left".into())
            })?;
            Ok(CompletionResult::text(text))
        }
    }

    const VALID_PLAN: &str = r#"[
        {"id": "t1", "description": "outline", "required_capabilities": ["writing"]},
        {"id": "t2", "description": "draft", "depends_on": ["t1"],
         "required_capabilities": ["writing"], "required_for_success": false}
    ]"#;

    #[tokio::test]
    async fn test_plan_valid_graph() {
        let client = Arc::new(ScriptedPlanner::new(vec![VALID_PLAN]));
        let planner = Planner::new(client, true);
        let plan = planner.plan("write a report").await.unwrap();

        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks[0].dependencies.is_empty());
        assert_eq!(plan.tasks[1].dependencies, vec![plan.tasks[0].id]);
        assert!(!plan.tasks[1].required_for_success);
    }

    #[tokio::test]
    async fn test_plan_rejects_empty_objective() {
        let client = Arc::new(ScriptedPlanner::new(vec![VALID_PLAN]));
        let planner = Planner::new(client, true);
        assert!(planner.plan("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_plan_reprompts_once_on_cycle() {
        let cyclic = r#"[
            {"id": "a", "description": "a", "depends_on": ["b"], "required_capabilities": ["x"]},
            {"id": "b", "description": "b", "depends_on": ["a"], "required_capabilities": ["x"]}
        ]"#;
        let client = Arc::new(ScriptedPlanner::new(vec![cyclic, VALID_PLAN]));
        let planner = Planner::new(Arc::clone(&client) as Arc<dyn CompletionClient>, true);

        let plan = planner.plan("write a report").await.unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_plan_fails_after_second_invalid_graph() {
        let no_caps = r#"[{"id": "a", "description": "a", "required_capabilities": []}]"#;
        let client = Arc::new(ScriptedPlanner::new(vec![no_caps, no_caps]));
        let planner = Planner::new(client, true);

        let err = planner.plan("do something").await.unwrap_err();
        assert!(err.to_string().contains("capability"));
    }

    #[tokio::test]
    async fn test_plan_no_reprompt_when_disabled() {
        let no_caps = r#"[{"id": "a", "description": "a", "required_capabilities": []}]"#;
        let client = Arc::new(ScriptedPlanner::new(vec![no_caps, VALID_PLAN]));
        let planner = Planner::new(Arc::clone(&client) as Arc<dyn CompletionClient>, false);

        assert!(planner.plan("do something").await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plan_parses_fenced_json() {
        let fenced = format!("```json\n{VALID_PLAN}\n```");
        let client = Arc::new(ScriptedPlanner::new(vec![fenced.as_str()]));
        let planner = Planner::new(client, true);
        assert!(planner.plan("write a report").await.is_ok());
    }

    #[tokio::test]
    async fn test_plan_prefers_structured_output() {
        struct Structured;
        #[async_trait]
        impl CompletionClient for Structured {
            async fn complete(
                &self,
                _prompt: &str,
                _context: &CompletionContext,
            ) -> Result<CompletionResult, CompletionError> {
                Ok(CompletionResult::text("ignore the prose").with_structured(
                    serde_json::from_str(VALID_PLAN).unwrap(),
                ))
            }
        }
        let planner = Planner::new(Arc::new(Structured), true);
        let plan = planner.plan("write a report").await.unwrap();
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let draft: Vec<PlannedTask> = serde_json::from_str(
            r#"[{"id": "a", "description": "a", "depends_on": ["ghost"],
                 "required_capabilities": ["x"]}]"#,
        )
        .unwrap();
        let err = validate_draft(&draft).unwrap_err();
        assert!(err.contains("unknown task 'ghost'"));
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let draft: Vec<PlannedTask> = serde_json::from_str(
            r#"[{"id": "a", "description": "1", "required_capabilities": ["x"]},
                {"id": "a", "description": "2", "required_capabilities": ["x"]}]"#,
        )
        .unwrap();
        assert!(validate_draft(&draft).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_complexity_classification() {
        assert_eq!(classify_complexity("fix typo"), Complexity::Low);
        assert_eq!(
            classify_complexity("research the market and write a summary"),
            Complexity::Medium
        );
        assert_eq!(
            classify_complexity("research, design, implement and test the billing service"),
            Complexity::High
        );
    }

    #[test]
    fn test_strategy_suggestion() {
        assert_eq!(suggested_strategy(Complexity::Low), Strategy::Sequential);
        assert_eq!(suggested_strategy(Complexity::Medium), Strategy::Hybrid);
        assert_eq!(suggested_strategy(Complexity::High), Strategy::Parallel);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("[1]"), "[1]");
    }
}
