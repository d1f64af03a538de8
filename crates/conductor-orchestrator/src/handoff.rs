use conductor_agent::CompletionResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A runtime request from an agent to insert a new task into the graph.
///
/// Agents never mutate the graph themselves. A handoff rides inside the
/// completion result's structured output (under the `handoff` key) and the
/// execution loop performs the actual graph mutation and re-delegation, so
/// all mutation stays serialized in the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    /// Description of the new task.
    pub description: String,
    /// Capability tags the new task requires.
    pub required_capabilities: BTreeSet<String>,
    /// When true, the originating task cannot complete until the new task
    /// does; when false, the originating task completes immediately and the
    /// new task proceeds independently.
    #[serde(default)]
    pub blocks_original_completion: bool,
}

/// Extract a handoff request from a completion result, if one was emitted.
pub fn extract_handoff(result: &CompletionResult) -> Option<HandoffRequest> {
    let value = result.structured_output.as_ref()?.get("handoff")?;
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_blocking_handoff() {
        let result = CompletionResult::text("partial work").with_structured(serde_json::json!({
            "handoff": {
                "description": "verify the citations",
                "required_capabilities": ["research"],
                "blocks_original_completion": true
            }
        }));

        let handoff = extract_handoff(&result).unwrap();
        assert_eq!(handoff.description, "verify the citations");
        assert!(handoff.blocks_original_completion);
        assert!(handoff.required_capabilities.contains("research"));
    }

    #[test]
    fn test_blocks_flag_defaults_to_false() {
        let result = CompletionResult::text("done").with_structured(serde_json::json!({
            "handoff": {
                "description": "archive the output",
                "required_capabilities": ["ops"]
            }
        }));
        assert!(!extract_handoff(&result).unwrap().blocks_original_completion);
    }

    #[test]
    fn test_no_handoff_in_plain_result() {
        assert!(extract_handoff(&CompletionResult::text("done")).is_none());
    }

    #[test]
    fn test_null_handoff_is_ignored() {
        let result =
            CompletionResult::text("done").with_structured(serde_json::json!({ "handoff": null }));
        assert!(extract_handoff(&result).is_none());
    }

    #[test]
    fn test_malformed_handoff_is_ignored() {
        let result = CompletionResult::text("done")
            .with_structured(serde_json::json!({ "handoff": { "bogus": 1 } }));
        assert!(extract_handoff(&result).is_none());
    }
}
