use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors surfaced by the completion service boundary.
///
/// The orchestrator treats every kind uniformly as a task failure and performs
/// no retries of its own — retry policy, if any, lives inside the boundary
/// implementation.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The call did not finish within the boundary's timeout policy.
    #[error("completion timed out: {0}")]
    Timeout(String),

    /// The provider rejected the call due to rate limiting.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider returned output that could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A transport-level failure (connection, TLS, DNS).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Caller context attached to a completion call: the worker's role and the
/// capability tags it was selected for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionContext {
    /// Role of the agent (or `"planner"` for the planning call).
    pub role: String,
    /// Capability tags the agent declares.
    pub capabilities: BTreeSet<String>,
}

impl CompletionContext {
    /// Create a context for the given role with no capability tags.
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Attach capability tags to the context.
    pub fn with_capabilities(mut self, capabilities: BTreeSet<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Output of a completion call: free text plus optional structured output
/// when the prompt requested a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    /// The textual response.
    pub text: String,
    /// Structured output, when the call requested it.
    #[serde(default)]
    pub structured_output: Option<serde_json::Value>,
}

impl CompletionResult {
    /// Create a plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured_output: None,
        }
    }

    /// Attach structured output to the result.
    pub fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.structured_output = Some(value);
        self
    }
}

/// Async port to the external completion service.
///
/// Implementations wrap an actual LLM provider; tests use scripted doubles.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Execute one completion call for the given prompt and caller context.
    async fn complete(
        &self,
        prompt: &str,
        context: &CompletionContext,
    ) -> Result<CompletionResult, CompletionError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(
            &self,
            prompt: &str,
            context: &CompletionContext,
        ) -> Result<CompletionResult, CompletionError> {
            Ok(CompletionResult::text(format!("{}: {prompt}", context.role)))
        }
    }

    #[tokio::test]
    async fn test_client_trait_object() {
        let client: Box<dyn CompletionClient> = Box::new(EchoClient);
        let ctx = CompletionContext::for_role("writer");
        let result = client.complete("draft the intro", &ctx).await.unwrap();
        assert_eq!(result.text, "writer: draft the intro");
        assert!(result.structured_output.is_none());
    }

    #[test]
    fn test_result_serialization() {
        let result = CompletionResult::text("done")
            .with_structured(serde_json::json!({ "handoff": null }));
        let json = serde_json::to_string(&result).unwrap();
        let parsed: CompletionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.text, "done");
        assert!(parsed.structured_output.is_some());
    }

    #[test]
    fn test_error_display() {
        let err = CompletionError::Timeout("30s elapsed".into());
        assert_eq!(err.to_string(), "completion timed out: 30s elapsed");
    }
}
