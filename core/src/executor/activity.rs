//! `ActivityExecutor`: schedules a tool as a workflow
//! activity on a queue, blocking until the activity future resolves.
//!
//! Follows a `Checkpointer`-style trait boundary: the executor
//! itself holds no scheduling logic, only a handle to whatever runs activities
//! (`ActivityRunner`), so an in-memory engine and a durable engine can both
//! back it without this code changing.

use async_trait::async_trait;
use serde_json::Value;

use crate::run::{RetryHint, RetryPolicy, RetryReason};
use crate::tool::ErasedResultCodec;

use super::{ExecutionContext, ExecutorError, ToolInput, ToolOutput};

/// Abstraction over "run this activity and give me its raw JSON result",
/// implemented by whichever [`crate::engine::Engine`] the run loop is using.
/// Kept separate from the `Engine` trait itself so executors can be unit
/// tested with a bare closure-backed fake.
#[async_trait]
pub trait ActivityRunner: Send + Sync {
    async fn run_activity(
        &self,
        queue: Option<&str>,
        retry_policy: Option<&RetryPolicy>,
        tool_id: &str,
        payload: Value,
    ) -> Result<Value, ExecutorError>;
}

/// Schedules the tool as an activity on `queue`, using a retry policy
/// composed of three layers (engine default ∘ toolset policy ∘ request
/// override, override wins per field — `RetryPolicy::merge`):
/// `engine_default` is this executor's own fallback, `retry_policy` is the
/// toolset's configured policy, and the per-run override arrives on
/// [`ExecutionContext::retry_policy_override`] at call time.
///
/// When `result_codec` is set, the raw JSON the activity returns is decoded
/// through it before being accepted: a mismatch surfaces as
/// `RetryHint{Reason: InvalidArguments}` rather than an opaque downstream
/// failure.
pub struct ActivityExecutor {
    runner: std::sync::Arc<dyn ActivityRunner>,
    queue: Option<String>,
    engine_default: RetryPolicy,
    retry_policy: Option<RetryPolicy>,
    result_codec: Option<std::sync::Arc<dyn ErasedResultCodec>>,
}

impl ActivityExecutor {
    pub fn new(runner: std::sync::Arc<dyn ActivityRunner>) -> Self {
        Self {
            runner,
            queue: None,
            engine_default: RetryPolicy::default(),
            retry_policy: None,
            result_codec: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_engine_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.engine_default = policy;
        self
    }

    pub fn with_result_codec(mut self, codec: std::sync::Arc<dyn ErasedResultCodec>) -> Self {
        self.result_codec = Some(codec);
        self
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: ToolInput,
    ) -> Result<ToolOutput, ExecutorError> {
        let toolset_layer = self.retry_policy.clone().unwrap_or_default();
        let merged = self.engine_default.merge(&toolset_layer);
        let merged = match &ctx.retry_policy_override {
            Some(override_policy) => merged.merge(override_policy),
            None => merged,
        };
        let result = self
            .runner
            .run_activity(
                self.queue.as_deref(),
                Some(&merged),
                &input.tool_id.to_string(),
                input.payload,
            )
            .await?;
        match &self.result_codec {
            Some(codec) => match codec.validate(&result) {
                Ok(canonical) => Ok(ToolOutput::ok(canonical)),
                Err(e) => Ok(ToolOutput::err(
                    format!("result codec error: {e}"),
                    Some(RetryHint::reason(RetryReason::InvalidArguments)),
                )),
            },
            None => Ok(ToolOutput::ok(result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolId;
    use std::sync::Arc;

    struct EchoRunner;

    #[async_trait]
    impl ActivityRunner for EchoRunner {
        async fn run_activity(
            &self,
            _queue: Option<&str>,
            _retry_policy: Option<&RetryPolicy>,
            _tool_id: &str,
            payload: Value,
        ) -> Result<Value, ExecutorError> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn execute_returns_activity_result_as_ok_output() {
        let executor = ActivityExecutor::new(Arc::new(EchoRunner));
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("search", "query"),
            payload: serde_json::json!({"q": "docs"}),
            child_run_id: None,
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output.result, Some(serde_json::json!({"q": "docs"})));
        assert!(output.error.is_none());
    }

    struct RecordingRunner {
        seen: std::sync::Mutex<Option<RetryPolicy>>,
    }

    #[async_trait]
    impl ActivityRunner for RecordingRunner {
        async fn run_activity(
            &self,
            _queue: Option<&str>,
            retry_policy: Option<&RetryPolicy>,
            _tool_id: &str,
            payload: Value,
        ) -> Result<Value, ExecutorError> {
            *self.seen.lock().unwrap() = retry_policy.cloned();
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn execute_merges_engine_toolset_and_request_override_retry_policies() {
        let runner = Arc::new(RecordingRunner {
            seen: std::sync::Mutex::new(None),
        });
        let executor = ActivityExecutor::new(runner.clone())
            .with_engine_default_retry_policy(RetryPolicy {
                max_attempts: Some(3),
                initial_interval_ms: Some(100),
                backoff_coefficient: Some(2.0),
            })
            .with_retry_policy(RetryPolicy {
                max_attempts: Some(5),
                initial_interval_ms: None,
                backoff_coefficient: None,
            });
        let ctx = ExecutionContext {
            retry_policy_override: Some(RetryPolicy {
                max_attempts: None,
                initial_interval_ms: Some(250),
                backoff_coefficient: None,
            }),
            ..Default::default()
        };
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("search", "query"),
            payload: serde_json::json!({}),
            child_run_id: None,
        };
        executor.execute(&ctx, input).await.unwrap();

        let seen = runner.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.max_attempts, Some(5));
        assert_eq!(seen.initial_interval_ms, Some(250));
        assert_eq!(seen.backoff_coefficient, Some(2.0));
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct SearchHits {
        hits: Vec<String>,
    }

    #[tokio::test]
    async fn execute_passes_a_matching_result_through_its_codec() {
        let executor = ActivityExecutor::new(Arc::new(EchoRunner)).with_result_codec(Arc::new(
            crate::tool::SerdeJsonCodec::<SearchHits>::new("SearchHits"),
        ));
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("search", "query"),
            payload: serde_json::json!({"hits": ["a", "b"]}),
            child_run_id: None,
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output.result, Some(serde_json::json!({"hits": ["a", "b"]})));
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn execute_maps_a_codec_mismatch_to_invalid_arguments_retry_hint() {
        let executor = ActivityExecutor::new(Arc::new(EchoRunner)).with_result_codec(Arc::new(
            crate::tool::SerdeJsonCodec::<SearchHits>::new("SearchHits"),
        ));
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("search", "query"),
            payload: serde_json::json!({"wrong_field": true}),
            child_run_id: None,
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert!(output.error.is_some());
        assert_eq!(
            output.retry_hint.unwrap().reason,
            Some(RetryReason::InvalidArguments)
        );
    }
}
