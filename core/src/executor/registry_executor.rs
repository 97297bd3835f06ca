//! `RegistryExecutor`: calls the registry gateway's
//! `CallTool`, subscribes to the returned per-call result stream from oldest,
//! forwards `output_delta` frames as stream events, and returns on the first
//! canonical `result` frame matching the call's `toolUseID` — then destroys
//! the stream.

use async_trait::async_trait;
use serde_json::Value;

use shuttle_stream_event::{tool_output_delta_frame, StreamFrame, StreamSink};

use super::{ExecutionContext, ExecutorError, ToolInput, ToolOutput};

/// One frame read off a result stream.
pub enum StreamedFrame {
    /// A partial result for `tool_use_id`.
    OutputDelta { tool_use_id: String, delta: Value },
    /// The canonical terminal result for `tool_use_id`.
    Result {
        tool_use_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
}

/// A handle on one in-flight `CallTool`: the ids the registry assigned.
pub struct RegistryCallHandle {
    pub tool_use_id: String,
    pub result_stream_id: String,
}

/// Talks to the registry gateway's RPC surface. Transport is
/// opaque; this crate only needs `call_tool`.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn call_tool(
        &self,
        toolset: &str,
        tool: &str,
        payload: Value,
    ) -> Result<RegistryCallHandle, ExecutorError>;
}

/// Reads frames off one result stream, oldest first, skipping frames for
/// other `toolUseID`s (they are acked and ignored). Destroyed
/// by the caller once `execute` returns.
#[async_trait]
pub trait ResultStreamReader: Send + Sync {
    async fn next_frame(
        &mut self,
        stream_id: &str,
    ) -> Result<Option<StreamedFrame>, ExecutorError>;

    /// Tears down the ephemeral stream; best-effort, called on both success
    /// and timeout paths.
    async fn destroy(&mut self, stream_id: &str);
}

pub struct RegistryExecutor {
    client: std::sync::Arc<dyn RegistryClient>,
    reader_factory: std::sync::Arc<dyn Fn() -> Box<dyn ResultStreamReader> + Send + Sync>,
    delta_sink: Option<std::sync::Arc<dyn StreamSink>>,
}

impl RegistryExecutor {
    pub fn new(
        client: std::sync::Arc<dyn RegistryClient>,
        reader_factory: std::sync::Arc<dyn Fn() -> Box<dyn ResultStreamReader> + Send + Sync>,
    ) -> Self {
        Self {
            client,
            reader_factory,
            delta_sink: None,
        }
    }

    pub fn with_delta_sink(mut self, sink: std::sync::Arc<dyn StreamSink>) -> Self {
        self.delta_sink = Some(sink);
        self
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: ToolInput,
    ) -> Result<ToolOutput, ExecutorError> {
        let handle = self
            .client
            .call_tool(input.tool_id.toolset(), input.tool_id.tool(), input.payload)
            .await?;

        let mut reader = (self.reader_factory)();
        let outcome = loop {
            match reader.next_frame(&handle.result_stream_id).await? {
                None => {
                    break ToolOutput::err("registry result stream closed before a result frame", None);
                }
                Some(StreamedFrame::OutputDelta { tool_use_id, delta }) => {
                    if tool_use_id != handle.tool_use_id {
                        continue;
                    }
                    if let Some(sink) = &self.delta_sink {
                        let frame: StreamFrame = tool_output_delta_frame(
                            ctx.run_id.clone(),
                            ctx.session_id.clone(),
                            ctx.turn_id.clone(),
                            None,
                            &input.tool_call_id,
                            delta,
                        );
                        let _ = sink.send(frame);
                    }
                }
                Some(StreamedFrame::Result {
                    tool_use_id,
                    result,
                    error,
                }) => {
                    if tool_use_id != handle.tool_use_id {
                        continue;
                    }
                    break match error {
                        Some(message) => ToolOutput::err(message, None),
                        None => ToolOutput::ok(result.unwrap_or(Value::Null)),
                    };
                }
            }
        };
        reader.destroy(&handle.result_stream_id).await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolId;
    use std::sync::{Arc, Mutex};

    struct StubClient;

    #[async_trait]
    impl RegistryClient for StubClient {
        async fn call_tool(
            &self,
            _toolset: &str,
            _tool: &str,
            _payload: Value,
        ) -> Result<RegistryCallHandle, ExecutorError> {
            Ok(RegistryCallHandle {
                tool_use_id: "use-1".into(),
                result_stream_id: "result:use-1".into(),
            })
        }
    }

    struct ScriptedReader {
        frames: Mutex<Vec<StreamedFrame>>,
        destroyed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ResultStreamReader for ScriptedReader {
        async fn next_frame(
            &mut self,
            _stream_id: &str,
        ) -> Result<Option<StreamedFrame>, ExecutorError> {
            Ok(self.frames.lock().unwrap().pop())
        }

        async fn destroy(&mut self, _stream_id: &str) {
            *self.destroyed.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn skips_non_matching_frames_and_returns_on_result() {
        let destroyed = Arc::new(Mutex::new(false));
        let destroyed_clone = destroyed.clone();
        // Vec is popped (LIFO), so list in reverse read order.
        let factory = std::sync::Arc::new(move || {
            Box::new(ScriptedReader {
                frames: Mutex::new(vec![
                    StreamedFrame::Result {
                        tool_use_id: "use-1".into(),
                        result: Some(serde_json::json!({"ok": true})),
                        error: None,
                    },
                    StreamedFrame::OutputDelta {
                        tool_use_id: "use-other".into(),
                        delta: serde_json::json!({"partial": 1}),
                    },
                ]),
                destroyed: destroyed_clone.clone(),
            }) as Box<dyn ResultStreamReader>
        });
        let executor = RegistryExecutor::new(Arc::new(StubClient), factory);
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("search", "query"),
            payload: serde_json::json!({}),
            child_run_id: None,
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output.result, Some(serde_json::json!({"ok": true})));
        assert!(*destroyed.lock().unwrap());
    }
}
