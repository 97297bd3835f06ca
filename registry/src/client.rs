//! In-process adapter from `RegistryService` to `shuttle_core`'s
//! `RegistryClient`/`ResultStreamReader` contracts. A networked deployment would instead implement these
//! traits over the `http` surface's client; this adapter is what the CLI
//! demo binary wires up, since it hosts the registry service in the same
//! process as the run loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use shuttle_core::{
    ExecutorError, RegistryCallHandle, RegistryClient, ResultStreamReader,
    StreamedFrame as CoreStreamedFrame,
};

use crate::result_stream::{FrameReceiver, StreamedFrame as RegistryStreamedFrame};
use crate::service::RegistryService;

fn to_executor_error(e: crate::error::RegistryError) -> ExecutorError {
    ExecutorError::Transport(e.to_string())
}

fn to_core_frame(frame: RegistryStreamedFrame) -> CoreStreamedFrame {
    match frame {
        RegistryStreamedFrame::OutputDelta { tool_use_id, delta } => {
            CoreStreamedFrame::OutputDelta { tool_use_id, delta }
        }
        RegistryStreamedFrame::Result {
            tool_use_id,
            result,
            error,
        } => CoreStreamedFrame::Result {
            tool_use_id,
            result,
            error,
        },
    }
}

pub struct InProcessRegistryClient {
    service: Arc<RegistryService>,
}

impl InProcessRegistryClient {
    pub fn new(service: Arc<RegistryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RegistryClient for InProcessRegistryClient {
    async fn call_tool(
        &self,
        toolset: &str,
        tool: &str,
        payload: Value,
    ) -> Result<RegistryCallHandle, ExecutorError> {
        let (tool_use_id, result_stream_id) = self
            .service
            .call_tool(toolset, tool, payload)
            .await
            .map_err(to_executor_error)?;
        Ok(RegistryCallHandle {
            tool_use_id,
            result_stream_id,
        })
    }
}

/// Tails a result stream raw: every frame for every `tool_use_id` on it, in
/// arrival order. `RegistryExecutor::execute` does its own matching against
/// the call's `tool_use_id`, so this reader stays ignorant of it — the same
/// zero-argument reader factory is shared across every call `RegistryExecutor`
/// makes, and a call's `tool_use_id` isn't known until after `call_tool`
/// returns.
pub struct InProcessResultStreamReader {
    service: Arc<RegistryService>,
    receiver: Option<Box<dyn FrameReceiver>>,
    per_frame_timeout: Duration,
}

impl InProcessResultStreamReader {
    pub fn new(service: Arc<RegistryService>, per_frame_timeout: Duration) -> Self {
        Self {
            service,
            receiver: None,
            per_frame_timeout,
        }
    }
}

#[async_trait]
impl ResultStreamReader for InProcessResultStreamReader {
    async fn next_frame(&mut self, stream_id: &str) -> Result<Option<CoreStreamedFrame>, ExecutorError> {
        if self.receiver.is_none() {
            self.receiver = Some(
                self.service
                    .subscribe_stream(stream_id)
                    .await
                    .map_err(to_executor_error)?,
            );
        }
        let receiver = self.receiver.as_mut().expect("just populated");
        let frame = receiver
            .recv(self.per_frame_timeout)
            .await
            .map_err(to_executor_error)?;
        Ok(frame.map(to_core_frame))
    }

    async fn destroy(&mut self, stream_id: &str) {
        self.service.destroy_stream(stream_id).await;
        self.receiver = None;
    }
}

/// Builds the shared `reader_factory` closure `RegistryExecutor::new` wants:
/// one registry-backed reader per call, all reading from the same service.
pub fn reader_factory(
    service: Arc<RegistryService>,
    per_frame_timeout: Duration,
) -> Arc<dyn Fn() -> Box<dyn ResultStreamReader> + Send + Sync> {
    Arc::new(move || {
        Box::new(InProcessResultStreamReader::new(
            service.clone(),
            per_frame_timeout,
        )) as Box<dyn ResultStreamReader>
    })
}
