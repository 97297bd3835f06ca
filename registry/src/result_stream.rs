//! Per-call ephemeral result streams: a `CallTool` invocation opens a
//! short-lived stream, the answering provider publishes frames onto it from
//! whichever node it happens to be connected to, and the original caller's
//! node tails the stream until it sees the matching `tool_use_id`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::RegistryError;

/// One frame published onto a result stream. Non-matching `tool_use_id`
/// frames (another call's traffic sharing the broadcast fan-out in the
/// in-memory implementation) are skipped by the waiter, never acked as the
/// answer to the wrong call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StreamedFrame {
    OutputDelta {
        tool_use_id: String,
        delta: serde_json::Value,
    },
    Result {
        tool_use_id: String,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
}

impl StreamedFrame {
    fn tool_use_id(&self) -> &str {
        match self {
            StreamedFrame::OutputDelta { tool_use_id, .. } => tool_use_id,
            StreamedFrame::Result { tool_use_id, .. } => tool_use_id,
        }
    }
}

#[async_trait]
pub trait ResultStreamBroker: Send + Sync {
    /// Opens `result:<uuid>` and returns its id.
    async fn create_stream(&self) -> Result<String, RegistryError>;

    async fn publish(&self, stream_id: &str, frame: StreamedFrame) -> Result<(), RegistryError>;

    /// Blocks until a `Result` frame for `tool_use_id` arrives on `stream_id`
    /// or `timeout` elapses.
    async fn wait_for_result(
        &self,
        stream_id: &str,
        tool_use_id: &str,
        timeout: Duration,
    ) -> Result<StreamedFrame, RegistryError>;

    /// Subscribes to every frame on `stream_id`, unfiltered by `tool_use_id`
    /// — used by a `ResultStreamReader` that, like `RegistryExecutor`, does
    /// its own tool-use-id matching and forwards `OutputDelta` frames before
    /// the terminal `Result` arrives.
    async fn subscribe(&self, stream_id: &str) -> Result<Box<dyn FrameReceiver>, RegistryError>;

    async fn destroy(&self, stream_id: &str);
}

/// A live tail of one result stream's frames, oldest first.
#[async_trait]
pub trait FrameReceiver: Send {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<StreamedFrame>, RegistryError>;
}

/// In-process broker: one `tokio::sync::broadcast` channel per stream. Real
/// clustering would fan this out over Redis pub/sub; tests simulate a
/// cross-node call by sharing one `Arc<InMemoryResultStreamBroker>` between
/// two [`crate::service::RegistryService`] instances.
#[derive(Default)]
pub struct InMemoryResultStreamBroker {
    channels: DashMap<String, broadcast::Sender<StreamedFrame>>,
}

impl InMemoryResultStreamBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStreamBroker for InMemoryResultStreamBroker {
    async fn create_stream(&self) -> Result<String, RegistryError> {
        let stream_id = format!("result:{}", Uuid::new_v4());
        let (tx, _rx) = broadcast::channel(64);
        self.channels.insert(stream_id.clone(), tx);
        Ok(stream_id)
    }

    async fn publish(&self, stream_id: &str, frame: StreamedFrame) -> Result<(), RegistryError> {
        let sender = self
            .channels
            .get(stream_id)
            .ok_or_else(|| RegistryError::NotFound(format!("result stream {stream_id}")))?;
        // No subscriber currently waiting is not an error: the caller may
        // reconnect, or the frame may simply be late.
        let _ = sender.send(frame);
        Ok(())
    }

    async fn wait_for_result(
        &self,
        stream_id: &str,
        tool_use_id: &str,
        timeout: Duration,
    ) -> Result<StreamedFrame, RegistryError> {
        let mut receiver = self
            .channels
            .get(stream_id)
            .ok_or_else(|| RegistryError::NotFound(format!("result stream {stream_id}")))?
            .subscribe();

        tokio::time::timeout(timeout, async {
            loop {
                match receiver.recv().await {
                    Ok(frame) if frame.tool_use_id() == tool_use_id => {
                        if matches!(frame, StreamedFrame::Result { .. }) {
                            return Ok(frame);
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RegistryError::Internal(
                            "result stream closed before a result arrived".into(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| RegistryError::Timeout(format!("waiting for result on {stream_id}")))?
    }

    async fn subscribe(&self, stream_id: &str) -> Result<Box<dyn FrameReceiver>, RegistryError> {
        let receiver = self
            .channels
            .get(stream_id)
            .ok_or_else(|| RegistryError::NotFound(format!("result stream {stream_id}")))?
            .subscribe();
        Ok(Box::new(BroadcastFrameReceiver { receiver }))
    }

    async fn destroy(&self, stream_id: &str) {
        self.channels.remove(stream_id);
    }
}

struct BroadcastFrameReceiver {
    receiver: broadcast::Receiver<StreamedFrame>,
}

#[async_trait]
impl FrameReceiver for BroadcastFrameReceiver {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<StreamedFrame>, RegistryError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => Ok(None),
            Ok(Err(broadcast::error::RecvError::Closed)) => Ok(None),
            Err(_) => Ok(None),
        }
    }
}

/// Redis pub/sub-backed broker: `publish` is Redis `PUBLISH` on the stream's
/// channel name, `subscribe` opens a dedicated `PubSub` connection. Unlike
/// the replicated maps, Redis pub/sub has no backlog — a subscriber only
/// sees frames published after it subscribes, matching the in-memory
/// broker's own behavior (`broadcast::channel` drops frames sent before a
/// given `subscribe()` call too).
pub struct RedisResultStreamBroker {
    client: redis::Client,
}

impl RedisResultStreamBroker {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResultStreamBroker for RedisResultStreamBroker {
    async fn create_stream(&self) -> Result<String, RegistryError> {
        Ok(format!("result:{}", Uuid::new_v4()))
    }

    async fn publish(&self, stream_id: &str, frame: StreamedFrame) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string(&frame)
            .map_err(|e| RegistryError::Internal(format!("encode frame: {e}")))?;
        let mut conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        redis::AsyncCommands::publish::<_, _, i64>(&mut conn, stream_id, encoded)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn wait_for_result(
        &self,
        stream_id: &str,
        tool_use_id: &str,
        timeout: Duration,
    ) -> Result<StreamedFrame, RegistryError> {
        let mut receiver = self.subscribe(stream_id).await?;
        tokio::time::timeout(timeout, async {
            loop {
                match receiver.recv(timeout).await? {
                    Some(frame) if frame.tool_use_id() == tool_use_id => {
                        if matches!(frame, StreamedFrame::Result { .. }) {
                            return Ok(frame);
                        }
                    }
                    Some(_) => continue,
                    None => {
                        return Err(RegistryError::Internal(
                            "redis pub/sub connection closed before a result arrived".into(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| RegistryError::Timeout(format!("waiting for result on {stream_id}")))?
    }

    async fn subscribe(&self, stream_id: &str) -> Result<Box<dyn FrameReceiver>, RegistryError> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(Box::new(RedisFrameReceiver {
            pubsub,
            channel: stream_id.to_string(),
            subscribed: false,
        }))
    }

    async fn destroy(&self, _stream_id: &str) {
        // Nothing to tear down server-side: Redis pub/sub channels exist
        // only while a subscriber is attached, and TTL on the routing entry
        // (`registry:result-stream:<toolUseID>`) already bounds its lifetime.
    }
}

struct RedisFrameReceiver {
    pubsub: redis::aio::PubSub,
    channel: String,
    subscribed: bool,
}

#[async_trait]
impl FrameReceiver for RedisFrameReceiver {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<StreamedFrame>, RegistryError> {
        if !self.subscribed {
            self.pubsub
                .subscribe(&self.channel)
                .await
                .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
            self.subscribed = true;
        }
        let mut stream = self.pubsub.on_message();
        let result = tokio::time::timeout(timeout, async {
            use futures::StreamExt;
            stream.next().await
        })
        .await;
        match result {
            Ok(Some(msg)) => {
                let payload: String = msg
                    .get_payload()
                    .map_err(|e| RegistryError::Internal(format!("redis payload: {e}")))?;
                let frame: StreamedFrame = serde_json::from_str(&payload)
                    .map_err(|e| RegistryError::Internal(format!("decode frame: {e}")))?;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }
}
