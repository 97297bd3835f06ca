//! Per-toolset request dispatch: a Pulse-style stream namespaced
//! `<name>:requests`. `CallTool` publishes one message here;
//! a provider node long-polling the same toolset's stream receives it and is
//! expected to eventually `EmitToolResult` for the carried `tool_use_id`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::RegistryError;

/// One dispatched call, as published on a toolset's request stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallMessage {
    pub tool_use_id: String,
    pub tool: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub parent_tool_call_id: Option<String>,
}

/// A live subscription to one toolset's request stream.
pub struct RequestSubscription {
    receiver: broadcast::Receiver<CallMessage>,
}

impl RequestSubscription {
    pub async fn recv(&mut self) -> Result<CallMessage, RegistryError> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Ok(msg),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(RegistryError::Internal(
                        "request stream closed while a provider was waiting".into(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn publish(&self, toolset: &str, message: CallMessage) -> Result<(), RegistryError>;
    async fn subscribe(&self, toolset: &str) -> Result<RequestSubscription, RegistryError>;
}

/// In-process reference implementation: one broadcast channel per toolset,
/// created lazily on first publish or subscribe. A real deployment fans this
/// out over a Redis stream per toolset; subscribers here simulate providers
/// connected to any node sharing the same `Arc<InMemoryRequestDispatcher>`.
#[derive(Default)]
pub struct InMemoryRequestDispatcher {
    channels: DashMap<String, broadcast::Sender<CallMessage>>,
}

impl InMemoryRequestDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, toolset: &str) -> broadcast::Sender<CallMessage> {
        self.channels
            .entry(toolset.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl RequestDispatcher for InMemoryRequestDispatcher {
    async fn publish(&self, toolset: &str, message: CallMessage) -> Result<(), RegistryError> {
        // No subscribed provider yet is not an error: the dispatch stream
        // persists the message for the next subscriber in a real deployment;
        // here it is simply dropped if nobody is listening, same as a Redis
        // stream XADD with no consumer connected yet.
        let _ = self.channel(toolset).send(message);
        Ok(())
    }

    async fn subscribe(&self, toolset: &str) -> Result<RequestSubscription, RegistryError> {
        Ok(RequestSubscription {
            receiver: self.channel(toolset).subscribe(),
        })
    }
}

/// Redis pub/sub-backed dispatcher: `publish` is `PUBLISH <name>:requests`,
/// `subscribe` opens a dedicated `PubSub` connection on that channel. Like
/// [`crate::result_stream::RedisResultStreamBroker`], a subscriber only sees
/// messages published after it subscribes — a provider that connects after a
/// call was dispatched misses it, same as the in-memory broadcast channel.
pub struct RedisRequestDispatcher {
    client: redis::Client,
}

impl RedisRequestDispatcher {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn channel(toolset: &str) -> String {
        format!("{toolset}:requests")
    }
}

#[async_trait]
impl RequestDispatcher for RedisRequestDispatcher {
    async fn publish(&self, toolset: &str, message: CallMessage) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string(&message)
            .map_err(|e| RegistryError::Internal(format!("encode call message: {e}")))?;
        let mut conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        redis::AsyncCommands::publish::<_, _, i64>(&mut conn, Self::channel(toolset), encoded)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, toolset: &str) -> Result<RequestSubscription, RegistryError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        pubsub
            .subscribe(Self::channel(toolset))
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        let (tx, rx) = broadcast::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Ok(call) = serde_json::from_str::<CallMessage>(&payload) else {
                    continue;
                };
                if tx.send(call).is_err() {
                    break;
                }
            }
        });
        Ok(RequestSubscription { receiver: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let dispatcher = InMemoryRequestDispatcher::new();
        let mut sub = dispatcher.subscribe("data").await.unwrap();
        dispatcher
            .publish(
                "data",
                CallMessage {
                    tool_use_id: "use-1".into(),
                    tool: "query".into(),
                    payload: serde_json::json!({"sql": "select 1"}),
                    parent_tool_call_id: None,
                },
            )
            .await
            .unwrap();
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.tool_use_id, "use-1");
    }
}
