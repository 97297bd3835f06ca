//! `RegistryService`: the clustered tool registry's RPC surface — catalog CRUD, `CallTool` dispatch through a per-call result stream,
//! and the ping loop that keeps the health map converged across nodes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::health::HealthTracker;
use crate::replicated_map::ReplicatedMap;
use crate::request_stream::{CallMessage, RequestDispatcher};
use crate::result_stream::{ResultStreamBroker, StreamedFrame};
use crate::store::ToolsetStore;
use crate::ticker::DistributedTicker;
use crate::toolset::{validate_toolset, Toolset};

fn result_stream_index_key(tool_use_id: &str) -> String {
    format!("registry:result-stream:{tool_use_id}")
}

pub struct RegistryService {
    node_id: String,
    registry_map: Arc<dyn ReplicatedMap>,
    health: Arc<HealthTracker>,
    ticker: Arc<dyn DistributedTicker>,
    store: Arc<dyn ToolsetStore>,
    result_streams: Arc<dyn ResultStreamBroker>,
    result_stream_index: Arc<dyn ReplicatedMap>,
    dispatcher: Arc<dyn RequestDispatcher>,
    ping_interval_ms: i64,
    call_timeout_ms: i64,
    result_stream_ttl_ms: i64,
    /// Tracks ping loops already spawned by this node, so a second
    /// `start_ping_loop` call for the same toolset is a no-op.
    running_ping_loops: DashMap<String, JoinHandle<()>>,
}

impl RegistryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        registry_map: Arc<dyn ReplicatedMap>,
        health: Arc<HealthTracker>,
        ticker: Arc<dyn DistributedTicker>,
        store: Arc<dyn ToolsetStore>,
        result_streams: Arc<dyn ResultStreamBroker>,
        result_stream_index: Arc<dyn ReplicatedMap>,
        dispatcher: Arc<dyn RequestDispatcher>,
        ping_interval_ms: i64,
        call_timeout_ms: i64,
        result_stream_ttl_ms: i64,
    ) -> Self {
        Self {
            node_id,
            registry_map,
            health,
            ticker,
            store,
            result_streams,
            result_stream_index,
            dispatcher,
            ping_interval_ms,
            call_timeout_ms,
            result_stream_ttl_ms,
            running_ping_loops: DashMap::new(),
        }
    }

    /// Reads every toolset this node's `ToolsetStore` remembers and reissues
    /// `start_ping_loop` for each: the
    /// registry map is ephemeral, the store is authoritative.
    pub async fn reconcile_on_startup(self: &Arc<Self>) -> Result<(), RegistryError> {
        for toolset in self.store.list().await? {
            self.registry_map
                .set(&toolset.name, serde_json::to_value(&toolset).unwrap(), None)
                .await?;
            self.start_ping_loop(&toolset.name);
        }
        Ok(())
    }

    pub async fn register(self: &Arc<Self>, toolset: Toolset) -> Result<(), RegistryError> {
        validate_toolset(&toolset)?;
        let mut toolset = toolset;
        toolset.stream_id = Some(format!("{}:requests", toolset.name));
        toolset.registered_at = Some(Utc::now());
        self.store.put(toolset.clone()).await?;
        self.registry_map
            .set(
                &toolset.name,
                serde_json::to_value(&toolset)
                    .map_err(|e| RegistryError::Internal(format!("encode toolset: {e}")))?,
                None,
            )
            .await?;
        self.start_ping_loop(&toolset.name);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        self.store.remove(name).await?;
        self.registry_map.remove(name).await?;
        self.health.remove(name).await?;
        if let Some((_, handle)) = self.running_ping_loops.remove(name) {
            handle.abort();
        }
        Ok(())
    }

    pub async fn get_toolset(&self, name: &str) -> Result<Toolset, RegistryError> {
        let value = self
            .registry_map
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("toolset {name}")))?;
        serde_json::from_value(value)
            .map_err(|e| RegistryError::Internal(format!("decode toolset {name}: {e}")))
    }

    /// Superset match: returns toolsets whose tag set
    /// contains every tag in `tags`. An empty `tags` matches everything.
    pub async fn list_toolsets(&self, tags: &[String]) -> Result<Vec<Toolset>, RegistryError> {
        let wanted: HashSet<&str> = tags.iter().map(String::as_str).collect();
        let mut out = Vec::new();
        for (_, value) in self.registry_map.list().await? {
            let toolset: Toolset = serde_json::from_value(value)
                .map_err(|e| RegistryError::Internal(format!("decode toolset: {e}")))?;
            let have: HashSet<&str> = toolset.tags.iter().map(String::as_str).collect();
            if wanted.is_subset(&have) {
                out.push(toolset);
            }
        }
        Ok(out)
    }

    /// Case-insensitive substring match over name, description, and tags.
    pub async fn search(&self, query: &str) -> Result<Vec<Toolset>, RegistryError> {
        let needle = query.to_lowercase();
        let mut out = Vec::new();
        for (_, value) in self.registry_map.list().await? {
            let toolset: Toolset = serde_json::from_value(value)
                .map_err(|e| RegistryError::Internal(format!("decode toolset: {e}")))?;
            let hit = toolset.name.to_lowercase().contains(&needle)
                || toolset
                    .description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false)
                || toolset
                    .tags
                    .iter()
                    .any(|t| t.to_lowercase().contains(&needle));
            if hit {
                out.push(toolset);
            }
        }
        Ok(out)
    }

    /// Dispatches a call and returns its identifiers.
    /// The caller is expected to separately poll/subscribe the returned
    /// `result_stream_id` for frames matching `tool_use_id`
    /// (`poll_result_stream`, or the HTTP surface's equivalent route).
    pub async fn call_tool(
        &self,
        toolset_name: &str,
        tool_name: &str,
        payload: serde_json::Value,
    ) -> Result<(String, String), RegistryError> {
        let toolset = self.get_toolset(toolset_name).await?;
        if !self.health.is_healthy(toolset_name, Utc::now()).await? {
            return Err(RegistryError::ServiceUnavailable(format!(
                "toolset {toolset_name} has no healthy provider"
            )));
        }
        let tool = toolset.tool(tool_name).ok_or_else(|| {
            RegistryError::NotFound(format!("tool {toolset_name}.{tool_name}"))
        })?;
        crate::toolset::validate_payload(tool, &payload)?;

        let tool_use_id = Uuid::new_v4().to_string();
        let stream_id = self.result_streams.create_stream().await?;
        self.result_stream_index
            .set(
                &result_stream_index_key(&tool_use_id),
                serde_json::json!(stream_id),
                Some(self.result_stream_ttl_ms),
            )
            .await?;
        self.dispatcher
            .publish(
                toolset_name,
                CallMessage {
                    tool_use_id: tool_use_id.clone(),
                    tool: tool_name.to_string(),
                    payload,
                    parent_tool_call_id: None,
                },
            )
            .await?;
        Ok((tool_use_id, stream_id))
    }

    /// A provider's response to a previously dispatched call: looks up the stream via the shared `toolUseID →
    /// streamID` mapping so it works regardless of which node the provider
    /// is connected to, then publishes the terminal frame.
    pub async fn emit_tool_result(
        &self,
        tool_use_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), RegistryError> {
        let stream_id = self
            .result_stream_index
            .get(&result_stream_index_key(tool_use_id))
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                RegistryError::NotFound(format!("result stream routing for {tool_use_id}"))
            })?;
        self.result_streams
            .publish(
                &stream_id,
                StreamedFrame::Result {
                    tool_use_id: tool_use_id.to_string(),
                    result,
                    error,
                },
            )
            .await
    }

    pub async fn emit_output_delta(
        &self,
        tool_use_id: &str,
        delta: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let stream_id = self
            .result_stream_index
            .get(&result_stream_index_key(tool_use_id))
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                RegistryError::NotFound(format!("result stream routing for {tool_use_id}"))
            })?;
        self.result_streams
            .publish(
                &stream_id,
                StreamedFrame::OutputDelta {
                    tool_use_id: tool_use_id.to_string(),
                    delta,
                },
            )
            .await
    }

    /// Blocks until the canonical result for `tool_use_id` arrives on
    /// `stream_id`, or this node's configured call timeout elapses. Destroys
    /// the stream either way.
    pub async fn await_result(
        &self,
        stream_id: &str,
        tool_use_id: &str,
    ) -> Result<StreamedFrame, RegistryError> {
        let outcome = self
            .result_streams
            .wait_for_result(
                stream_id,
                tool_use_id,
                Duration::from_millis(self.call_timeout_ms as u64),
            )
            .await;
        self.result_streams.destroy(stream_id).await;
        outcome
    }

    /// Raw, unfiltered tail of `stream_id`: used by a
    /// `ResultStreamReader` that, like `RegistryExecutor` itself, matches
    /// frames by `tool_use_id` and forwards `OutputDelta`s before the
    /// terminal `Result` arrives.
    pub async fn subscribe_stream(
        &self,
        stream_id: &str,
    ) -> Result<Box<dyn crate::result_stream::FrameReceiver>, RegistryError> {
        self.result_streams.subscribe(stream_id).await
    }

    pub async fn destroy_stream(&self, stream_id: &str) {
        self.result_streams.destroy(stream_id).await
    }

    pub async fn pong(&self, toolset: &str) -> Result<(), RegistryError> {
        self.health.record_pong(toolset, Utc::now()).await
    }

    /// Idempotent: a second call for the same toolset on this node is a
    /// no-op and never tears down a ticker lease this node might be holding.
    pub fn start_ping_loop(self: &Arc<Self>, toolset: &str) {
        if self.running_ping_loops.contains_key(toolset) {
            return;
        }
        // Seed healthy immediately: a provider that hasn't pinged yet is not
        // reported unhealthy the instant it registers.
        let seed = self.clone();
        let seed_toolset = toolset.to_string();
        tokio::spawn(async move {
            let _ = seed.health.record_pong(&seed_toolset, Utc::now()).await;
        });

        let service = self.clone();
        let toolset = toolset.to_string();
        let interval_ms = self.ping_interval_ms;
        let handle = tokio::spawn(async move {
            let ticker_name = format!("ping:{toolset}");
            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms as u64)).await;
                match service
                    .ticker
                    .try_claim(&ticker_name, &service.node_id, interval_ms * 2)
                    .await
                {
                    Ok(true) => {
                        let _ = service.health.record_pong(&toolset, Utc::now()).await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(toolset = %toolset, error = %e, "ping tick failed");
                    }
                }
            }
        });
        self.running_ping_loops.insert(toolset.to_string(), handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicated_map::InMemoryReplicatedMap;
    use crate::request_stream::InMemoryRequestDispatcher;
    use crate::result_stream::InMemoryResultStreamBroker;
    use crate::store::InMemoryToolsetStore;
    use crate::ticker::InMemoryDistributedTicker;
    use crate::toolset::ToolSchema;
    use std::collections::HashMap;

    fn sample(name: &str) -> Toolset {
        Toolset {
            name: name.into(),
            description: Some("a sample toolset".into()),
            version: None,
            tags: vec!["db".into()],
            tools: vec![ToolSchema {
                name: "query".into(),
                description: "run a query".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"sql": {"type": "string"}},
                    "required": ["sql"]
                }),
                output_schema: None,
            }],
            metadata: HashMap::new(),
            stream_id: None,
            registered_at: None,
        }
    }

    fn harness() -> (Arc<RegistryService>, Arc<RegistryService>) {
        let registry_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
        let health_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
        let ticker: Arc<dyn DistributedTicker> = Arc::new(InMemoryDistributedTicker::new());
        let result_streams: Arc<dyn ResultStreamBroker> =
            Arc::new(InMemoryResultStreamBroker::new());
        let result_stream_index: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
        let dispatcher: Arc<dyn RequestDispatcher> = Arc::new(InMemoryRequestDispatcher::new());

        let make = |node_id: &str| {
            Arc::new(RegistryService::new(
                node_id.to_string(),
                registry_map.clone(),
                Arc::new(HealthTracker::new(health_map.clone(), 50, 2)),
                ticker.clone(),
                Arc::new(InMemoryToolsetStore::new()) as Arc<dyn ToolsetStore>,
                result_streams.clone(),
                result_stream_index.clone(),
                dispatcher.clone(),
                50,
                1_000,
                60_000,
            ))
        };
        (make("node-1"), make("node-2"))
    }

    #[tokio::test]
    async fn register_then_get_round_trips_on_another_node() {
        let (node1, node2) = harness();
        node1.register(sample("data")).await.unwrap();
        let fetched = node2.get_toolset("data").await.unwrap();
        assert_eq!(fetched.name, "data");
        assert_eq!(fetched.tools.len(), 1);
    }

    #[tokio::test]
    async fn register_again_replaces_prior_value() {
        let (node1, _node2) = harness();
        node1.register(sample("data")).await.unwrap();
        let mut updated = sample("data");
        updated.tags.push("extra".into());
        node1.register(updated).await.unwrap();
        let fetched = node1.get_toolset("data").await.unwrap();
        assert_eq!(fetched.tags, vec!["db".to_string(), "extra".to_string()]);
    }

    #[tokio::test]
    async fn cross_node_list_and_unregister_round_trip() {
        let (node1, node2) = harness();
        node1.register(sample("data")).await.unwrap();
        assert_eq!(
            node2
                .list_toolsets(&[])
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.name)
                .collect::<Vec<_>>(),
            vec!["data".to_string()]
        );
        node2.unregister("data").await.unwrap();
        assert!(matches!(
            node1.get_toolset("data").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn search_matches_name_description_and_tags() {
        let (node1, _) = harness();
        node1.register(sample("data")).await.unwrap();
        assert_eq!(node1.search("DATA").await.unwrap().len(), 1);
        assert_eq!(node1.search("sample").await.unwrap().len(), 1);
        assert_eq!(node1.search("db").await.unwrap().len(), 1);
        assert!(node1.search("nonexistent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_toolsets_filters_by_tag_superset() {
        let (node1, _) = harness();
        node1.register(sample("data")).await.unwrap();
        let mut other = sample("cache");
        other.tags = vec!["db".into(), "fast".into()];
        node1.register(other).await.unwrap();

        let both_tags = node1
            .list_toolsets(&["db".to_string(), "fast".to_string()])
            .await
            .unwrap();
        assert_eq!(both_tags.len(), 1);
        assert_eq!(both_tags[0].name, "cache");
    }

    #[tokio::test]
    async fn register_with_invalid_schema_is_rejected() {
        let (node1, _) = harness();
        let mut bad = sample("data");
        bad.tools[0].input_schema = serde_json::Value::Null;
        assert!(matches!(
            node1.register(bad).await,
            Err(RegistryError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn call_tool_on_unhealthy_toolset_is_service_unavailable() {
        let (node1, _) = harness();
        // Register writes straight to the map without seeding health because
        // start_ping_loop's seed task is spawned, not awaited; call
        // immediately so the race favors "not yet healthy".
        node1.register(sample("data")).await.unwrap();
        node1.health.remove("data").await.unwrap();
        let result = node1.call_tool("data", "query", serde_json::json!({"sql": "x"})).await;
        assert!(matches!(result, Err(RegistryError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn call_tool_rejects_payload_missing_required_field() {
        let (node1, _) = harness();
        node1.register(sample("data")).await.unwrap();
        node1.pong("data").await.unwrap();
        let result = node1.call_tool("data", "query", serde_json::json!({})).await;
        assert!(matches!(result, Err(RegistryError::ValidationError(_))));
    }

    #[tokio::test]
    async fn call_tool_unknown_toolset_is_not_found() {
        let (node1, _) = harness();
        let result = node1.call_tool("ghost", "query", serde_json::json!({})).await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn cross_node_call_tool_and_emit_result_round_trip() {
        let (node1, node2) = harness();
        node1.register(sample("data")).await.unwrap();
        node1.pong("data").await.unwrap();

        let (tool_use_id, stream_id) = node1
            .call_tool("data", "query", serde_json::json!({"sql": "select 1"}))
            .await
            .unwrap();

        // node2 represents the provider's node: it received the dispatched
        // call and answers it without knowing which node originated it.
        let mut sub = node2.dispatcher.subscribe("data").await.unwrap();
        // Message was published before the subscription in this harness, so
        // publish again to simulate node2 having been subscribed already.
        node1
            .dispatcher
            .publish(
                "data",
                CallMessage {
                    tool_use_id: tool_use_id.clone(),
                    tool: "query".into(),
                    payload: serde_json::json!({"sql": "select 1"}),
                    parent_tool_call_id: None,
                },
            )
            .await
            .unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.tool_use_id, tool_use_id);

        node2
            .emit_tool_result(&tool_use_id, Some(serde_json::json!({"rows": 1})), None)
            .await
            .unwrap();

        let frame = node1.await_result(&stream_id, &tool_use_id).await.unwrap();
        match frame {
            StreamedFrame::Result { result, .. } => {
                assert_eq!(result, Some(serde_json::json!({"rows": 1})))
            }
            _ => panic!("expected a result frame"),
        }
    }

    #[tokio::test]
    async fn start_ping_loop_twice_is_idempotent() {
        let (node1, _) = harness();
        node1.register(sample("data")).await.unwrap();
        assert_eq!(node1.running_ping_loops.len(), 1);
        node1.start_ping_loop("data");
        assert_eq!(node1.running_ping_loops.len(), 1);
    }
}
