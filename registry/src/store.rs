//! Authoritative toolset storage: the
//! registry map is an ephemeral cluster-wide cache; this store is what a node
//! replays from on restart to reissue `StartPingLoop` for every toolset it
//! previously knew about.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::RegistryError;
use crate::toolset::Toolset;

#[async_trait]
pub trait ToolsetStore: Send + Sync {
    async fn put(&self, toolset: Toolset) -> Result<(), RegistryError>;
    async fn remove(&self, name: &str) -> Result<(), RegistryError>;
    async fn get(&self, name: &str) -> Result<Option<Toolset>, RegistryError>;
    async fn list(&self) -> Result<Vec<Toolset>, RegistryError>;
}

#[derive(Default)]
pub struct InMemoryToolsetStore {
    toolsets: DashMap<String, Toolset>,
}

impl InMemoryToolsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolsetStore for InMemoryToolsetStore {
    async fn put(&self, toolset: Toolset) -> Result<(), RegistryError> {
        self.toolsets.insert(toolset.name.clone(), toolset);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        self.toolsets.remove(name);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Toolset>, RegistryError> {
        Ok(self.toolsets.get(name).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Toolset>, RegistryError> {
        Ok(self.toolsets.iter().map(|e| e.value().clone()).collect())
    }
}

/// Redis-backed store: one hash (`<cluster_name>:toolsets:store`) keyed by
/// toolset name, JSON-encoded values. Unlike [`crate::replicated_map::RedisReplicatedMap`]
/// this carries no TTL — a toolset's durable record outlives any one node's
/// process, which is the point of "startup reconciliation": the
/// registry map is rebuilt from this store, not the other way around.
pub struct RedisToolsetStore {
    client: redis::Client,
    hash_key: String,
}

impl RedisToolsetStore {
    pub fn new(client: redis::Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            hash_key: format!("{}:toolsets:store", cluster_name.into()),
        }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, RegistryError> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))
    }
}

#[async_trait]
impl ToolsetStore for RedisToolsetStore {
    async fn put(&self, toolset: Toolset) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string(&toolset)
            .map_err(|e| RegistryError::Internal(format!("encode toolset: {e}")))?;
        let mut conn = self.connection().await?;
        redis::AsyncCommands::hset::<_, _, _, ()>(&mut conn, &self.hash_key, &toolset.name, encoded)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut conn = self.connection().await?;
        redis::AsyncCommands::hdel::<_, _, ()>(&mut conn, &self.hash_key, name)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Toolset>, RegistryError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::AsyncCommands::hget(&mut conn, &self.hash_key, name)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        let Some(raw) = raw else { return Ok(None) };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RegistryError::Internal(format!("decode toolset {name}: {e}")))
    }

    async fn list(&self) -> Result<Vec<Toolset>, RegistryError> {
        let mut conn = self.connection().await?;
        let all: HashMap<String, String> =
            redis::AsyncCommands::hgetall(&mut conn, &self.hash_key)
                .await
                .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        all.into_values()
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| RegistryError::Internal(format!("decode toolset: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::toolset::ToolSchema;

    fn sample(name: &str) -> Toolset {
        Toolset {
            name: name.into(),
            description: None,
            version: None,
            tags: vec![],
            tools: vec![ToolSchema {
                name: "noop".into(),
                description: "".into(),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: None,
            }],
            metadata: HashMap::new(),
            stream_id: None,
            registered_at: None,
        }
    }

    #[tokio::test]
    async fn put_then_list_round_trips() {
        let store = InMemoryToolsetStore::new();
        store.put(sample("a")).await.unwrap();
        store.put(sample("b")).await.unwrap();
        let mut names: Vec<_> = store.list().await.unwrap().into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let store = InMemoryToolsetStore::new();
        store.put(sample("a")).await.unwrap();
        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
