//! Replicated key/value map: the registry map and health map are
//! both instances of this same contract, shared cluster-wide via Redis.
//! One trait, a Redis-backed production implementation, and an in-memory
//! reference used by tests (here
//! the in-memory impl doubles as the "shared state between cluster nodes"
//! fixture, since a test constructs two `RegistryService`s over the same
//! `Arc<dyn ReplicatedMap>` to stand in for two nodes against one Redis).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde_json::Value;

use crate::error::RegistryError;

/// A cluster-shared map keyed by string, storing JSON values, with optional
/// per-entry TTL. `set`/`get`/`remove`/`list` are the only operations the
/// registry needs.
#[async_trait]
pub trait ReplicatedMap: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl_ms: Option<i64>) -> Result<(), RegistryError>;
    async fn get(&self, key: &str) -> Result<Option<Value>, RegistryError>;
    async fn remove(&self, key: &str) -> Result<(), RegistryError>;
    async fn list(&self) -> Result<Vec<(String, Value)>, RegistryError>;
}

struct Entry {
    value: Value,
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// In-process reference implementation. Two [`crate::service::RegistryService`]
/// instances sharing the same `Arc<InMemoryReplicatedMap>` behave like two
/// nodes against one Redis deployment, for tests.
#[derive(Default)]
pub struct InMemoryReplicatedMap {
    entries: DashMap<String, Entry>,
}

impl InMemoryReplicatedMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry, now: chrono::DateTime<Utc>) -> bool {
        entry.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

#[async_trait]
impl ReplicatedMap for InMemoryReplicatedMap {
    async fn set(&self, key: &str, value: Value, ttl_ms: Option<i64>) -> Result<(), RegistryError> {
        let expires_at = ttl_ms.map(|ms| Utc::now() + chrono::Duration::milliseconds(ms));
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RegistryError> {
        let now = Utc::now();
        Ok(self.entries.get(key).and_then(|e| {
            if Self::is_live(&e, now) {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn remove(&self, key: &str) -> Result<(), RegistryError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, Value)>, RegistryError> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| Self::is_live(e.value(), now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect())
    }
}

/// Redis-backed replicated map: one hash per map name (`<prefix>`), with
/// per-entry TTL emulated via a JSON envelope carrying its own expiry, since
/// Redis hash fields have no independent TTL — mirrors how the in-memory map
/// tracks expiry itself rather than relying on automatic eviction.
pub struct RedisReplicatedMap {
    client: redis::Client,
    hash_key: String,
}

impl RedisReplicatedMap {
    pub fn new(client: redis::Client, hash_key: impl Into<String>) -> Self {
        Self {
            client,
            hash_key: hash_key.into(),
        }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, RegistryError> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    value: Value,
    expires_at_millis: Option<i64>,
}

#[async_trait]
impl ReplicatedMap for RedisReplicatedMap {
    async fn set(&self, key: &str, value: Value, ttl_ms: Option<i64>) -> Result<(), RegistryError> {
        let expires_at_millis = ttl_ms.map(|ms| Utc::now().timestamp_millis() + ms);
        let envelope = Envelope {
            value,
            expires_at_millis,
        };
        let encoded = serde_json::to_string(&envelope)
            .map_err(|e| RegistryError::Internal(format!("encode: {e}")))?;
        let mut conn = self.connection().await?;
        conn.hset::<_, _, _, ()>(&self.hash_key, key, encoded)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RegistryError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .hget(&self.hash_key, key)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        let Some(raw) = raw else { return Ok(None) };
        let envelope: Envelope = serde_json::from_str(&raw)
            .map_err(|e| RegistryError::Internal(format!("decode: {e}")))?;
        if let Some(expires_at_millis) = envelope.expires_at_millis {
            if Utc::now().timestamp_millis() >= expires_at_millis {
                let _ = self.remove(key).await;
                return Ok(None);
            }
        }
        Ok(Some(envelope.value))
    }

    async fn remove(&self, key: &str) -> Result<(), RegistryError> {
        let mut conn = self.connection().await?;
        conn.hdel::<_, _, ()>(&self.hash_key, key)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, Value)>, RegistryError> {
        let mut conn = self.connection().await?;
        let all: HashMap<String, String> = conn
            .hgetall(&self.hash_key)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        let now = Utc::now().timestamp_millis();
        let mut live = Vec::with_capacity(all.len());
        for (key, raw) in all {
            let envelope: Envelope = match serde_json::from_str(&raw) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if envelope
                .expires_at_millis
                .map(|exp| now >= exp)
                .unwrap_or(false)
            {
                continue;
            }
            live.push((key, envelope.value));
        }
        Ok(live)
    }
}

pub fn shared_in_memory() -> Arc<dyn ReplicatedMap> {
    Arc::new(InMemoryReplicatedMap::new())
}
