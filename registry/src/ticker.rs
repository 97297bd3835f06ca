//! Distributed ticker: cluster-wide leader-election-by-lease for
//! "who pings this toolset's providers right now", using the classic
//! Redis `SET key val NX PX ttl` / refresh-while-holder pattern.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::error::RegistryError;

/// Tries to become, or remain, the single node responsible for ticking
/// `name` every `ttl_ms` milliseconds. Any node can call `try_claim`; exactly
/// one node's call returns `true` at a time (mutual exclusion via the lease).
#[async_trait]
pub trait DistributedTicker: Send + Sync {
    async fn try_claim(&self, name: &str, node_id: &str, ttl_ms: i64) -> Result<bool, RegistryError>;
}

struct Lease {
    holder: String,
    expires_at: chrono::DateTime<Utc>,
}

/// In-process reference implementation, shared across simulated nodes via a
/// common `Arc<InMemoryDistributedTicker>` the same way [`crate::replicated_map::InMemoryReplicatedMap`]
/// stands in for a shared Redis instance in tests.
#[derive(Default)]
pub struct InMemoryDistributedTicker {
    leases: DashMap<String, Lease>,
}

impl InMemoryDistributedTicker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedTicker for InMemoryDistributedTicker {
    async fn try_claim(&self, name: &str, node_id: &str, ttl_ms: i64) -> Result<bool, RegistryError> {
        let now = Utc::now();
        let new_expiry = now + chrono::Duration::milliseconds(ttl_ms);
        let mut lease = self.leases.entry(name.to_string()).or_insert_with(|| Lease {
            holder: node_id.to_string(),
            expires_at: now - chrono::Duration::milliseconds(1),
        });
        if lease.holder == node_id || lease.expires_at <= now {
            lease.holder = node_id.to_string();
            lease.expires_at = new_expiry;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Redis-backed ticker: `SET name node_id NX PX ttl_ms` to claim when no
/// holder exists or the lease expired; while already the holder, refreshes
/// via an unconditional `SET ... PX ttl_ms` instead (a node only refreshes
/// its own lease, never another's).
pub struct RedisDistributedTicker {
    client: redis::Client,
    key_prefix: String,
}

impl RedisDistributedTicker {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:ticker:{name}", self.key_prefix)
    }
}

#[async_trait]
impl DistributedTicker for RedisDistributedTicker {
    async fn try_claim(&self, name: &str, node_id: &str, ttl_ms: i64) -> Result<bool, RegistryError> {
        let mut conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        let key = self.key(name);

        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        if current.as_deref() == Some(node_id) {
            let refreshed: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(node_id)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
            return Ok(refreshed.is_some());
        }

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(node_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| RegistryError::ServiceUnavailable(format!("redis: {e}")))?;
        Ok(claimed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claimer_wins_and_second_node_is_refused() {
        let ticker = InMemoryDistributedTicker::new();
        assert!(ticker.try_claim("toolset-a", "node-1", 5_000).await.unwrap());
        assert!(!ticker.try_claim("toolset-a", "node-2", 5_000).await.unwrap());
    }

    #[tokio::test]
    async fn holder_can_refresh_its_own_lease() {
        let ticker = InMemoryDistributedTicker::new();
        assert!(ticker.try_claim("toolset-a", "node-1", 5_000).await.unwrap());
        assert!(ticker.try_claim("toolset-a", "node-1", 5_000).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reclaimed_by_another_node() {
        let ticker = InMemoryDistributedTicker::new();
        assert!(ticker.try_claim("toolset-a", "node-1", -1).await.unwrap());
        assert!(ticker.try_claim("toolset-a", "node-2", 5_000).await.unwrap());
    }
}
