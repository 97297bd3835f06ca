//! Health tracking: a toolset is healthy while its last recorded
//! pong is within `(missed_ping_threshold + 1) * ping_interval_ms` of now.
//! Newly registered toolsets are seeded healthy at `StartPingLoop` time so a
//! provider that hasn't pinged yet isn't immediately reported unhealthy.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::RegistryError;
use crate::replicated_map::ReplicatedMap;

pub struct HealthTracker {
    map: Arc<dyn ReplicatedMap>,
    ping_interval_ms: i64,
    missed_ping_threshold: u32,
}

impl HealthTracker {
    pub fn new(map: Arc<dyn ReplicatedMap>, ping_interval_ms: i64, missed_ping_threshold: u32) -> Self {
        Self {
            map,
            ping_interval_ms,
            missed_ping_threshold,
        }
    }

    fn staleness_threshold_ms(&self) -> i64 {
        (self.missed_ping_threshold as i64 + 1) * self.ping_interval_ms
    }

    /// Records a pong (or the ping-loop's own heartbeat) for `toolset`.
    pub async fn record_pong(&self, toolset: &str, now: DateTime<Utc>) -> Result<(), RegistryError> {
        self.map
            .set(toolset, serde_json::json!(now.timestamp_millis()), None)
            .await
    }

    pub async fn is_healthy(&self, toolset: &str, now: DateTime<Utc>) -> Result<bool, RegistryError> {
        let Some(value) = self.map.get(toolset).await? else {
            return Ok(false);
        };
        let last_pong_millis = value
            .as_i64()
            .ok_or_else(|| RegistryError::Internal("health entry is not a timestamp".into()))?;
        Ok(now.timestamp_millis() - last_pong_millis <= self.staleness_threshold_ms())
    }

    pub async fn remove(&self, toolset: &str) -> Result<(), RegistryError> {
        self.map.remove(toolset).await
    }
}
