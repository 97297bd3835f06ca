//! Clustered tool registry: toolset catalog, Redis-backed
//! replicated maps for cross-node registry/health state, a distributed
//! ticker for leader-free ping ownership, per-call ephemeral result streams,
//! and the `RegistryService` that ties them into one RPC surface.
//! `http` exposes that surface over axum; `client` implements
//! `shuttle_core`'s `RegistryClient`/`ResultStreamReader` contracts so a
//! caller (the CLI demo binary, or any other agent host) can reach a
//! registry node without depending on its transport details.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod replicated_map;
pub mod request_stream;
pub mod result_stream;
pub mod service;
pub mod store;
pub mod ticker;
pub mod toolset;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use health::HealthTracker;
pub use replicated_map::{InMemoryReplicatedMap, RedisReplicatedMap, ReplicatedMap};
pub use request_stream::{
    CallMessage, InMemoryRequestDispatcher, RedisRequestDispatcher, RequestDispatcher,
};
pub use result_stream::{
    InMemoryResultStreamBroker, RedisResultStreamBroker, ResultStreamBroker, StreamedFrame,
};
pub use service::RegistryService;
pub use store::{InMemoryToolsetStore, RedisToolsetStore, ToolsetStore};
pub use ticker::{DistributedTicker, InMemoryDistributedTicker, RedisDistributedTicker};
pub use toolset::{validate_payload, validate_schema_document, validate_toolset, Toolset, ToolSchema};

use std::sync::Arc;

/// Builds a fully in-memory `RegistryService`: convenient for the CLI demo
/// binary and for tests that don't need a real Redis cluster.
pub fn in_memory_service(node_id: impl Into<String>, cfg: &RegistryConfig) -> Arc<RegistryService> {
    let registry_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
    let health_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
    Arc::new(RegistryService::new(
        node_id.into(),
        registry_map,
        Arc::new(HealthTracker::new(
            health_map,
            cfg.ping_interval_ms,
            cfg.missed_ping_threshold,
        )),
        Arc::new(InMemoryDistributedTicker::new()),
        Arc::new(InMemoryToolsetStore::new()),
        Arc::new(InMemoryResultStreamBroker::new()),
        Arc::new(InMemoryReplicatedMap::new()),
        Arc::new(InMemoryRequestDispatcher::new()),
        cfg.ping_interval_ms,
        cfg.call_timeout_ms,
        cfg.result_stream_ttl_ms,
    ))
}

/// Builds a `RegistryService` wired to a real Redis deployment: every
/// replicated map, the distributed ticker, the toolset store, the result
/// stream broker, and the request dispatcher are all Redis-backed, namespaced
/// under `cfg.cluster_name`.
pub fn redis_service(node_id: impl Into<String>, cfg: &RegistryConfig) -> Result<Arc<RegistryService>, RegistryError> {
    let client = redis::Client::open(cfg.redis_url.clone())
        .map_err(|e| RegistryError::ServiceUnavailable(format!("redis url: {e}")))?;

    let registry_map: Arc<dyn ReplicatedMap> = Arc::new(RedisReplicatedMap::new(
        client.clone(),
        format!("{}:toolsets", cfg.cluster_name),
    ));
    let health_map: Arc<dyn ReplicatedMap> = Arc::new(RedisReplicatedMap::new(
        client.clone(),
        format!("{}:health", cfg.cluster_name),
    ));
    let result_stream_index: Arc<dyn ReplicatedMap> = Arc::new(RedisReplicatedMap::new(
        client.clone(),
        format!("{}:result-stream-index", cfg.cluster_name),
    ));

    Ok(Arc::new(RegistryService::new(
        node_id.into(),
        registry_map,
        Arc::new(HealthTracker::new(
            health_map,
            cfg.ping_interval_ms,
            cfg.missed_ping_threshold,
        )),
        Arc::new(RedisDistributedTicker::new(
            client.clone(),
            cfg.cluster_name.clone(),
        )),
        Arc::new(RedisToolsetStore::new(client.clone(), cfg.cluster_name.clone())),
        Arc::new(RedisResultStreamBroker::new(client.clone())),
        result_stream_index,
        Arc::new(RedisRequestDispatcher::new(client)),
        cfg.ping_interval_ms,
        cfg.call_timeout_ms,
        cfg.result_stream_ttl_ms,
    )))
}
