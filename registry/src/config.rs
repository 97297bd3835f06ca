//! Registry node configuration: `clap::Parser` with `env` fallbacks, the
//! same pattern the CLI binary uses for its own `Args` struct.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "shuttle-registry")]
#[command(about = "Clustered tool registry node")]
pub struct RegistryConfig {
    /// Address this node's JSON/HTTP surface listens on.
    #[arg(long, env = "REGISTRY_LISTEN_ADDR", default_value = "127.0.0.1:8090")]
    pub listen_addr: String,

    /// Redis URL backing the registry map, health map, and result streams.
    #[arg(long, env = "REGISTRY_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Logical cluster name; namespaces the Redis keys this node shares with peers.
    #[arg(long, env = "REGISTRY_CLUSTER_NAME", default_value = "default")]
    pub cluster_name: String,

    /// This node's identity for distributed-ticker ownership and provenance.
    #[arg(long, env = "REGISTRY_NODE_ID")]
    pub node_id: Option<String>,

    /// Milliseconds between health pings for a toolset under this node's care.
    #[arg(long, env = "REGISTRY_PING_INTERVAL_MS", default_value_t = 5_000)]
    pub ping_interval_ms: i64,

    /// Consecutive missed pings tolerated before a toolset is unhealthy.
    #[arg(long, env = "REGISTRY_MISSED_PING_THRESHOLD", default_value_t = 2)]
    pub missed_ping_threshold: u32,

    /// TTL for the `registry:result-stream:<toolUseID>` routing entry.
    #[arg(long, env = "REGISTRY_RESULT_STREAM_TTL_MS", default_value_t = 300_000)]
    pub result_stream_ttl_ms: i64,

    /// How long `CallTool` waits for a provider's result before timing out.
    #[arg(long, env = "REGISTRY_CALL_TIMEOUT_MS", default_value_t = 30_000)]
    pub call_timeout_ms: i64,
}

impl RegistryConfig {
    pub fn resolved_node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()))
    }
}
