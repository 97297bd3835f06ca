//! Registry node binary: one process joining a cluster named by
//! `--cluster-name`. Reconciles its toolset store into the registry map on
//! startup, then serves the RPC surface from [`shuttle_registry::http`].

use clap::Parser;
use shuttle_registry::RegistryConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    shuttle_config::load_and_apply("shuttle-registry", None::<&std::path::Path>).ok();
    init_tracing();

    let cfg = RegistryConfig::parse();
    let node_id = cfg.resolved_node_id();
    tracing::info!(node_id = %node_id, cluster = %cfg.cluster_name, addr = %cfg.listen_addr, "starting registry node");

    let service = shuttle_registry::redis_service(node_id, &cfg)?;
    service.reconcile_on_startup().await?;

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    let app = shuttle_registry::http::router(service);
    tracing::info!(addr = %cfg.listen_addr, "registry listening");
    axum::serve(listener, app).await?;
    Ok(())
}
