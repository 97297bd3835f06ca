//! `shuttle` CLI: a demo binary wiring an in-memory engine, a scripted
//! planner, and the tool registry together — the runtime's external surface
//! exercised end to end from the command line, the way a CLI binary wires a
//! runner together with its tool sources.
//!
//! Subcommands: `run` (start a run and print its transcript), `registry`
//! (serve the clustered tool registry's RPC surface over HTTP).

mod demo;
mod log_format;
mod logging;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use shuttle_core::session::Unsubscribe;
use shuttle_registry::RegistryConfig;
use shuttle_stream_event::{ChatSubscriber, DebugSubscriber, StreamFrame, StreamSink};

#[derive(Parser, Debug)]
#[command(name = "shuttle")]
#[command(about = "shuttle — agent execution runtime demo CLI")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a demo run and print its transcript to stdout.
    Run(RunArgs),
    /// Serve the clustered tool registry's RPC surface over HTTP.
    Registry(RegistryArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// User message (or pass as trailing positional args).
    #[arg(short, long, value_name = "TEXT")]
    message: Option<String>,

    /// Positional args: user message when -m/--message is not used.
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,

    /// Print every lifecycle event (debug profile) instead of just chat frames.
    #[arg(long)]
    debug: bool,

    /// Write every frame as one JSON line instead of human-readable output.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct RegistryArgs {
    #[command(flatten)]
    config: RegistryConfig,
}

/// A sink that prints each frame to stdout, either as a short human-readable
/// line or as one compact JSON object per frame (`--json`).
struct StdoutSink {
    json: bool,
}

impl StreamSink for StdoutSink {
    fn send(&self, frame: StreamFrame) -> Result<(), shuttle_stream_event::SinkError> {
        if self.json {
            let line = serde_json::to_string(&frame)
                .map_err(|e| shuttle_stream_event::SinkError(e.to_string()))?;
            println!("{line}");
        } else {
            println!("[{}] {}", frame.frame_type, frame.payload);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), shuttle_stream_event::SinkError> {
        Ok(())
    }
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let message = args
        .message
        .or_else(|| (!args.rest.is_empty()).then(|| args.rest.join(" ")))
        .unwrap_or_else(|| "hello from the shuttle demo CLI".to_string());

    let registry_cfg = RegistryConfig::parse_from(["shuttle"]);
    let demo = demo::build(message, &registry_cfg).await;

    let run_id = format!("run-{}", uuid::Uuid::new_v4());
    let sink: Arc<dyn StreamSink> = Arc::new(StdoutSink { json: args.json });
    let subscriber: Arc<dyn shuttle_stream_event::EventSubscriber> = if args.debug {
        Arc::new(DebugSubscriber::new(sink))
    } else {
        Arc::new(ChatSubscriber::new(sink))
    };
    let unsubscribe: Unsubscribe = demo.orchestrator.subscribe_run(&run_id, subscriber);

    let input = shuttle_core::RunInput::new("shuttle-demo-agent", run_id);
    let output = demo.orchestrator.run(input).await?;
    unsubscribe.unsubscribe();

    println!("status: {:?}", output.status);
    if let Some(message) = output.final_message {
        println!("{}", message.text_content());
    }
    Ok(())
}

async fn serve_registry(args: RegistryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = args.config;
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    shuttle_config::load_and_apply("shuttle", None::<&std::path::Path>).ok();
    logging::init()?;

    let args = Args::parse();
    match args.cmd {
        Command::Run(run_args) => run(run_args).await,
        Command::Registry(registry_args) => serve_registry(registry_args).await,
    }
}
