//! Demo wiring: one `RunLoop` backed by an in-memory engine, a scripted
//! planner, a directly-invoked "echo" activity tool, and a registry-backed
//! tool served by an in-process provider loop — all in one process, assembling
//! a runner together with its tool sources and an in-memory checkpointer for
//! local/offline use.
//!
//! A real deployment plugs in an LLM-backed [`shuttle_core::Planner`] and a
//! durable [`shuttle_core::Engine`] in place of the pieces built here; this
//! binary only has to prove the wiring, since both of those are explicitly
//! out of scope for this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use shuttle_core::{
    ActivityExecutor, ActivityRunner, AgentMessage, DefaultPolicy, EngineError, ExecutorError,
    PlanResult, Planner, PlannerError, RegistryExecutor, Role, RunContext, RunInput, RunLoop,
    RunOrchestrator, ScriptedPlanner, Stores, ToolExecutor, ToolId, ToolRequest, ToolResult,
};
use shuttle_core::engine::InMemoryEngine;
use shuttle_stream_event::EventBus;
use shuttle_registry::{
    HealthTracker, InMemoryDistributedTicker, InMemoryReplicatedMap, InMemoryRequestDispatcher,
    InMemoryResultStreamBroker, InMemoryToolsetStore, RegistryConfig, RegistryService,
    ReplicatedMap, RequestDispatcher, ToolSchema, Toolset,
};
use shuttle_registry::client::{reader_factory, InProcessRegistryClient};

const ACTIVITY_TOOLSET: &str = "local";
const ACTIVITY_TOOL: &str = "echo";
const REGISTRY_TOOLSET: &str = "demo";
const REGISTRY_TOOL: &str = "uppercase";

/// Runs whatever payload it's handed straight back out, unchanged. Stands in
/// for a real activity (a database call, a file read) that a durable engine
/// would schedule and retry on the caller's behalf.
struct EchoActivity;

#[async_trait]
impl ActivityRunner for EchoActivity {
    async fn run_activity(
        &self,
        _queue: Option<&str>,
        _retry_policy: Option<&shuttle_core::RetryPolicy>,
        _tool_id: &str,
        payload: Value,
    ) -> Result<Value, ExecutorError> {
        Ok(payload)
    }
}

/// Registers a one-tool "demo" toolset and spawns an in-process provider loop
/// that answers every dispatched call by uppercasing its `text` field — just
/// enough behavior to prove `RegistryExecutor`'s call → stream → result path
/// end to end without a second process.
async fn build_registry_service(cfg: &RegistryConfig) -> Arc<RegistryService> {
    let dispatcher = Arc::new(InMemoryRequestDispatcher::new());
    let registry_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
    let health_map: Arc<dyn ReplicatedMap> = Arc::new(InMemoryReplicatedMap::new());
    let service = Arc::new(RegistryService::new(
        format!("demo-{}", uuid::Uuid::new_v4()),
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
        dispatcher.clone() as Arc<dyn RequestDispatcher>,
        cfg.ping_interval_ms,
        cfg.call_timeout_ms,
        cfg.result_stream_ttl_ms,
    ));

    service
        .register(Toolset {
            name: REGISTRY_TOOLSET.to_string(),
            description: Some("demo toolset served in-process by the CLI".to_string()),
            version: Some("0.1.0".to_string()),
            tags: vec!["demo".to_string()],
            tools: vec![ToolSchema {
                name: REGISTRY_TOOL.to_string(),
                description: "uppercases the given text".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
                output_schema: None,
            }],
            metadata: HashMap::new(),
            stream_id: None,
            registered_at: None,
        })
        .await
        .expect("demo toolset registration is well-formed");

    let provider = service.clone();
    tokio::spawn(async move {
        let Ok(mut sub) = dispatcher.subscribe(REGISTRY_TOOLSET).await else {
            return;
        };
        loop {
            match sub.recv().await {
                Ok(call) => {
                    let text = call.payload.get("text").and_then(Value::as_str).unwrap_or("");
                    let result = serde_json::json!({ "text": text.to_uppercase() });
                    let _ = provider.emit_tool_result(&call.tool_use_id, Some(result), None).await;
                }
                Err(_) => break,
            }
        }
    });

    service
}

fn build_executors(registry_service: Arc<RegistryService>) -> HashMap<ToolId, Arc<ToolExecutor>> {
    let mut executors: HashMap<ToolId, Arc<ToolExecutor>> = HashMap::new();
    executors.insert(
        ToolId::new(ACTIVITY_TOOLSET, ACTIVITY_TOOL),
        Arc::new(ToolExecutor::Activity(ActivityExecutor::new(Arc::new(EchoActivity)))),
    );

    let client = Arc::new(InProcessRegistryClient::new(registry_service.clone()));
    let readers = reader_factory(registry_service, Duration::from_secs(5));
    executors.insert(
        ToolId::new(REGISTRY_TOOLSET, REGISTRY_TOOL),
        Arc::new(ToolExecutor::Registry(RegistryExecutor::new(client, readers))),
    );
    executors
}

/// One scripted plan per CLI invocation: call both demo tools, then answer
/// with a final message summarizing what each returned. Stands in for a real
/// planner, which would read the transcript and decide this for itself.
struct DemoPlanner {
    message: String,
}

#[async_trait]
impl Planner for DemoPlanner {
    async fn plan_start(
        &self,
        _input: &RunInput,
        _ctx: &RunContext,
    ) -> Result<PlanResult, PlannerError> {
        Ok(PlanResult::ToolCalls(vec![
            ToolRequest {
                tool_id: ToolId::new(ACTIVITY_TOOLSET, ACTIVITY_TOOL),
                payload: serde_json::json!({ "text": self.message }),
                tool_call_id: "tc-echo".to_string(),
                parent_tool_call_id: None,
            },
            ToolRequest {
                tool_id: ToolId::new(REGISTRY_TOOLSET, REGISTRY_TOOL),
                payload: serde_json::json!({ "text": self.message }),
                tool_call_id: "tc-uppercase".to_string(),
                parent_tool_call_id: None,
            },
        ]))
    }

    async fn plan_resume(
        &self,
        _input: &RunInput,
        _ctx: &RunContext,
        results: &[ToolResult],
    ) -> Result<PlanResult, PlannerError> {
        let mut summary = String::new();
        for result in results {
            if result.is_success() {
                summary.push_str(&format!(
                    "{} -> {}\n",
                    result.tool_id,
                    result.result.clone().unwrap_or(Value::Null)
                ));
            } else {
                summary.push_str(&format!(
                    "{} failed: {}\n",
                    result.tool_id,
                    result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default()
                ));
            }
        }
        Ok(PlanResult::Final(AgentMessage::text(Role::Assistant, summary.trim_end())))
    }
}

/// Everything a demo invocation needs: the submission front door and the
/// registry node backing its registry-routed tool, kept alive for as long as
/// the run needs it (its provider loop holds the only other handle).
pub struct Demo {
    pub orchestrator: RunOrchestrator,
    pub bus: Arc<EventBus>,
    _registry: Arc<RegistryService>,
}

/// Assembles one `Demo`: an in-memory engine, the scripted planner seeded
/// with `message`, both demo tools, and a fresh event bus a caller can
/// subscribe to before starting the run.
pub async fn build(message: String, registry_cfg: &RegistryConfig) -> Demo {
    let registry_service = build_registry_service(registry_cfg).await;
    let executors = build_executors(registry_service.clone());
    let bus = Arc::new(EventBus::new());

    let run_loop = Arc::new(RunLoop {
        planner: Arc::new(DemoPlanner { message }),
        policy: Arc::new(DefaultPolicy),
        executors,
        bus: bus.clone(),
        stores: Stores::in_memory(),
    });

    let activity_fn: shuttle_core::ActivityFn =
        Arc::new(|req| Box::pin(async move { Err(EngineError::NotFound(req.tool_id)) }));
    let engine = Arc::new(InMemoryEngine::new(activity_fn));

    Demo {
        orchestrator: RunOrchestrator::new(engine, run_loop),
        bus,
        _registry: registry_service,
    }
}

/// Exposed so tests and `ScriptedPlanner`-based callers don't have to repeat
/// the final-response-only wiring for the simplest possible demo run.
#[allow(dead_code)]
pub fn scripted_final_only(reply: impl Into<String>) -> Arc<dyn Planner> {
    Arc::new(ScriptedPlanner::new(vec![PlanResult::Final(AgentMessage::text(
        Role::Assistant,
        reply,
    ))]))
}
