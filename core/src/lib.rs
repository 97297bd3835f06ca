//! Agent execution runtime: tool identity and codecs, transcript messages,
//! the run envelope, the policy engine, the four tool executor variants, the
//! durability-seam engine abstraction, the run/memory stores, and the run
//! loop state machine that ties them together.
//!
//! Crate layout mirrors the boundaries a real deployment would split on:
//! `tool`/`message`/`run` are pure data types; `policy`/`executor`/`planner`
//! are pluggable contracts with reference implementations; `engine` is the
//! durability seam; `store` is persisted metadata; `run_loop` wires all of the
//! above into one state machine; `session` is the external-facing run
//! submission API (`StartRun`/`Run`/`PauseRun`/`ResumeRun`/`SubscribeRun`/
//! `DeleteSession`) that callers outside this crate actually hold onto.

pub mod engine;
pub mod executor;
pub mod message;
pub mod planner;
pub mod policy;
pub mod run;
pub mod run_loop;
pub mod session;
pub mod store;
pub mod tool;

pub use engine::{
    ActivityFn, ActivityFuture, ActivityRequest, Checkpointer, CheckpointError, DurableEngine,
    Engine, EngineError, InMemoryCheckpointer, InMemoryEngine, InMemoryWorkflowContext,
    MpscSignalChannel, RunCheckpoint, RunHandle, SignalChannel, WorkflowContext, WorkflowFn,
};
pub use executor::{
    finish, retry_hint_for_json_rpc_code, ActivityExecutor, ActivityRunner, ExecutionContext,
    ExecutorError, McpCallOutcome, McpCaller, McpError, McpExecutor, McpSessionKind,
    NestedAgentExecutor, RegistryCallHandle, RegistryClient, RegistryExecutor, ResultStreamReader,
    RunLoopInvoker, StreamedFrame, ToolExecutor, ToolInput, ToolOutput,
};
pub use message::{AgentMessage, Part, Role};
pub use planner::{AwaitItem, PlanResult, Planner, PlannerError, ScriptedPlanner};
pub use policy::{Decision, DefaultPolicy, PolicyEngine, PolicyError, PolicyInput};
pub use run::{
    CapsState, EngineOptions, RetryHint, RetryPolicy, RetryReason, RunContext, RunInput,
    RunLink, RunOutput, Telemetry, TerminationStatus, ToolError, ToolRequest, ToolResult,
    DEFAULT_MAX_CONSECUTIVE_FAILED_TOOL_CALLS, DEFAULT_MAX_TOOL_CALLS, DEFAULT_TIME_BUDGET_MS,
};
pub use run_loop::{tool_result_message, RunLoop};
pub use session::{RunOrchestrator, SessionInfo, Unsubscribe};
pub use store::{
    InMemoryMemoryStore, InMemoryRunStore, MemoryEvent, MemoryEventKind, MemoryStore, RunRecord,
    RunStatus, RunStore, StoreError, Stores,
};
pub use tool::{
    CodecError, CodecJson, ErasedResultCodec, SerdeJsonCodec, ToolCatalog, ToolId,
    ToolIdParseError, ToolSpec, TypeSpec,
};
