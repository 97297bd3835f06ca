//! Run & memory store contracts: metadata upserts and an
//! append-only transcript-adjacent event log. Concrete persistent stores are
//! out of scope; only the contracts and in-memory reference
//! implementations live here, following a `memory::Store` /
//! `UserMessageStore` split of one trait, one in-memory impl, concrete
//! backends elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::run::TerminationStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Run-level status as persisted; broader than [`TerminationStatus`] since a
/// run record also needs to represent "still going" and "paused".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed { status: TerminationStatus },
}

/// Persisted run metadata: `{RunID, AgentID, SessionID?, TurnID?,
/// Status, StartedAt, UpdatedAt, Labels, Metadata}`, keyed uniquely by `RunID`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub metadata: HashMap<String, Value>,
}

/// Idempotent-on-`RunID` metadata store.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or replaces the record for `record.run_id`. Calling this twice
    /// with the same `run_id` is idempotent: the second call's fields win.
    async fn upsert(&self, record: RunRecord) -> Result<(), StoreError>;
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;
    /// All non-terminal runs for a session, for best-effort cancellation on
    /// session delete.
    async fn list_active_for_session(&self, session_id: &str) -> Result<Vec<RunRecord>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryRunStore {
    records: DashMap<String, RunRecord>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert(&self, record: RunRecord) -> Result<(), StoreError> {
        self.records.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.records.get(run_id).map(|e| e.value().clone()))
    }

    async fn list_active_for_session(&self, session_id: &str) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|e| {
                e.value().session_id.as_deref() == Some(session_id)
                    && !matches!(e.value().status, RunStatus::Completed { .. })
            })
            .map(|e| e.value().clone())
            .collect())
    }
}

/// One entry in a run's memory log. Kind + timestamp
/// + payload; sequence is assigned by the store at append time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryEventKind {
    AssistantMessage { text: String },
    UserMessage { text: String },
    ToolCallScheduled { tool_id: String, tool_call_id: String },
    ToolResultReceived { tool_id: String, tool_call_id: String, success: bool },
    PlannerNote { text: String },
    PolicyDecision { allowed_tools: Vec<String>, disable_tools: bool },
    Pause { reason: Option<String> },
    Resume { requested_by: Option<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub kind: MemoryEventKind,
}

/// Append-only ordered log per `(AgentID, RunID)`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(
        &self,
        agent_id: &str,
        run_id: &str,
        recorded_at: DateTime<Utc>,
        kind: MemoryEventKind,
    ) -> Result<u64, StoreError>;

    async fn list(&self, agent_id: &str, run_id: &str) -> Result<Vec<MemoryEvent>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    logs: DashMap<(String, String), Vec<MemoryEvent>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(
        &self,
        agent_id: &str,
        run_id: &str,
        recorded_at: DateTime<Utc>,
        kind: MemoryEventKind,
    ) -> Result<u64, StoreError> {
        let key = (agent_id.to_string(), run_id.to_string());
        let mut entry = self.logs.entry(key).or_default();
        let seq = entry.len() as u64;
        entry.push(MemoryEvent {
            seq,
            recorded_at,
            kind,
        });
        Ok(seq)
    }

    async fn list(&self, agent_id: &str, run_id: &str) -> Result<Vec<MemoryEvent>, StoreError> {
        let key = (agent_id.to_string(), run_id.to_string());
        Ok(self.logs.get(&key).map(|e| e.clone()).unwrap_or_default())
    }
}

/// Convenience bundle passed to the run loop: both stores behind `Arc`.
#[derive(Clone)]
pub struct Stores {
    pub runs: Arc<dyn RunStore>,
    pub memory: Arc<dyn MemoryStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(InMemoryRunStore::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
        }
    }
}
