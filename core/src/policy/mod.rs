//! Policy engine contract: per-turn allow/block decisions and cap
//! arithmetic, applied before every planner turn.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::run::{CapsState, RetryHint, RunContext};
use crate::tool::ToolId;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy decision failed: {0}")]
    DecisionFailed(String),
}

/// Input to one policy decision.
pub struct PolicyInput<'a> {
    pub context: &'a RunContext,
    pub candidate_tools: &'a [ToolId],
    pub retry_hint: Option<&'a RetryHint>,
    pub explicitly_requested_tools: &'a [ToolId],
    pub labels: &'a HashMap<String, String>,
}

/// Output of one policy decision. The caller MUST replace its `CapsState`
/// with `caps` and schedule only tools in `allowed_tools`.
#[derive(Clone, Debug)]
pub struct Decision {
    pub allowed_tools: Vec<ToolId>,
    pub caps: CapsState,
    pub disable_tools: bool,
    pub labels: HashMap<String, String>,
    pub metadata: HashMap<String, Value>,
}

/// Applied once per planner turn, strictly before scheduling the turn it
/// governs.
pub trait PolicyEngine: Send + Sync {
    fn decide(&self, input: PolicyInput<'_>, now: DateTime<Utc>) -> Result<Decision, PolicyError>;
}

/// Identity allow-list (every candidate tool is allowed) plus the cap
/// arithmetic every policy must apply. No other policy behavior.
#[derive(Default)]
pub struct DefaultPolicy;

impl PolicyEngine for DefaultPolicy {
    fn decide(&self, input: PolicyInput<'_>, now: DateTime<Utc>) -> Result<Decision, PolicyError> {
        let mut caps = input.context.caps;

        if let Some(hint) = input.retry_hint {
            if hint.restrict_to_tool {
                caps.restrict_to_single_call();
            }
        }

        let disable_tools = caps.is_expired(now) || !caps.has_tool_calls_remaining();

        let allowed_tools = if disable_tools {
            Vec::new()
        } else if let Some(hint) = input.retry_hint.filter(|h| h.restrict_to_tool) {
            // Unknown-tool tolerance: a restrict-to-tool hint naming a tool
            // absent from the candidate set still narrows to that tool; the
            // executor layer will surface tool_unavailable if it truly doesn't exist.
            hint.tool.clone().into_iter().collect()
        } else {
            // Unknown tools in an explicit allow-list are ignored (resilience
            // against stale decisions); here every candidate is allowed, so no
            // filtering against candidate_tools is needed beyond the tolerance note.
            let candidates: HashSet<&ToolId> = input.candidate_tools.iter().collect();
            if input.explicitly_requested_tools.is_empty() {
                input.candidate_tools.to_vec()
            } else {
                input
                    .explicitly_requested_tools
                    .iter()
                    .filter(|t| candidates.contains(t))
                    .cloned()
                    .collect()
            }
        };

        Ok(Decision {
            allowed_tools,
            caps,
            disable_tools,
            labels: input.labels.clone(),
            metadata: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ctx(remaining: u32, expires_in_secs: i64) -> RunContext {
        let caps = CapsState::new(remaining, 3, Utc::now() + Duration::seconds(expires_in_secs));
        RunContext::new("run-1", caps)
    }

    fn tool(name: &str) -> ToolId {
        ToolId::new("search", name)
    }

    #[test]
    fn allows_every_candidate_when_budget_remains() {
        let context = ctx(5, 60);
        let candidates = vec![tool("query")];
        let decision = DefaultPolicy
            .decide(
                PolicyInput {
                    context: &context,
                    candidate_tools: &candidates,
                    retry_hint: None,
                    explicitly_requested_tools: &[],
                    labels: &HashMap::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(!decision.disable_tools);
        assert_eq!(decision.allowed_tools, candidates);
    }

    #[test]
    fn disables_tools_when_remaining_tool_calls_is_zero() {
        let context = ctx(0, 60);
        let decision = DefaultPolicy
            .decide(
                PolicyInput {
                    context: &context,
                    candidate_tools: &[tool("query")],
                    retry_hint: None,
                    explicitly_requested_tools: &[],
                    labels: &HashMap::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(decision.disable_tools);
        assert!(decision.allowed_tools.is_empty());
    }

    #[test]
    fn disables_tools_when_deadline_passed() {
        let context = ctx(5, -1);
        let decision = DefaultPolicy
            .decide(
                PolicyInput {
                    context: &context,
                    candidate_tools: &[tool("query")],
                    retry_hint: None,
                    explicitly_requested_tools: &[],
                    labels: &HashMap::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(decision.disable_tools);
    }

    #[test]
    fn restrict_to_tool_hint_narrows_allow_list_and_caps_remaining_to_one() {
        let context = ctx(5, 60);
        let hint = RetryHint {
            restrict_to_tool: true,
            tool: Some(tool("query")),
            ..Default::default()
        };
        let decision = DefaultPolicy
            .decide(
                PolicyInput {
                    context: &context,
                    candidate_tools: &[tool("query"), tool("other")],
                    retry_hint: Some(&hint),
                    explicitly_requested_tools: &[],
                    labels: &HashMap::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(decision.allowed_tools, vec![tool("query")]);
        assert!(decision.caps.remaining_tool_calls <= 1);
    }

    #[test]
    fn unknown_requested_tools_are_ignored() {
        let context = ctx(5, 60);
        let decision = DefaultPolicy
            .decide(
                PolicyInput {
                    context: &context,
                    candidate_tools: &[tool("query")],
                    retry_hint: None,
                    explicitly_requested_tools: &[tool("query"), tool("nonexistent")],
                    labels: &HashMap::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(decision.allowed_tools, vec![tool("query")]);
    }
}
