//! Turning a model reply into work, and resolving each call.
//!
//! [`route`] classifies every requested call against the agent's callable
//! table. [`DelegationRouter::resolve`] then runs one call to completion:
//! tools go through the [`ToolInvoker`], sub-agents get a child
//! conversation of their own. Whatever happens, the result is a
//! [`CallResult`]; call-level failures never escape as errors.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::engine::Engine;
use super::gateway::strip_code_fence;
use super::state::CallKind;
use crate::agent::definition::{AgentDefinition, Callable, FunctionSpec};
use crate::error::CallError;
use crate::tools::{idempotency_key, validate_arguments, ToolExecutionContext, ToolInvoker};
use crate::types::{CallRequest, CallResult, RequestedCall};

/// A requested call, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall(RequestedCall),
    SubAgentCall(RequestedCall),
    UnknownTarget(RequestedCall),
}

impl Action {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::ToolCall(_) => CallKind::Tool,
            Self::SubAgentCall(_) => CallKind::SubAgent,
            Self::UnknownTarget(_) => CallKind::Unknown,
        }
    }

    pub fn into_call(self) -> RequestedCall {
        match self {
            Self::ToolCall(call) | Self::SubAgentCall(call) | Self::UnknownTarget(call) => call,
        }
    }
}

/// What the engine does with a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPlan {
    FinalAnswer(String),
    Dispatch {
        text: Option<String>,
        actions: Vec<Action>,
    },
}

/// Classify a reply. No calls means a final answer.
pub fn route(definition: &AgentDefinition, text: Option<String>, calls: Vec<RequestedCall>) -> TurnPlan {
    if calls.is_empty() {
        return TurnPlan::FinalAnswer(text.unwrap_or_default());
    }
    let actions = calls
        .into_iter()
        .map(|call| match definition.lookup(&call.name) {
            Some(Callable::Function(_)) => Action::ToolCall(call),
            Some(Callable::SubAgent(_)) => Action::SubAgentCall(call),
            None => Action::UnknownTarget(call),
        })
        .collect();
    TurnPlan::Dispatch { text, actions }
}

/// Where a call is being resolved from.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub conversation_id: String,
    pub depth: usize,
    pub cancellation: CancellationToken,
    /// The call may already have run before a restart.
    pub redelivery: bool,
}

/// Child conversation ids are derived from the parent and the call, so a
/// replayed delegation finds the child it started before.
pub fn child_conversation_id(parent: &str, call_id: u64, agent: &str) -> String {
    format!("{parent}.{call_id}-{agent}")
}

#[derive(Debug, Clone, Default)]
pub struct DelegationRouter {
    invoker: ToolInvoker,
}

impl DelegationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one call. Never fails: every problem becomes an error result.
    pub async fn resolve(
        &self,
        engine: &Engine,
        definition: &AgentDefinition,
        scope: &CallScope,
        call: &CallRequest,
    ) -> CallResult {
        let outcome = match definition.lookup(&call.target) {
            Some(Callable::Function(spec)) => self.run_tool(engine, spec, scope, call).await,
            Some(Callable::SubAgent(agent)) => delegate(engine, agent, scope, call).await,
            None => Err(CallError::UnknownTarget {
                target: call.target.clone(),
            }),
        };
        match outcome {
            Ok(value) => CallResult::value(call, value),
            Err(error) => {
                tracing::warn!(
                    conversation_id = %scope.conversation_id,
                    call_id = call.id,
                    target = %call.target,
                    error = %error,
                    "Call failed"
                );
                CallResult::error(call, error)
            }
        }
    }

    async fn run_tool(
        &self,
        engine: &Engine,
        spec: &FunctionSpec,
        scope: &CallScope,
        call: &CallRequest,
    ) -> Result<serde_json::Value, CallError> {
        let _permit = engine
            .workers()
            .acquire()
            .await
            .map_err(|_| CallError::ToolFailed {
                target: call.target.clone(),
                message: "worker pool closed".into(),
            })?;

        let ctx = ToolExecutionContext {
            conversation_id: scope.conversation_id.clone(),
            call_id: call.id,
            idempotency_key: idempotency_key(
                &scope.conversation_id,
                call.id,
                &call.target,
                &call.arguments,
            ),
            redelivery: scope.redelivery,
            cancellation: scope.cancellation.clone(),
        };
        let timeout = spec.timeout.unwrap_or(engine.config().tool_timeout);

        tracing::debug!(
            conversation_id = %scope.conversation_id,
            call_id = call.id,
            target = %call.target,
            "Invoking tool"
        );
        self.invoker
            .invoke(spec.tool.clone(), &call.arguments, timeout, ctx)
            .await
    }
}

async fn delegate(
    engine: &Engine,
    agent: &Arc<AgentDefinition>,
    scope: &CallScope,
    call: &CallRequest,
) -> Result<serde_json::Value, CallError> {
    let target = call.target.clone();
    let max_depth = engine.config().max_delegation_depth;
    if scope.depth + 1 > max_depth {
        return Err(CallError::DelegationDepthExceeded { target, max_depth });
    }

    let failed = |message: String| CallError::SubAgentFailed {
        target: call.target.clone(),
        message,
    };

    let child_id = child_conversation_id(&scope.conversation_id, call.id, agent.name());
    let existing = engine
        .store()
        .load(&child_id)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let handle = match existing {
        Some(state) => {
            tracing::info!(
                conversation_id = %scope.conversation_id,
                child_id = %child_id,
                status = %state.status,
                "Resuming sub-agent conversation"
            );
            engine.relaunch(agent.clone(), state, scope.cancellation.child_token())
        }
        None => {
            validate_arguments(&call.arguments, &agent.delegation_schema()).map_err(|reason| {
                CallError::InvalidArguments {
                    target: call.target.clone(),
                    reason,
                }
            })?;
            tracing::info!(
                conversation_id = %scope.conversation_id,
                child_id = %child_id,
                depth = scope.depth + 1,
                "Delegating to sub-agent"
            );
            engine
                .start_child(
                    agent.clone(),
                    child_id,
                    scope.depth + 1,
                    scope.conversation_id.clone(),
                    delegation_input(&call.arguments),
                    scope.cancellation.child_token(),
                )
                .await
        }
    }
    .map_err(|e| failed(e.to_string()))?;

    let reply = handle.await_reply().await.map_err(|e| failed(e.to_string()))?;
    Ok(child_value(agent, reply))
}

/// A lone `request` string is passed through as the child's user message;
/// any other argument object is handed over as JSON.
fn delegation_input(arguments: &serde_json::Value) -> String {
    if let Some(obj) = arguments.as_object() {
        if obj.len() == 1 {
            if let Some(request) = obj.get("request").and_then(|v| v.as_str()) {
                return request.to_string();
            }
        }
    }
    serde_json::to_string_pretty(arguments).unwrap_or_else(|_| arguments.to_string())
}

fn child_value(agent: &AgentDefinition, reply: String) -> serde_json::Value {
    if agent.output_schema().is_some() {
        if let Ok(value) = serde_json::from_str(strip_code_fence(&reply)) {
            return value;
        }
    }
    serde_json::Value::String(reply)
}
