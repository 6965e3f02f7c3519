//! Turn and call types making up a conversation transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::CallError;

/// Engine-generated call identifier, unique and monotonic per conversation.
pub type CallId = u64;

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// One entry in the append-only conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    /// Assistant turn carrying optional text and the calls it requested.
    pub fn assistant(text: Option<String>, calls: Vec<CallRequest>) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(ContentPart::Text { text });
        }
        content.extend(calls.into_iter().map(ContentPart::Call));
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(result: CallResult) -> Self {
        Self::new(Role::ToolResult, vec![ContentPart::Result(result)])
    }

    fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn calls(&self) -> impl Iterator<Item = &CallRequest> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::Call(call) => Some(call),
            _ => None,
        })
    }

    pub fn results(&self) -> impl Iterator<Item = &CallResult> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::Result(result) => Some(result),
            _ => None,
        })
    }
}

/// A single part of turn content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Call(CallRequest),
    Result(CallResult),
}

/// A call as decoded from a model response, before the engine numbers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestedCall {
    /// Provider-side identifier, echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A numbered call recorded in an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    pub id: CallId,
    pub wire_id: String,
    pub target: String,
    pub arguments: serde_json::Value,
}

/// The resolution of one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResult {
    pub call_id: CallId,
    pub wire_id: String,
    pub target: String,
    pub outcome: CallOutcome,
}

impl CallResult {
    pub fn value(request: &CallRequest, value: serde_json::Value) -> Self {
        Self::with_outcome(request, CallOutcome::Value(value))
    }

    pub fn error(request: &CallRequest, error: CallError) -> Self {
        Self::with_outcome(request, CallOutcome::Error(error))
    }

    fn with_outcome(request: &CallRequest, outcome: CallOutcome) -> Self {
        Self {
            call_id: request.id,
            wire_id: request.wire_id.clone(),
            target: request.target.clone(),
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, CallOutcome::Error(_))
    }

    /// Payload sent to the model: `{"content": value}` or `{"error": {...}}`.
    pub fn to_model_value(&self) -> serde_json::Value {
        match &self.outcome {
            CallOutcome::Value(v) => serde_json::json!({ "content": v }),
            CallOutcome::Error(e) => e.to_model_value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Value(serde_json::Value),
    Error(CallError),
}
