//! Durable conversation state.
//!
//! [`ConversationState`] is the record an engine persists after every
//! transition. Turns are append-only; the outstanding call set holds the
//! calls requested by the latest assistant turn until all of them resolve
//! and their results are committed in call-id order. Every mutator checks
//! the current [`EngineStatus`] so an illegal transition is an error, not a
//! silently corrupted log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{FailureKind, FailureReport, StrandError};
use crate::types::{CallId, CallRequest, CallResult, RequestedCall, Role, Turn, Usage};

/// Where a conversation is in the engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    AwaitingModel,
    AwaitingTools,
    AwaitingSubAgent,
    Completed,
    Failed,
    Cancelled,
}

impl EngineStatus {
    /// The engine is working on a user turn.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::AwaitingModel | Self::AwaitingTools | Self::AwaitingSubAgent
        )
    }

    /// No further user messages are accepted.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Calls are outstanding and must be resolved before the model runs.
    pub fn awaits_calls(self) -> bool {
        matches!(self, Self::AwaitingTools | Self::AwaitingSubAgent)
    }
}

/// What a numbered call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallKind {
    Tool,
    SubAgent,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Done,
    Errored,
}

/// An entry of the outstanding call set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingCall {
    pub request: CallRequest,
    pub kind: CallKind,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallResult>,
}

/// The persisted record of one agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub agent: String,
    /// Position in the agent call stack; the root conversation is 1.
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub status: EngineStatus,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub outstanding: BTreeMap<CallId, OutstandingCall>,
    pub next_call_id: CallId,
    /// Number of user turns accepted so far.
    pub generation: u64,
    /// Model calls made for the current user turn.
    #[serde(default)]
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureReport>,
    #[serde(default)]
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        depth: usize,
        parent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent: agent.into(),
            depth,
            parent,
            status: EngineStatus::Idle,
            turns: Vec::new(),
            outstanding: BTreeMap::new(),
            next_call_id: 1,
            generation: 0,
            iterations: 0,
            last_failure: None,
            usage: Usage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a user turn and hand the conversation to the model.
    ///
    /// Accepted from Idle or Completed. Busy conversations yield
    /// [`StrandError::EngineBusy`]; failed or cancelled ones
    /// [`StrandError::EngineClosed`].
    pub fn append_user(&mut self, text: impl Into<String>) -> Result<(), StrandError> {
        match self.status {
            EngineStatus::Idle | EngineStatus::Completed => {}
            status if status.is_busy() => return Err(StrandError::EngineBusy { status }),
            status => return Err(StrandError::EngineClosed { status }),
        }
        self.turns.push(Turn::user(text));
        self.generation += 1;
        self.iterations = 0;
        self.last_failure = None;
        self.set_status(EngineStatus::AwaitingModel);
        Ok(())
    }

    /// Count one model call against the current user turn.
    pub fn begin_model_call(&mut self) -> Result<usize, StrandError> {
        self.ensure_status(EngineStatus::AwaitingModel)?;
        self.iterations += 1;
        self.touch();
        Ok(self.iterations)
    }

    pub fn record_final_answer(&mut self, text: impl Into<String>, usage: &Usage) -> Result<(), StrandError> {
        self.ensure_status(EngineStatus::AwaitingModel)?;
        self.usage.merge(usage);
        self.turns.push(Turn::assistant(Some(text.into()), Vec::new()));
        self.set_status(EngineStatus::Completed);
        Ok(())
    }

    /// Number the requested calls, append the assistant turn carrying them
    /// and fill the outstanding set with pending entries.
    pub fn record_calls(
        &mut self,
        text: Option<String>,
        calls: Vec<(RequestedCall, CallKind)>,
        usage: &Usage,
    ) -> Result<Vec<CallRequest>, StrandError> {
        self.ensure_status(EngineStatus::AwaitingModel)?;
        if calls.is_empty() {
            return Err(StrandError::ProtocolViolation(
                "assistant turn requested no calls".into(),
            ));
        }
        self.usage.merge(usage);

        let mut requests = Vec::with_capacity(calls.len());
        let mut any_sub_agent = false;
        for (call, kind) in calls {
            let request = CallRequest {
                id: self.next_call_id,
                wire_id: call.id,
                target: call.name,
                arguments: call.arguments,
            };
            self.next_call_id += 1;
            any_sub_agent |= kind == CallKind::SubAgent;
            self.outstanding.insert(
                request.id,
                OutstandingCall {
                    request: request.clone(),
                    kind,
                    status: CallStatus::Pending,
                    result: None,
                },
            );
            requests.push(request);
        }

        self.turns.push(Turn::assistant(text, requests.clone()));
        self.set_status(if any_sub_agent {
            EngineStatus::AwaitingSubAgent
        } else {
            EngineStatus::AwaitingTools
        });
        Ok(requests)
    }

    /// Record a call's result. Returns `false` if the call was already
    /// resolved, leaving the first result in place.
    pub fn resolve_call(&mut self, result: CallResult) -> Result<bool, StrandError> {
        if !self.status.awaits_calls() {
            return Err(StrandError::ProtocolViolation(format!(
                "call {} resolved while conversation is {}",
                result.call_id, self.status
            )));
        }
        let entry = self.outstanding.get_mut(&result.call_id).ok_or_else(|| {
            StrandError::ProtocolViolation(format!("call {} is not outstanding", result.call_id))
        })?;
        if entry.status != CallStatus::Pending {
            return Ok(false);
        }
        entry.status = if result.is_error() {
            CallStatus::Errored
        } else {
            CallStatus::Done
        };
        entry.result = Some(result);
        self.touch();
        Ok(true)
    }

    /// Calls still waiting for a result, in call-id order.
    pub fn pending_calls(&self) -> Vec<OutstandingCall> {
        self.outstanding
            .values()
            .filter(|c| c.status == CallStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn all_resolved(&self) -> bool {
        self.outstanding
            .values()
            .all(|c| c.status != CallStatus::Pending)
    }

    /// Append one tool-result turn per call in ascending call-id order,
    /// clear the outstanding set and return to the model.
    pub fn commit_results(&mut self) -> Result<(), StrandError> {
        if !self.status.awaits_calls() {
            return Err(StrandError::ProtocolViolation(format!(
                "cannot commit results while conversation is {}",
                self.status
            )));
        }
        if !self.all_resolved() {
            return Err(StrandError::ProtocolViolation(
                "cannot commit results with calls still pending".into(),
            ));
        }
        let outstanding = std::mem::take(&mut self.outstanding);
        for (_, call) in outstanding {
            if let Some(result) = call.result {
                self.turns.push(Turn::tool_result(result));
            }
        }
        self.set_status(EngineStatus::AwaitingModel);
        Ok(())
    }

    /// End the current user turn with a failure.
    pub fn fail(&mut self, report: FailureReport) {
        self.outstanding.clear();
        self.last_failure = Some(report);
        self.set_status(EngineStatus::Failed);
    }

    /// Record session termination. A failed conversation keeps its failure.
    pub fn cancel(&mut self) {
        if self.status == EngineStatus::Failed {
            return;
        }
        self.outstanding.clear();
        self.set_status(EngineStatus::Cancelled);
    }

    /// Outcome of the current user turn once the engine has settled.
    pub fn reply(&self) -> Option<Result<String, FailureReport>> {
        match self.status {
            EngineStatus::Completed => Some(Ok(self.last_answer().unwrap_or_default())),
            EngineStatus::Failed => Some(Err(self.last_failure.clone().unwrap_or_else(|| {
                FailureReport::new(FailureKind::Internal, "conversation failed")
            }))),
            EngineStatus::Cancelled => Some(Err(FailureReport::new(
                FailureKind::Cancelled,
                "conversation cancelled",
            ))),
            _ => None,
        }
    }

    /// Text of the most recent assistant turn.
    pub fn last_answer(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(Turn::text)
    }

    /// Non-empty assistant texts from turn index `watermark` onward, and the
    /// watermark to pass next time.
    pub fn assistant_texts(&self, watermark: usize) -> (Vec<String>, usize) {
        let texts = self
            .turns
            .iter()
            .skip(watermark)
            .filter(|t| t.role == Role::Assistant)
            .map(Turn::text)
            .filter(|t| !t.is_empty())
            .collect();
        (texts, self.turns.len())
    }

    /// Check the structural invariants of a loaded record.
    pub fn validate(&self) -> Result<(), StrandError> {
        let invalid = |msg: String| Err(StrandError::Storage(format!("{}: {msg}", self.id)));

        if self.depth == 0 {
            return invalid("depth must be at least 1".into());
        }
        if self.status.awaits_calls() {
            if self.outstanding.is_empty() {
                return invalid(format!("status {} with no outstanding calls", self.status));
            }
        } else if !self.outstanding.is_empty() {
            return invalid(format!("status {} with outstanding calls", self.status));
        }
        if self.status != EngineStatus::Idle && self.turns.is_empty() {
            return invalid(format!("status {} with an empty transcript", self.status));
        }

        if let Some((&max_id, _)) = self.outstanding.iter().next_back() {
            if max_id >= self.next_call_id {
                return invalid(format!("call id {max_id} not below next id {}", self.next_call_id));
            }
            let last_assistant = self.turns.iter().rev().find(|t| t.role == Role::Assistant);
            let requested: Vec<CallId> = last_assistant
                .map(|t| t.calls().map(|c| c.id).collect())
                .unwrap_or_default();
            for (id, call) in &self.outstanding {
                if *id != call.request.id || !requested.contains(id) {
                    return invalid(format!("outstanding call {id} not in the last assistant turn"));
                }
                let has_result = call.result.is_some();
                if has_result == (call.status == CallStatus::Pending) {
                    return invalid(format!("call {id} status {} disagrees with its result", call.status));
                }
            }
        }
        Ok(())
    }

    fn ensure_status(&self, status: EngineStatus) -> Result<(), StrandError> {
        if self.status == status {
            Ok(())
        } else {
            Err(StrandError::ProtocolViolation(format!(
                "expected conversation to be {status}, found {}",
                self.status
            )))
        }
    }

    fn set_status(&mut self, status: EngineStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
