//! Engine events delivered to an optional observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{CallKind, EngineStatus};
use crate::types::{CallId, Role};

/// Event emitted while an engine drives a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub conversation_id: String,
    /// Monotonic per engine task, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    StatusChanged { status: EngineStatus },
    TurnAppended { index: usize, role: Role },
    CallDispatched { call_id: CallId, target: String, kind: CallKind },
    CallResolved { call_id: CallId, target: String, is_error: bool },
}

/// Callback for engine events. Must not block.
pub type EngineEventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

pub(crate) struct EventEmitter {
    conversation_id: String,
    seq: AtomicU64,
    sink: Option<EngineEventSink>,
}

impl EventEmitter {
    pub(crate) fn new(conversation_id: String, sink: Option<EngineEventSink>) -> Self {
        Self {
            conversation_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn emit(&self, kind: EngineEventKind) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(EngineEvent {
            conversation_id: self.conversation_id.clone(),
            seq,
            timestamp: Utc::now(),
            kind,
        });
    }
}
