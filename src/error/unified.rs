//! Unified error classification and failure reporting.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::StrandError;

/// Broad error category for routing retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Protocol,
    State,
    Storage,
    Unknown,
}

/// Machine-readable kind of a conversation-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    InvalidConfiguration,
    EngineBusy,
    EngineClosed,
    ModelUnavailable,
    ModelConfiguration,
    ProtocolViolation,
    IterationLimitExceeded,
    Cancelled,
    Storage,
    Internal,
}

/// Structured failure description handed to session callers and persisted
/// alongside a failed conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReport {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Caller-facing error for a turn that ended with this report.
    pub fn into_error(self) -> StrandError {
        match self.kind {
            FailureKind::Cancelled => StrandError::Cancelled,
            _ => StrandError::TurnFailed(self),
        }
    }
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
