//! Error types for Strand.
//!
//! Two taxonomies live here. [`StrandError`] covers everything that is
//! returned to a caller or that ends a conversation turn. [`CallError`]
//! covers call-level failures (unknown targets, bad arguments, tool
//! failures, delegation limits); those never end a conversation and are
//! written back into the transcript as tool-result content instead.

pub mod unified;

pub use unified::{ErrorCategory, FailureKind, FailureReport};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_loop::state::EngineStatus;

/// Primary error type for all Strand operations.
#[derive(Error, Debug)]
pub enum StrandError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Engine busy: conversation is {status}")]
    EngineBusy { status: EngineStatus },

    #[error("Engine closed: conversation is {status}")]
    EngineClosed { status: EngineStatus },

    #[error("Model unavailable after {attempts} attempt(s): {message}")]
    ModelUnavailable { attempts: u32, message: String },

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Iteration limit exceeded: {0} model calls without a final answer")]
    IterationLimitExceeded(usize),

    #[error("Conversation cancelled")]
    Cancelled,

    #[error("Turn failed: {0}")]
    TurnFailed(FailureReport),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StrandError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::ToolExecution(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InvalidConfiguration(_) | Self::ModelConfiguration(_) => {
                ErrorCategory::Configuration
            }
            Self::Serialization(_) | Self::ProtocolViolation(_) => ErrorCategory::Protocol,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                408 => ErrorCategory::Timeout,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ModelUnavailable { .. } => ErrorCategory::Server,
            Self::EngineBusy { .. } | Self::EngineClosed { .. } | Self::TurnFailed(_) => {
                ErrorCategory::State
            }
            Self::Io(_) | Self::Storage(_) | Self::NotFound(_) => ErrorCategory::Storage,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Provider-supplied retry delay, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }

    /// Classified, serialisable description of this error.
    pub fn report(&self) -> FailureReport {
        if let Self::TurnFailed(report) = self {
            return report.clone();
        }
        let kind = match self {
            Self::InvalidConfiguration(_) => FailureKind::InvalidConfiguration,
            Self::EngineBusy { .. } => FailureKind::EngineBusy,
            Self::EngineClosed { .. } => FailureKind::EngineClosed,
            Self::ModelUnavailable { .. } => FailureKind::ModelUnavailable,
            Self::ModelConfiguration(_) => FailureKind::ModelConfiguration,
            Self::ProtocolViolation(_) => FailureKind::ProtocolViolation,
            Self::IterationLimitExceeded(_) => FailureKind::IterationLimitExceeded,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Io(_) | Self::Storage(_) | Self::NotFound(_) => FailureKind::Storage,
            _ => FailureKind::Internal,
        };
        FailureReport::new(kind, self.to_string())
    }
}

/// Call-level failure. Never fatal to the engine: the router converts it
/// into a tool-result turn so the model can adapt its next action.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallError {
    #[error("unknown target '{target}'")]
    UnknownTarget { target: String },

    #[error("invalid arguments for '{target}': {reason}")]
    InvalidArguments { target: String, reason: String },

    #[error("'{target}' failed: {message}")]
    ToolFailed { target: String, message: String },

    #[error("'{target}' timed out after {timeout_ms}ms")]
    ToolTimeout { target: String, timeout_ms: u64 },

    #[error("delegation to '{target}' would exceed the maximum call depth of {max_depth}")]
    DelegationDepthExceeded { target: String, max_depth: usize },

    #[error("sub-agent '{target}' failed: {message}")]
    SubAgentFailed { target: String, message: String },
}

impl CallError {
    /// Name of the function or sub-agent the failed call addressed.
    pub fn target(&self) -> &str {
        match self {
            Self::UnknownTarget { target }
            | Self::InvalidArguments { target, .. }
            | Self::ToolFailed { target, .. }
            | Self::ToolTimeout { target, .. }
            | Self::DelegationDepthExceeded { target, .. }
            | Self::SubAgentFailed { target, .. } => target,
        }
    }

    /// Render as the payload the model sees in the tool-result turn.
    pub fn to_model_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("message".into(), self.to_string().into());
        }
        serde_json::json!({ "error": value })
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StrandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(StrandError::api(503, "unavailable").is_retryable());
        assert!(StrandError::api(429, "slow down").is_retryable());
        assert!(!StrandError::api(400, "bad request").is_retryable());
        assert!(!StrandError::Authentication("bad key".into()).is_retryable());
    }

    #[test]
    fn call_error_model_value_carries_kind_and_message() {
        let err = CallError::ToolTimeout {
            target: "get_order_status".into(),
            timeout_ms: 250,
        };
        let value = err.to_model_value();
        assert_eq!(value["error"]["kind"], "tool_timeout");
        assert_eq!(value["error"]["target"], "get_order_status");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("timed out after 250ms"));
    }

    #[test]
    fn report_classifies_engine_errors() {
        let report = StrandError::ModelUnavailable {
            attempts: 4,
            message: "503".into(),
        }
        .report();
        assert_eq!(report.kind, FailureKind::ModelUnavailable);
        assert!(report.message.contains("4 attempt"));
    }
}
