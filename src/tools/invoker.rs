//! Isolated, time-bounded execution of a single tool call.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::validation::validate_arguments;
use crate::error::{CallError, StrandError};
use crate::types::CallId;

/// Runs tools on their own task so a panicking or hung tool cannot take the
/// engine down with it.
#[derive(Debug, Clone, Default)]
pub struct ToolInvoker;

impl ToolInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Validate `arguments`, then execute `tool` under `timeout`.
    ///
    /// Every failure is returned as a [`CallError`]; nothing here is fatal
    /// to the caller.
    pub async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        arguments: &serde_json::Value,
        timeout: Duration,
        ctx: ToolExecutionContext,
    ) -> Result<serde_json::Value, CallError> {
        let target = tool.name().to_string();

        validate_arguments(arguments, &tool.parameters().schema).map_err(|reason| {
            CallError::InvalidArguments {
                target: target.clone(),
                reason,
            }
        })?;

        if ctx.redelivery && !tool.idempotent() {
            tracing::warn!(
                conversation_id = %ctx.conversation_id,
                call_id = ctx.call_id,
                target = %target,
                "Redelivering call to non-idempotent tool"
            );
        }

        let args = ToolArguments::new(arguments.clone());
        let cancellation = ctx.cancellation.clone();
        let task = AbortOnDrop(tokio::spawn(async move { tool.execute(&args, &ctx).await }));

        let joined = tokio::select! {
            _ = cancellation.cancelled() => {
                return Err(CallError::ToolFailed { target, message: "cancelled".into() });
            }
            joined = tokio::time::timeout(timeout, task) => joined,
        };

        match joined {
            Err(_) => Err(CallError::ToolTimeout {
                target,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(join_err)) => Err(CallError::ToolFailed {
                target,
                message: if join_err.is_panic() {
                    "tool panicked".to_string()
                } else {
                    join_err.to_string()
                },
            }),
            Ok(Ok(Err(e))) => Err(CallError::ToolFailed {
                target,
                message: match e {
                    StrandError::ToolExecution(message) => message,
                    other => other.to_string(),
                },
            }),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

/// Aborts the wrapped task when dropped before completion.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> std::future::Future for AbortOnDrop<T> {
    type Output = Result<T, tokio::task::JoinError>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.0).poll(cx)
    }
}

/// Deterministic key for one call: SHA-256 over conversation id, call id,
/// target and the canonical (key-sorted) JSON arguments, hex encoded.
pub fn idempotency_key(
    conversation_id: &str,
    call_id: CallId,
    target: &str,
    arguments: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_bytes());
    hasher.update([0]);
    hasher.update(call_id.to_be_bytes());
    hasher.update(target.as_bytes());
    hasher.update([0]);
    hasher.update(arguments.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
