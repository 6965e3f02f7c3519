//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::ParameterSchema;
use crate::error::StrandError;
use crate::types::CallId;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub conversation_id: String,
    pub call_id: CallId,
    /// Stable across replays of the same call; pass it to external systems
    /// that deduplicate requests.
    pub idempotency_key: String,
    /// Set when the call is dispatched again after a restart.
    pub redelivery: bool,
    /// Fires when the owning conversation is cancelled.
    pub cancellation: CancellationToken,
}

/// Core tool trait. Implement to expose a capability to agents.
///
/// Implementations must be safe to call concurrently from many
/// conversations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ParameterSchema;

    /// Whether repeating a call with identical arguments has no additional
    /// effect.
    fn idempotent(&self) -> bool {
        false
    }

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, StrandError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, StrandError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: ParameterSchema,
    idempotent: bool,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, StrandError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            idempotent: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Mark the tool as safe to repeat.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, StrandError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("idempotent", &self.idempotent)
            .finish()
    }
}
