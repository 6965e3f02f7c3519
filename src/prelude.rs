//! Convenience re-exports for common use.

pub use crate::agent::{AgentDefinition, Runner, Session};
pub use crate::agent_loop::{Engine, EngineHandle, EngineStatus};
pub use crate::config::{ProviderConfig, StrandConfig};
pub use crate::error::{CallError, FailureKind, FailureReport, Result, StrandError};
pub use crate::models::{ModelSelector, ProviderKind};
pub use crate::provider::{ModelProvider, ProviderRequest, ProviderResponse};
pub use crate::store::{ConversationStore, FileStore, MemoryStore};
pub use crate::tools::{FunctionTool, ParameterBuilder, ParameterSchema, Tool, ToolArguments, ToolExecutionContext};
pub use crate::types::{CallRequest, CallResult, GenerationSettings, RequestedCall, Role, Turn, Usage};
