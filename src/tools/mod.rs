//! Tool system for function calling.

pub mod arguments;
pub mod invoker;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use invoker::{idempotency_key, ToolInvoker};
pub use tool::{FunctionTool, Tool, ToolExecutionContext};
pub use types::{ParameterBuilder, ParameterSchema};
pub use validation::validate_arguments;
