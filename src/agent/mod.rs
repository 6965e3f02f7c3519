//! Agents: definitions, sessions and the runner that serves them.

pub mod definition;
pub mod runner;
pub mod session;

pub use definition::{AgentDefinition, AgentDefinitionBuilder, Callable, FunctionSpec};
pub use runner::{Runner, RunnerBuilder};
pub use session::{Session, SessionManager};
