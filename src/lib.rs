//! Strand: durable execution for conversational agents.
//!
//! An agent is an [`AgentDefinition`](agent::AgentDefinition): instructions,
//! a model, and a table of callables, each either a function or another
//! agent. A [`Runner`](agent::Runner) serves one root agent. Every
//! conversation it starts is driven by an engine task that persists the
//! conversation after each step, so a crashed or halted process can pick up
//! where it left off.
//!
//! # Quick Start
//!
//! ```no_run
//! use strand::prelude::*;
//!
//! # async fn example() -> strand::error::Result<()> {
//! let agent = AgentDefinition::builder("support")
//!     .instructions("Answer customer questions.")
//!     .model("openai:gpt-4o-mini")
//!     .build()?;
//!
//! let runner = Runner::builder(agent)
//!     .provider_config(ProviderConfig::from_env())
//!     .store(FileStore::default_location())
//!     .config(StrandConfig::load()?)
//!     .build()?;
//!
//! let session = runner.start_session(None).await?;
//! let answer = session.send("Where is my order 12345?").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod store;
pub mod tools;
pub mod types;
pub mod util;
