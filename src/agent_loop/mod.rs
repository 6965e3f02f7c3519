//! The conversation engine and the pieces it drives.

pub mod engine;
pub mod events;
pub mod gateway;
pub mod router;
pub mod state;

pub use engine::{Engine, EngineBuilder, EngineHandle, EngineSnapshot};
pub use events::{EngineEvent, EngineEventKind, EngineEventSink};
pub use gateway::{ModelGateway, ModelReply};
pub use router::{child_conversation_id, route, Action, CallScope, DelegationRouter, TurnPlan};
pub use state::{CallKind, CallStatus, ConversationState, EngineStatus, OutstandingCall};
