//! Persistence for conversation state.
//!
//! The engine saves a [`ConversationState`] after every transition, so a
//! store only needs whole-record writes. Ids are used as file names by
//! [`FileStore`] and are validated the same way by every store.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::agent_loop::state::ConversationState;
use crate::error::StrandError;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or replace the record with `state.id`.
    async fn save(&self, state: &ConversationState) -> Result<(), StrandError>;

    async fn load(&self, id: &str) -> Result<Option<ConversationState>, StrandError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<(), StrandError>;

    /// All stored ids, sorted.
    async fn list(&self) -> Result<Vec<String>, StrandError>;
}

/// Reject ids that are unsafe as file names: empty, path separators, `..`,
/// NUL or other control characters.
pub fn validate_conversation_id(id: &str) -> Result<(), StrandError> {
    if id.is_empty() {
        return Err(StrandError::InvalidArgument(
            "conversation id cannot be empty".to_string(),
        ));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.starts_with('.') {
        return Err(StrandError::InvalidArgument(format!(
            "conversation id contains invalid characters: {id:?}"
        )));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(StrandError::InvalidArgument(format!(
            "conversation id contains control characters: {id:?}"
        )));
    }
    Ok(())
}
