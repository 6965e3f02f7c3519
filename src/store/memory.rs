use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_conversation_id, ConversationStore};
use crate::agent_loop::state::ConversationState;
use crate::error::StrandError;

/// In-process store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: std::sync::Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy of every record, for simulating a second process
    /// restarting from the same log.
    pub async fn fork(&self) -> Self {
        let records = self.records.read().await.clone();
        Self {
            records: std::sync::Arc::new(RwLock::new(records)),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, state: &ConversationState) -> Result<(), StrandError> {
        validate_conversation_id(&state.id)?;
        self.records
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationState>, StrandError> {
        validate_conversation_id(id)?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StrandError> {
        validate_conversation_id(id)?;
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StrandError> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
