use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{validate_conversation_id, ConversationStore};
use crate::agent_loop::state::ConversationState;
use crate::error::StrandError;

/// One pretty-printed JSON document per conversation under `base_path`.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a new file store with the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// `conversations/` under the platform data directory for strand.
    pub fn default_location() -> Self {
        let base = directories::ProjectDirs::from("", "", "strand")
            .map(|dirs| dirs.data_dir().join("conversations"))
            .unwrap_or_else(|| PathBuf::from(".strand/conversations"));
        Self::new(base)
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StrandError> {
        validate_conversation_id(id)?;
        Ok(self.base_path.join(format!("{id}.json")))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn save(&self, state: &ConversationState) -> Result<(), StrandError> {
        let path = self.record_path(&state.id)?;
        tokio::fs::create_dir_all(&self.base_path).await?;
        let content = serde_json::to_string_pretty(state)?;

        // Write to a temp file then rename so readers never see a torn record.
        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            state.id,
            uuid::Uuid::new_v4().simple()
        ));
        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StrandError::Storage(format!("{}: {e}", path.display())));
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationState>, StrandError> {
        let path = self.record_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: ConversationState = serde_json::from_str(&content)
            .map_err(|e| StrandError::Storage(format!("{}: {e}", path.display())))?;
        Ok(Some(state))
    }

    async fn delete(&self, id: &str) -> Result<(), StrandError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StrandError> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                    if !id.starts_with('.') {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
