//! Sessions: the caller-facing view of one root conversation.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use super::definition::AgentDefinition;
use crate::agent_loop::{EngineHandle, EngineStatus};
use crate::error::StrandError;
use crate::types::Turn;

/// One conversation with a root agent.
#[derive(Debug, Clone)]
pub struct Session {
    agent: Arc<AgentDefinition>,
    handle: EngineHandle,
}

impl Session {
    pub(crate) fn new(agent: Arc<AgentDefinition>, handle: EngineHandle) -> Self {
        Self { agent, handle }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn agent(&self) -> &Arc<AgentDefinition> {
        &self.agent
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Send a user message and wait for the final answer.
    ///
    /// Failures come back classified; [`StrandError::report`] turns any of
    /// them into a serialisable description.
    pub async fn send(&self, message: impl Into<String>) -> Result<String, StrandError> {
        self.handle.submit_user_message(message).await?;
        self.handle.await_reply().await
    }

    /// Wait for the turn already in progress, such as one started with an
    /// initial message.
    pub async fn reply(&self) -> Result<String, StrandError> {
        self.handle.await_reply().await
    }

    /// Assistant texts produced since `watermark`; pass the returned
    /// watermark on the next call.
    pub async fn thoughts(&self, watermark: usize) -> (Vec<String>, usize) {
        self.handle.thoughts(watermark).await
    }

    pub fn status(&self) -> EngineStatus {
        self.handle.status()
    }

    pub async fn transcript(&self) -> Vec<Turn> {
        self.handle.transcript().await
    }

    /// Cancel the conversation, including any running sub-agents.
    pub async fn close(&self) -> EngineStatus {
        self.handle.close().await
    }
}

/// Live sessions by id.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id().to_string(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id)
    }

    /// Drop sessions whose conversation has ended for good.
    pub fn prune_closed(&mut self) {
        self.sessions.retain(|_, s| !s.status().is_closed());
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sessions.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Session> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}

/// `{agent}-{6 hex digits}`.
pub fn new_session_id(agent: &str) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{agent}-{suffix:06x}")
}
