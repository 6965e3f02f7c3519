//! Runner: owns an engine for one root agent and hands out sessions.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::definition::AgentDefinition;
use super::session::{new_session_id, Session, SessionManager};
use crate::agent_loop::{Engine, EngineEventSink};
use crate::config::{ProviderConfig, StrandConfig};
use crate::error::StrandError;
use crate::provider::{ConfiguredProviders, ModelProvider, ProviderFactory, SingleProvider};
use crate::store::{ConversationStore, MemoryStore};

/// Session ids are retried this many times on collision.
const MAX_ID_ATTEMPTS: usize = 8;

pub struct Runner {
    agent: Arc<AgentDefinition>,
    engine: Engine,
    sessions: Mutex<SessionManager>,
}

pub struct RunnerBuilder {
    agent: Arc<AgentDefinition>,
    providers: Option<Arc<dyn ProviderFactory>>,
    store: Option<Arc<dyn ConversationStore>>,
    config: Option<StrandConfig>,
    events: Option<EngineEventSink>,
}

impl RunnerBuilder {
    /// Serve every agent with one provider.
    pub fn provider(mut self, provider: impl ModelProvider + 'static) -> Self {
        self.providers = Some(Arc::new(SingleProvider(Arc::new(provider))));
        self
    }

    pub fn providers(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Build providers from credentials, per agent model selector.
    pub fn provider_config(mut self, config: ProviderConfig) -> Self {
        self.providers = Some(Arc::new(ConfiguredProviders::new(config)));
        self
    }

    pub fn store(mut self, store: impl ConversationStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: StrandConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn event_sink(mut self, sink: EngineEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Providers default to credentials from the environment, the store to
    /// memory and the config to [`StrandConfig::default`].
    pub fn build(self) -> Result<Runner, StrandError> {
        let config = self.config.unwrap_or_default();
        let providers = self
            .providers
            .unwrap_or_else(|| {
                Arc::new(ConfiguredProviders::new(ProviderConfig::from_env())) as Arc<dyn ProviderFactory>
            });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn ConversationStore>);

        let chain = self.agent.chain_depth();
        if chain > config.max_delegation_depth {
            warn!(
                agent = %self.agent.name(),
                chain,
                max_depth = config.max_delegation_depth,
                "Agent hierarchy is deeper than the delegation limit"
            );
        }

        let mut engine = Engine::builder(providers).store(store).config(config);
        if let Some(sink) = self.events {
            engine = engine.event_sink(sink);
        }

        Ok(Runner {
            agent: self.agent,
            engine: engine.build()?,
            sessions: Mutex::new(SessionManager::new()),
        })
    }
}

impl Runner {
    pub fn builder(agent: impl Into<Arc<AgentDefinition>>) -> RunnerBuilder {
        RunnerBuilder {
            agent: agent.into(),
            providers: None,
            store: None,
            config: None,
            events: None,
        }
    }

    pub fn agent(&self) -> &Arc<AgentDefinition> {
        &self.agent
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Open a new session, optionally starting the first turn right away.
    pub async fn start_session(&self, initial_message: Option<String>) -> Result<Session, StrandError> {
        let store = self.engine.store();
        let mut id = new_session_id(self.agent.name());
        let mut attempts = 1;
        while store.load(&id).await?.is_some() {
            if attempts >= MAX_ID_ATTEMPTS {
                return Err(StrandError::Storage(format!(
                    "could not allocate a session id for '{}'",
                    self.agent.name()
                )));
            }
            id = new_session_id(self.agent.name());
            attempts += 1;
        }

        let handle = self
            .engine
            .start_with_id(self.agent.clone(), id, initial_message)
            .await?;
        let session = Session::new(self.agent.clone(), handle);
        info!(session_id = %session.id(), agent = %self.agent.name(), "Session started");
        self.sessions.lock().await.insert(session.clone());
        Ok(session)
    }

    /// Reattach to a stored session, continuing any turn that was in flight.
    ///
    /// The session map stays locked across the resume, so concurrent calls
    /// for one id share a single conversation task.
    pub async fn resume_session(&self, session_id: &str) -> Result<Session, StrandError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(session.clone());
        }
        let handle = self.engine.resume(self.agent.clone(), session_id).await?;
        let session = Session::new(self.agent.clone(), handle);
        sessions.insert(session.clone());
        info!(session_id = %session.id(), "Session resumed");
        Ok(session)
    }

    /// Resume every stored root conversation of this agent that was
    /// interrupted mid-turn. Sub-agent conversations are picked up by their
    /// parents when the delegation replays.
    pub async fn recover(&self) -> Result<Vec<Session>, StrandError> {
        let store = self.engine.store();
        let mut recovered = Vec::new();
        for id in store.list().await? {
            let Some(state) = store.load(&id).await? else {
                continue;
            };
            if state.parent.is_some() || state.agent != self.agent.name() || !state.status.is_busy() {
                continue;
            }
            match self.resume_session(&id).await {
                Ok(session) => recovered.push(session),
                Err(e) => warn!(session_id = %id, error = %e, "Failed to recover session"),
            }
        }
        info!(count = recovered.len(), "Recovered interrupted sessions");
        Ok(recovered)
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Sessions that can still take messages.
    pub async fn sessions(&self) -> Vec<Session> {
        let mut sessions = self.sessions.lock().await;
        sessions.prune_closed();
        let mut live: Vec<Session> = sessions.sessions().cloned().collect();
        live.sort_by(|a, b| a.id().cmp(b.id()));
        live
    }

    /// Cancel a session and forget it.
    pub async fn close_session(&self, session_id: &str) -> Result<(), StrandError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| StrandError::NotFound(format!("session '{session_id}'")))?;
        session.close().await;
        Ok(())
    }

    /// Stop all conversation tasks, leaving stored state resumable.
    pub async fn shutdown(&self) {
        let drained = self.sessions.lock().await.drain();
        info!(sessions = drained.len(), "Shutting down runner");
        self.engine.halt();
    }
}
