//! Conversation engine.
//!
//! Every conversation, root or sub-agent, is driven by its own task. The
//! task owns the live [`ConversationState`] and walks it through the state
//! machine one step at a time: ask the model, then resolve the requested
//! calls concurrently, then ask the model again, until a final answer or a
//! failure. The state is persisted after each transition, so a task that
//! disappears (crash, [`Engine::halt`]) can be relaunched from the store and
//! picks up at the step it was on.
//!
//! Callers talk to the task through an [`EngineHandle`]: user messages go
//! over an mpsc channel and are acknowledged once durable; progress is
//! published on a `watch` channel as an [`EngineSnapshot`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{EngineEventKind, EngineEventSink, EventEmitter};
use super::gateway::{ModelGateway, ModelReply};
use super::router::{route, CallScope, DelegationRouter, TurnPlan};
use super::state::{ConversationState, EngineStatus};
use crate::agent::definition::AgentDefinition;
use crate::config::StrandConfig;
use crate::error::{FailureReport, StrandError};
use crate::provider::ProviderFactory;
use crate::store::{validate_conversation_id, ConversationStore, MemoryStore};
use crate::types::Turn;

const COMMAND_BUFFER: usize = 16;

/// Shared engine services: model gateway, router, store, limits.
///
/// Cheap to clone. One engine serves any number of conversations.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    gateway: ModelGateway,
    router: DelegationRouter,
    store: Arc<dyn ConversationStore>,
    config: StrandConfig,
    workers: Arc<Semaphore>,
    events: Option<EngineEventSink>,
    halt: CancellationToken,
}

pub struct EngineBuilder {
    providers: Arc<dyn ProviderFactory>,
    store: Option<Arc<dyn ConversationStore>>,
    config: StrandConfig,
    events: Option<EngineEventSink>,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: StrandConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_sink(mut self, sink: EngineEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Defaults to an in-memory store.
    pub fn build(self) -> Result<Engine, StrandError> {
        self.config.validate()?;
        let workers = Arc::new(Semaphore::new(self.config.worker_pool_size));
        let gateway = ModelGateway::new(self.providers, &self.config, workers.clone());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn ConversationStore>);
        Ok(Engine {
            inner: Arc::new(EngineInner {
                gateway,
                router: DelegationRouter::new(),
                store,
                config: self.config,
                workers,
                events: self.events,
                halt: CancellationToken::new(),
            }),
        })
    }
}

impl Engine {
    pub fn builder(providers: Arc<dyn ProviderFactory>) -> EngineBuilder {
        EngineBuilder {
            providers,
            store: None,
            config: StrandConfig::default(),
            events: None,
        }
    }

    pub fn config(&self) -> &StrandConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.store
    }

    pub(crate) fn workers(&self) -> &Arc<Semaphore> {
        &self.inner.workers
    }

    /// Start a root conversation with a generated id and an initial user
    /// message.
    pub async fn start(
        &self,
        definition: Arc<AgentDefinition>,
        input: impl Into<String>,
    ) -> Result<EngineHandle, StrandError> {
        let id = format!("{}-{}", definition.name(), uuid::Uuid::new_v4().simple());
        self.start_with_id(definition, id, Some(input.into())).await
    }

    /// Start a root conversation under `id`. Without an initial message the
    /// conversation waits Idle for one.
    pub async fn start_with_id(
        &self,
        definition: Arc<AgentDefinition>,
        id: impl Into<String>,
        input: Option<String>,
    ) -> Result<EngineHandle, StrandError> {
        let id = id.into();
        validate_conversation_id(&id)?;
        if self.inner.store.load(&id).await?.is_some() {
            return Err(StrandError::InvalidArgument(format!(
                "conversation '{id}' already exists"
            )));
        }
        let mut state = ConversationState::new(id, definition.name(), 1, None);
        if let Some(input) = input {
            state.append_user(input)?;
        }
        self.inner.store.save(&state).await?;
        info!(conversation_id = %state.id, agent = %state.agent, "Conversation started");
        Ok(self.launch(definition, state, CancellationToken::new(), false))
    }

    /// Relaunch a stored conversation from its last persisted step.
    pub async fn resume(
        &self,
        definition: Arc<AgentDefinition>,
        id: &str,
    ) -> Result<EngineHandle, StrandError> {
        let state = self
            .inner
            .store
            .load(id)
            .await?
            .ok_or_else(|| StrandError::NotFound(format!("conversation '{id}'")))?;
        self.relaunch(definition, state, CancellationToken::new())
    }

    /// Stop every conversation task without recording anything. Stored
    /// state stays as it was at the last transition and can be resumed by
    /// another engine.
    pub fn halt(&self) {
        info!("Halting engine");
        self.inner.halt.cancel();
    }

    pub(crate) async fn start_child(
        &self,
        definition: Arc<AgentDefinition>,
        id: String,
        depth: usize,
        parent: String,
        input: String,
        cancel: CancellationToken,
    ) -> Result<EngineHandle, StrandError> {
        let mut state = ConversationState::new(id, definition.name(), depth, Some(parent));
        state.append_user(input)?;
        self.inner.store.save(&state).await?;
        Ok(self.launch(definition, state, cancel, false))
    }

    pub(crate) fn relaunch(
        &self,
        definition: Arc<AgentDefinition>,
        state: ConversationState,
        cancel: CancellationToken,
    ) -> Result<EngineHandle, StrandError> {
        state.validate()?;
        if state.agent != definition.name() {
            return Err(StrandError::InvalidConfiguration(format!(
                "conversation '{}' belongs to agent '{}', not '{}'",
                state.id,
                state.agent,
                definition.name()
            )));
        }
        info!(
            conversation_id = %state.id,
            status = %state.status,
            turns = state.turns.len(),
            "Resuming conversation"
        );
        // Only calls persisted before the restart are redeliveries.
        let redelivery = state.status.awaits_calls();
        Ok(self.launch(definition, state, cancel, redelivery))
    }

    fn launch(
        &self,
        definition: Arc<AgentDefinition>,
        state: ConversationState,
        cancel: CancellationToken,
        redelivery: bool,
    ) -> EngineHandle {
        let id = state.id.clone();
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(EngineSnapshot::from(&state));
        let state = Arc::new(RwLock::new(state));

        let task = ConversationTask {
            engine: self.clone(),
            events: EventEmitter::new(id.clone(), self.inner.events.clone()),
            id: id.clone(),
            definition,
            state: state.clone(),
            status_tx,
            cancel: cancel.clone(),
            redelivery: AtomicBool::new(redelivery),
        };
        tokio::spawn(task.into_task(command_rx));

        EngineHandle {
            id,
            commands,
            status: status_rx,
            state,
            cancel,
        }
    }
}

/// What an observer sees of a conversation after each transition.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub conversation_id: String,
    pub status: EngineStatus,
    pub generation: u64,
    pub turns: usize,
    /// Outcome of the latest user turn, once settled.
    pub reply: Option<Result<String, FailureReport>>,
}

impl From<&ConversationState> for EngineSnapshot {
    fn from(state: &ConversationState) -> Self {
        Self {
            conversation_id: state.id.clone(),
            status: state.status,
            generation: state.generation,
            turns: state.turns.len(),
            reply: state.reply(),
        }
    }
}

enum Command {
    Submit {
        text: String,
        ack: oneshot::Sender<Result<(), StrandError>>,
    },
}

/// Caller side of a running conversation.
#[derive(Clone)]
pub struct EngineHandle {
    id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<EngineSnapshot>,
    state: Arc<RwLock<ConversationState>>,
    cancel: CancellationToken,
}

impl EngineHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().status
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.status.clone()
    }

    /// Append a user message. Returns once the turn is durable.
    ///
    /// Fails with [`StrandError::EngineBusy`] while a turn is in progress
    /// and [`StrandError::EngineClosed`] once the conversation has failed or
    /// been cancelled.
    pub async fn submit_user_message(&self, text: impl Into<String>) -> Result<(), StrandError> {
        let (ack, ack_rx) = oneshot::channel();
        let command = Command::Submit {
            text: text.into(),
            ack,
        };
        if self.commands.send(command).await.is_err() {
            return Err(StrandError::EngineClosed {
                status: self.status(),
            });
        }
        ack_rx.await.unwrap_or_else(|_| {
            Err(StrandError::EngineClosed {
                status: self.status(),
            })
        })
    }

    /// Wait for the current user turn to settle and return its answer.
    pub async fn await_reply(&self) -> Result<String, StrandError> {
        let mut rx = self.status.clone();
        let settled = rx.wait_for(|s| !s.status.is_busy()).await.map(|s| (*s).clone());
        let snapshot = match settled {
            Ok(snapshot) => snapshot,
            Err(_) => {
                return Err(StrandError::EngineClosed {
                    status: self.status(),
                })
            }
        };
        match snapshot.reply {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(report)) => Err(report.into_error()),
            None => Err(StrandError::InvalidArgument(format!(
                "conversation '{}' has no user turn in progress",
                self.id
            ))),
        }
    }

    /// Copy of the transcript so far.
    pub async fn transcript(&self) -> Vec<Turn> {
        self.state.read().await.turns.clone()
    }

    /// Assistant texts appended since `watermark`, plus the next watermark.
    pub async fn thoughts(&self, watermark: usize) -> (Vec<String>, usize) {
        self.state.read().await.assistant_texts(watermark)
    }

    /// Cancel the conversation and its sub-agents, and wait until the
    /// cancellation is recorded.
    pub async fn close(&self) -> EngineStatus {
        self.cancel.cancel();
        let mut rx = self.status.clone();
        // Bound to a local so the borrowed snapshot is released before `rx`.
        #[allow(clippy::let_and_return)]
        let status = match rx.wait_for(|s| s.status.is_closed()).await {
            Ok(snapshot) => snapshot.status,
            Err(_) => self.status(),
        };
        status
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

enum Interrupt {
    Halted,
    Cancelled,
    Stepped(Result<(), StrandError>),
}

struct ConversationTask {
    engine: Engine,
    events: EventEmitter,
    id: String,
    definition: Arc<AgentDefinition>,
    state: Arc<RwLock<ConversationState>>,
    status_tx: watch::Sender<EngineSnapshot>,
    cancel: CancellationToken,
    redelivery: AtomicBool,
}

impl ConversationTask {
    // Sub-agent calls start nested tasks from inside `run`, so the future is
    // boxed to keep its type finite.
    fn into_task(self, commands: mpsc::Receiver<Command>) -> BoxFuture<'static, ()> {
        Box::pin(self.run(commands))
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        debug!(
            conversation_id = %self.id,
            agent = %self.definition.name(),
            "Engine task started"
        );
        let halt = self.engine.inner.halt.clone();
        let mut accepting = true;

        loop {
            let status = self.state.read().await.status;
            if status.is_closed() {
                break;
            }

            if status.is_busy() {
                let interrupt = {
                    let step = self.step(status);
                    tokio::pin!(step);
                    loop {
                        tokio::select! {
                            biased;
                            _ = halt.cancelled() => break Interrupt::Halted,
                            _ = self.cancel.cancelled() => break Interrupt::Cancelled,
                            result = &mut step => break Interrupt::Stepped(result),
                            command = commands.recv(), if accepting => match command {
                                Some(Command::Submit { ack, .. }) => {
                                    let status = self.status_tx.borrow().status;
                                    let _ = ack.send(Err(StrandError::EngineBusy { status }));
                                }
                                None => accepting = false,
                            },
                        }
                    }
                };
                match interrupt {
                    Interrupt::Halted => break,
                    Interrupt::Cancelled => {
                        self.record_cancel().await;
                        break;
                    }
                    Interrupt::Stepped(Ok(())) => {}
                    Interrupt::Stepped(Err(e)) => self.fail(e).await,
                }
                continue;
            }

            if !accepting {
                break;
            }
            tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                _ = self.cancel.cancelled() => {
                    self.record_cancel().await;
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Submit { text, ack }) => {
                        let _ = ack.send(self.accept(text).await);
                    }
                    None => break,
                },
            }
        }

        debug!(conversation_id = %self.id, "Engine task stopped");
    }

    async fn step(&self, status: EngineStatus) -> Result<(), StrandError> {
        match status {
            EngineStatus::AwaitingModel => self.model_step().await,
            EngineStatus::AwaitingTools | EngineStatus::AwaitingSubAgent => self.calls_step().await,
            _ => Ok(()),
        }
    }

    async fn accept(&self, text: String) -> Result<(), StrandError> {
        self.commit(|state| state.append_user(text)).await?;
        debug!(conversation_id = %self.id, "User turn accepted");
        Ok(())
    }

    async fn model_step(&self) -> Result<(), StrandError> {
        let max_iterations = self.engine.inner.config.max_iterations;
        let (turns, iteration) = {
            let mut state = self.state.write().await;
            let iteration = state.begin_model_call()?;
            (state.turns.clone(), iteration)
        };
        if iteration > max_iterations {
            return Err(StrandError::IterationLimitExceeded(max_iterations));
        }

        let ModelReply { text, calls, usage } = self
            .engine
            .inner
            .gateway
            .invoke(&turns, &self.definition)
            .await?;

        match route(&self.definition, text, calls) {
            TurnPlan::FinalAnswer(answer) => {
                self.commit(|state| state.record_final_answer(answer, &usage))
                    .await?;
                info!(conversation_id = %self.id, iteration, "Turn completed");
            }
            TurnPlan::Dispatch { text, actions } => {
                let planned = actions
                    .into_iter()
                    .map(|action| {
                        let kind = action.kind();
                        (action.into_call(), kind)
                    })
                    .collect();
                let requests = self
                    .commit(|state| state.record_calls(text, planned, &usage))
                    .await?;
                debug!(
                    conversation_id = %self.id,
                    iteration,
                    calls = requests.len(),
                    "Calls requested"
                );
            }
        }
        Ok(())
    }

    /// Resolve every pending call, saving each result as it lands, then
    /// commit them to the transcript in call-id order.
    async fn calls_step(&self) -> Result<(), StrandError> {
        let (pending, depth) = {
            let state = self.state.read().await;
            (state.pending_calls(), state.depth)
        };
        let scope = CallScope {
            conversation_id: self.id.clone(),
            depth,
            cancellation: self.cancel.clone(),
            redelivery: self.redelivery.swap(false, Ordering::SeqCst),
        };
        for call in &pending {
            self.events.emit(EngineEventKind::CallDispatched {
                call_id: call.request.id,
                target: call.request.target.clone(),
                kind: call.kind,
            });
        }

        let router = &self.engine.inner.router;
        let scope = &scope;
        let mut results = stream::iter(pending)
            .map(|call| async move {
                router
                    .resolve(&self.engine, &self.definition, scope, &call.request)
                    .await
            })
            .buffer_unordered(self.engine.inner.config.max_concurrent_calls);

        while let Some(result) = results.next().await {
            let call_id = result.call_id;
            let target = result.target.clone();
            let is_error = result.is_error();
            if !self.commit(|state| state.resolve_call(result)).await? {
                warn!(conversation_id = %self.id, call_id, "Duplicate call result ignored");
            }
            self.events.emit(EngineEventKind::CallResolved {
                call_id,
                target,
                is_error,
            });
        }
        drop(results);

        self.commit(|state| state.commit_results()).await
    }

    /// Apply `mutate`, persist the new state and publish it.
    async fn commit<R>(
        &self,
        mutate: impl FnOnce(&mut ConversationState) -> Result<R, StrandError>,
    ) -> Result<R, StrandError> {
        let (value, snapshot, previous_status, previous_turns) = {
            let mut state = self.state.write().await;
            let previous_status = state.status;
            let previous_turns = state.turns.len();
            let value = mutate(&mut state)?;
            (value, state.clone(), previous_status, previous_turns)
        };
        self.engine.inner.store.save(&snapshot).await?;
        self.publish(&snapshot, previous_status, previous_turns);
        Ok(value)
    }

    fn publish(&self, state: &ConversationState, previous_status: EngineStatus, previous_turns: usize) {
        for (index, turn) in state.turns.iter().enumerate().skip(previous_turns) {
            self.events
                .emit(EngineEventKind::TurnAppended { index, role: turn.role });
        }
        if state.status != previous_status {
            debug!(
                conversation_id = %self.id,
                from = %previous_status,
                to = %state.status,
                "Status changed"
            );
            self.events.emit(EngineEventKind::StatusChanged {
                status: state.status,
            });
        }
        self.status_tx.send_replace(EngineSnapshot::from(state));
    }

    async fn fail(&self, error: StrandError) {
        let report = error.report();
        error!(
            conversation_id = %self.id,
            kind = %report.kind,
            error = %error,
            "Conversation turn failed"
        );
        self.settle(|state| state.fail(report)).await;
    }

    async fn record_cancel(&self) {
        info!(conversation_id = %self.id, "Conversation cancelled");
        self.settle(ConversationState::cancel).await;
    }

    /// Terminal transitions are published even when they cannot be saved.
    async fn settle(&self, transition: impl FnOnce(&mut ConversationState)) {
        let saved = self
            .commit(|state| {
                transition(state);
                Ok(())
            })
            .await;
        if let Err(e) = saved {
            error!(conversation_id = %self.id, error = %e, "Failed to persist final state");
            let state = self.state.read().await;
            self.status_tx.send_replace(EngineSnapshot::from(&*state));
        }
    }
}
