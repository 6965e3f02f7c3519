//! Shared test helpers: scripted mock provider and recording tools.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use strand::agent_loop::{Engine, EngineHandle, EngineStatus};
use strand::config::StrandConfig;
use strand::error::StrandError;
use strand::provider::{ModelProvider, ProviderRequest, ProviderResponse, SingleProvider};
use strand::store::ConversationStore;
use strand::tools::{FunctionTool, ParameterSchema, ToolExecutionContext};
use strand::types::{RequestedCall, Role, Turn, Usage};
use strand::util::retry::RetryPolicy;

type Responder = Box<dyn Fn(&ProviderRequest) -> Result<ProviderResponse, StrandError> + Send + Sync>;

enum Scripted {
    Respond(ProviderResponse),
    Fail(Box<dyn Fn() -> StrandError + Send + Sync>),
}

/// Provider whose responses are queued per agent name.
///
/// When an agent's queue is empty the fallback responder, if any, answers;
/// otherwise the call fails with a non-retryable API error.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallbacks: Mutex<HashMap<String, Arc<Responder>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, agent: &str, response: ProviderResponse) {
        self.push(agent, Scripted::Respond(response));
    }

    pub fn text(&self, agent: &str, text: &str) {
        self.respond(agent, ProviderResponse::text(text));
    }

    /// Queue one response requesting `calls` as `(name, arguments)`.
    pub fn calls(&self, agent: &str, calls: &[(&str, Value)]) {
        self.respond(agent, calls_response(calls));
    }

    pub fn fail_with(&self, agent: &str, error: impl Fn() -> StrandError + Send + Sync + 'static) {
        self.push(agent, Scripted::Fail(Box::new(error)));
    }

    pub fn fallback(
        &self,
        agent: &str,
        responder: impl Fn(&ProviderRequest) -> Result<ProviderResponse, StrandError> + Send + Sync + 'static,
    ) {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(agent.to_string(), Arc::new(Box::new(responder)));
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, agent: &str) -> Vec<ProviderRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.agent == agent)
            .collect()
    }

    fn push(&self, agent: &str, step: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push_back(step);
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, StrandError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error()),
            None => {
                let fallback = self.fallbacks.lock().unwrap().get(&request.agent).cloned();
                match fallback {
                    Some(responder) => responder(request),
                    None => Err(StrandError::api(
                        400,
                        format!("no scripted response left for '{}'", request.agent),
                    )),
                }
            }
        }
    }
}

/// Forwards to a shared [`ScriptedProvider`] so tests keep a handle on it.
pub struct SharedProvider(pub Arc<ScriptedProvider>);

#[async_trait]
impl ModelProvider for SharedProvider {
    fn provider_name(&self) -> &str {
        self.0.provider_name()
    }

    fn model_id(&self) -> &str {
        self.0.model_id()
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, StrandError> {
        self.0.generate(request).await
    }
}

pub fn calls_response(calls: &[(&str, Value)]) -> ProviderResponse {
    let mut response = ProviderResponse::calls(
        calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| RequestedCall {
                id: format!("wire-{i}-{name}"),
                name: (*name).to_string(),
                arguments: args.clone(),
            })
            .collect(),
    );
    response.usage = Usage {
        input_tokens: 10,
        output_tokens: 5,
        total_tokens: 15,
    };
    response
}

/// Config with fast retries, suitable for paused-clock tests.
pub fn test_config() -> StrandConfig {
    StrandConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        },
        ..StrandConfig::default()
    }
}

pub fn engine(provider: &Arc<ScriptedProvider>, store: Arc<dyn ConversationStore>, config: StrandConfig) -> Engine {
    Engine::builder(Arc::new(SingleProvider(Arc::new(SharedProvider(provider.clone())))))
        .store(store)
        .config(config)
        .build()
        .unwrap()
}

/// Executions of a recording tool, in completion order.
#[derive(Clone, Default)]
pub struct ToolLog {
    entries: Arc<Mutex<Vec<(String, Value, bool)>>>,
    count: Arc<AtomicUsize>,
}

impl ToolLog {
    pub fn record(&self, name: &str, args: &Value, ctx: &ToolExecutionContext) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone(), ctx.redelivery));
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _, _)| n.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Value, bool)> {
        self.entries.lock().unwrap().clone()
    }
}

/// Tool that sleeps for `delay`, records the execution and returns `result`.
pub fn recording_tool(name: &str, delay: Duration, result: Value, log: &ToolLog) -> FunctionTool {
    let log = log.clone();
    let tool_name = name.to_string();
    FunctionTool::new(name, format!("test tool {name}"), ParameterSchema::empty(), move |args, ctx| {
        let log = log.clone();
        let result = result.clone();
        let tool_name = tool_name.clone();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            log.record(&tool_name, args.raw(), &ctx);
            Ok(result)
        }
    })
}

/// Tool that never returns until its conversation is cancelled.
pub fn hanging_tool(name: &str, started: &ToolLog) -> FunctionTool {
    let started = started.clone();
    let tool_name = name.to_string();
    FunctionTool::new(name, "never finishes", ParameterSchema::empty(), move |args, ctx| {
        let started = started.clone();
        let tool_name = tool_name.clone();
        async move {
            started.record(&tool_name, args.raw(), &ctx);
            ctx.cancellation.cancelled().await;
            Ok(json!(null))
        }
    })
}

pub fn roles(turns: &[Turn]) -> Vec<Role> {
    turns.iter().map(|t| t.role).collect()
}

/// Wait until the conversation reaches `status`.
pub async fn wait_for_status(handle: &EngineHandle, status: EngineStatus) {
    let mut rx = handle.watch();
    rx.wait_for(|s| s.status == status).await.unwrap();
}

/// Wait until `log` has recorded at least `n` executions.
pub async fn wait_for_count(log: &ToolLog, n: usize) {
    while log.count() < n {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
