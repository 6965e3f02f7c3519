//! Model call gateway.
//!
//! Wraps a provider call with the worker pool, a per-attempt timeout and the
//! retry policy, then checks that what came back is either a usable final
//! answer or a list of well-formed calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::agent::definition::AgentDefinition;
use crate::config::StrandConfig;
use crate::error::StrandError;
use crate::provider::{ProviderFactory, ProviderRequest, ProviderResponse};
use crate::tools::validate_arguments;
use crate::types::{GenerationSettings, RequestedCall, Turn, Usage};
use crate::util::retry::{RetryFailure, RetryPolicy};
use crate::util::timeout::with_timeout;

/// A validated model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: Option<String>,
    pub calls: Vec<RequestedCall>,
    pub usage: Usage,
}

pub struct ModelGateway {
    providers: Arc<dyn ProviderFactory>,
    retry: RetryPolicy,
    timeout: Duration,
    settings: GenerationSettings,
    workers: Arc<Semaphore>,
}

impl ModelGateway {
    pub fn new(
        providers: Arc<dyn ProviderFactory>,
        config: &StrandConfig,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            providers,
            retry: config.retry.clone(),
            timeout: config.model_timeout,
            settings: config.generation.clone(),
            workers,
        }
    }

    /// Ask `agent`'s model for the next step of a conversation.
    ///
    /// Transient failures are retried; exhaustion yields
    /// [`StrandError::ModelUnavailable`]. Authentication and other
    /// non-transient failures yield [`StrandError::ModelConfiguration`]
    /// without retrying. Output that is neither text nor well-formed calls
    /// yields [`StrandError::ProtocolViolation`].
    pub async fn invoke(&self, turns: &[Turn], agent: &AgentDefinition) -> Result<ModelReply, StrandError> {
        let provider = self
            .providers
            .provider_for(agent.model())
            .map_err(|e| StrandError::ModelConfiguration(e.to_string()))?;

        let request = ProviderRequest {
            agent: agent.name().to_string(),
            model: agent.model().clone(),
            instructions: agent.instructions().to_string(),
            turns: turns.to_vec(),
            actions: agent.action_catalog(),
            settings: self.settings.clone(),
            response_schema: agent.output_schema().cloned(),
        };

        let outcome = self
            .retry
            .execute(|attempt| {
                let provider = provider.clone();
                let request = &request;
                async move {
                    let _permit = self
                        .workers
                        .acquire()
                        .await
                        .map_err(|_| StrandError::Cancelled)?;
                    tracing::debug!(
                        agent = %request.agent,
                        provider = provider.provider_name(),
                        model = provider.model_id(),
                        attempt,
                        "Calling model"
                    );
                    with_timeout(self.timeout, provider.generate(request)).await
                }
            })
            .await;

        match outcome {
            Ok(response) => validate_response(agent, response),
            Err(failure) => Err(classify_failure(failure)),
        }
    }
}

fn classify_failure(RetryFailure { attempts, error }: RetryFailure) -> StrandError {
    match error {
        StrandError::Serialization(e) => {
            StrandError::ProtocolViolation(format!("undecodable model response: {e}"))
        }
        e @ (StrandError::ProtocolViolation(_) | StrandError::Cancelled) => e,
        e if e.is_retryable() => StrandError::ModelUnavailable {
            attempts,
            message: e.to_string(),
        },
        e => StrandError::ModelConfiguration(e.to_string()),
    }
}

fn validate_response(agent: &AgentDefinition, response: ProviderResponse) -> Result<ModelReply, StrandError> {
    let ProviderResponse {
        text, calls, usage, ..
    } = response;

    let mut checked = Vec::with_capacity(calls.len());
    for mut call in calls {
        if call.name.trim().is_empty() {
            return Err(StrandError::ProtocolViolation(
                "model requested a call without a target name".into(),
            ));
        }
        if call.arguments.is_null() {
            call.arguments = serde_json::json!({});
        }
        if !call.arguments.is_object() {
            return Err(StrandError::ProtocolViolation(format!(
                "arguments for '{}' are not a JSON object: {}",
                call.name, call.arguments
            )));
        }
        checked.push(call);
    }

    let text = Some(text).filter(|t| !t.trim().is_empty());

    if checked.is_empty() {
        let Some(answer) = text else {
            return Err(StrandError::ProtocolViolation(
                "model returned neither text nor calls".into(),
            ));
        };
        if let Some(schema) = agent.output_schema() {
            let value: serde_json::Value = serde_json::from_str(strip_code_fence(&answer))
                .map_err(|e| {
                    StrandError::ProtocolViolation(format!("final answer is not valid JSON: {e}"))
                })?;
            validate_arguments(&value, schema).map_err(|reason| {
                StrandError::ProtocolViolation(format!(
                    "final answer violates the output schema: {reason}"
                ))
            })?;
        }
        return Ok(ModelReply {
            text: Some(answer),
            calls: Vec::new(),
            usage,
        });
    }

    Ok(ModelReply {
        text,
        calls: checked,
        usage,
    })
}

/// Models often wrap JSON answers in a markdown fence.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
