//! OpenAI Chat Completions API provider (also any compatible endpoint).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::StrandError;
use crate::types::*;

use super::http::{bearer_headers, error_from_response, shared_client};
use super::{ModelProvider, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model_id: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if !request.instructions.is_empty() {
            messages.push(json!({"role": "system", "content": request.instructions}));
        }
        messages.extend(request.turns.iter().flat_map(turn_to_openai));

        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model_id.clone().into());
        body.insert("messages".into(), messages.into());

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(seed) = settings.seed {
            body.insert("seed".into(), seed.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), json!(stops));
        }

        if !request.actions.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .actions
                .iter()
                .map(|a| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": a.name,
                            "description": a.description,
                            "parameters": a.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), tools.into());
        }

        if let Some(ref schema) = request.response_schema {
            body.insert(
                "response_format".into(),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": format!("{}_output", request.agent.replace('-', "_")),
                        "schema": schema,
                        "strict": false,
                    }
                }),
            );
        }

        serde_json::Value::Object(body)
    }
}

/// One turn can expand to several OpenAI messages (one per tool result).
fn turn_to_openai(turn: &Turn) -> Vec<serde_json::Value> {
    match turn.role {
        Role::User => vec![json!({"role": "user", "content": turn.text()})],
        Role::Assistant => {
            let text = turn.text();
            let content = if text.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(text)
            };
            let mut msg = json!({"role": "assistant", "content": content});
            let calls: Vec<serde_json::Value> = turn
                .calls()
                .map(|c| {
                    json!({
                        "id": c.wire_id,
                        "type": "function",
                        "function": {
                            "name": c.target,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            if !calls.is_empty() {
                msg["tool_calls"] = calls.into();
            }
            vec![msg]
        }
        Role::ToolResult => turn
            .results()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.wire_id,
                    "content": r.to_model_value().to_string(),
                })
            })
            .collect(),
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, StrandError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model_id, agent = %request.agent, "OpenAI generate");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let raw = resp.text().await?;
        let data: OpenAiChatResponse = serde_json::from_str(&raw)?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| StrandError::ProtocolViolation("No choices in OpenAI response".into()))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| RequestedCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments)),
            })
            .collect();

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            calls,
            usage: data
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().map(parse_finish_reason),
        })
    }
}

fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

// Internal OpenAI response types

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
