//! Google Gemini API provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::StrandError;
use crate::types::*;

use super::http::{error_from_response, google_headers, shared_client};
use super::{ModelProvider, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(model_id: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        let model_id: String = model_id.into();
        Self {
            model_id: model_id
                .strip_prefix("models/")
                .map(str::to_string)
                .unwrap_or(model_id),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("contents".into(), build_contents(&request.turns).into());

        if !request.instructions.is_empty() {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": [{"text": request.instructions}]}),
            );
        }

        let settings = &request.settings;
        let mut gen_config = serde_json::Map::new();
        if let Some(max) = settings.max_tokens {
            gen_config.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            gen_config.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            gen_config.insert("topP".into(), top_p.into());
        }
        if let Some(seed) = settings.seed {
            gen_config.insert("seed".into(), seed.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            gen_config.insert("stopSequences".into(), json!(stops));
        }
        // Function calling and JSON mode are mutually exclusive in Gemini.
        if request.response_schema.is_some() && request.actions.is_empty() {
            gen_config.insert("responseMimeType".into(), "application/json".into());
        }
        if !gen_config.is_empty() {
            body.insert("generationConfig".into(), gen_config.into());
        }

        if !request.actions.is_empty() {
            let fn_decls: Vec<serde_json::Value> = request
                .actions
                .iter()
                .map(|a| {
                    json!({
                        "name": a.name,
                        "description": a.description,
                        "parameters": a.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), json!([{"functionDeclarations": fn_decls}]));
        }

        serde_json::Value::Object(body)
    }
}

/// Gemini wants alternating user/model contents, so consecutive tool-result
/// turns are folded into a single content of `functionResponse` parts.
fn build_contents(turns: &[Turn]) -> Vec<serde_json::Value> {
    let mut contents: Vec<serde_json::Value> = Vec::with_capacity(turns.len());
    let mut pending_results: Vec<serde_json::Value> = Vec::new();

    let flush = |contents: &mut Vec<serde_json::Value>, parts: &mut Vec<serde_json::Value>| {
        if !parts.is_empty() {
            contents.push(json!({"role": "user", "parts": std::mem::take(parts)}));
        }
    };

    for turn in turns {
        match turn.role {
            Role::ToolResult => {
                pending_results.extend(turn.results().map(|r| {
                    json!({
                        "functionResponse": {
                            "name": r.target,
                            "response": r.to_model_value(),
                        }
                    })
                }));
            }
            Role::User => {
                flush(&mut contents, &mut pending_results);
                contents.push(json!({"role": "user", "parts": [{"text": turn.text()}]}));
            }
            Role::Assistant => {
                flush(&mut contents, &mut pending_results);
                let mut parts = Vec::new();
                let text = turn.text();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                parts.extend(turn.calls().map(|c| {
                    json!({"functionCall": {"name": c.target, "args": c.arguments}})
                }));
                contents.push(json!({"role": "model", "parts": parts}));
            }
        }
    }
    flush(&mut contents, &mut pending_results);
    contents
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, StrandError> {
        let body = self.build_request_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model_id);

        debug!(model = %self.model_id, agent = %request.agent, "Google generate");

        let resp = shared_client()
            .post(&url)
            .headers(google_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let raw = resp.text().await?;
        let data: GeminiResponse = serde_json::from_str(&raw)?;

        let candidate = data.candidates.into_iter().next().ok_or_else(|| {
            StrandError::ProtocolViolation("No candidates in Gemini response".into())
        })?;

        let mut text = String::new();
        let mut calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(fc) = part.function_call {
                calls.push(RequestedCall {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: fc.name,
                    arguments: fc.args.unwrap_or_else(|| json!({})),
                });
            }
        }

        let finish_reason = candidate.finish_reason.as_deref().map(|r| match r {
            "STOP" if !calls.is_empty() => FinishReason::ToolCalls,
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        });

        let usage = data
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            calls,
            usage,
            finish_reason,
        })
    }
}

// Internal Gemini response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: u64, target: &str) -> CallRequest {
        CallRequest {
            id,
            wire_id: format!("w{id}"),
            target: target.into(),
            arguments: json!({"query": "product launch"}),
        }
    }

    #[test]
    fn consecutive_results_share_one_content() {
        let a = call(1, "search_specialist");
        let b = call(2, "get_order_status");
        let turns = vec![
            Turn::user("hi"),
            Turn::assistant(Some("Looking.".into()), vec![a.clone(), b.clone()]),
            Turn::tool_result(CallResult::value(&a, json!("Found 3 relevant threads..."))),
            Turn::tool_result(CallResult::value(&b, json!({"status": "in transit"}))),
        ];
        let contents = build_contents(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Looking.");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["name"], "search_specialist");
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0]["functionResponse"]["response"]["content"],
            "Found 3 relevant threads..."
        );
        assert_eq!(parts[1]["functionResponse"]["name"], "get_order_status");
    }

    #[test]
    fn strips_models_prefix() {
        let provider = GoogleProvider::new("models/gemini-2.0-flash", "k".into(), None);
        assert_eq!(provider.model_id(), "gemini-2.0-flash");
    }
}
