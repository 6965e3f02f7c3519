//! Provider round trips against a mock HTTP server.

mod common;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::test_config;
use strand::agent::{AgentDefinition, Runner};
use strand::config::ProviderConfig;
use strand::error::{FailureKind, StrandError};
use strand::models::ProviderKind;
use strand::store::ConversationStore;
use strand::tools::{FunctionTool, ParameterSchema};

fn order_status_tool() -> FunctionTool {
    FunctionTool::new(
        "get_order_status",
        "Look up an order",
        ParameterSchema::object().string("order_id", "Order number", true).build(),
        |args, _ctx| async move {
            let order_id = args.get_str("order_id")?.to_string();
            Ok(json!({"order_id": order_id, "status": "shipped"}))
        },
    )
}

fn openai_text(text: &str) -> Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    })
}

async fn openai_runner(server: &MockServer, agent: AgentDefinition) -> Runner {
    let providers = ProviderConfig::new()
        .with_api_key(ProviderKind::OpenAi, "test-key")
        .with_base_url(ProviderKind::OpenAi, server.uri());
    Runner::builder(agent)
        .provider_config(providers)
        .config(test_config())
        .build()
        .unwrap()
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn openai_tool_call_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "get_order_status",
                            "arguments": "{\"order_id\":\"12345\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_text(
            "Your order 12345 has shipped.",
        )))
        .mount(&server)
        .await;

    let agent = AgentDefinition::builder("support")
        .instructions("Help customers with orders.")
        .model("openai:gpt-4o-mini")
        .function(order_status_tool())
        .build()
        .unwrap();
    let runner = openai_runner(&server, agent).await;
    let session = runner.start_session(None).await.unwrap();

    let answer = session.send("Where is my order 12345?").await.unwrap();
    assert_eq!(answer, "Your order 12345 has shipped.");

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["model"], "gpt-4o-mini");
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert_eq!(bodies[0]["tools"][0]["function"]["name"], "get_order_status");

    let followup = bodies[1]["messages"].as_array().unwrap();
    let tool_message = followup.last().unwrap();
    assert_eq!(tool_message["role"], "tool");
    assert_eq!(tool_message["tool_call_id"], "call_abc");
    let content: Value = serde_json::from_str(tool_message["content"].as_str().unwrap()).unwrap();
    assert_eq!(
        content,
        json!({"content": {"order_id": "12345", "status": "shipped"}})
    );
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_text("Hello!")))
        .mount(&server)
        .await;

    let agent = AgentDefinition::builder("support")
        .model("openai:gpt-4o-mini")
        .build()
        .unwrap();
    let runner = openai_runner(&server, agent).await;
    let session = runner.start_session(None).await.unwrap();

    assert_eq!(session.send("hi").await.unwrap(), "Hello!");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_credentials_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let agent = AgentDefinition::builder("support")
        .model("openai:gpt-4o-mini")
        .build()
        .unwrap();
    let runner = openai_runner(&server, agent).await;
    let session = runner.start_session(None).await.unwrap();

    match session.send("hi").await {
        Err(StrandError::TurnFailed(report)) => {
            assert_eq!(report.kind, FailureKind::ModelConfiguration);
            assert!(report.message.contains("invalid api key"));
        }
        other => panic!("expected a failed turn, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_credentials_are_a_configuration_failure() {
    let agent = AgentDefinition::builder("support")
        .model("openai:gpt-4o-mini")
        .build()
        .unwrap();
    let runner = Runner::builder(agent)
        .provider_config(ProviderConfig::new())
        .config(test_config())
        .build()
        .unwrap();
    let session = runner.start_session(None).await.unwrap();

    match session.send("hi").await {
        Err(StrandError::TurnFailed(report)) => {
            assert_eq!(report.kind, FailureKind::ModelConfiguration);
        }
        other => panic!("expected a failed turn, got {other:?}"),
    }
}

#[tokio::test]
async fn google_text_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Bonjour!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 5,
                "candidatesTokenCount": 2,
                "totalTokenCount": 7
            }
        })))
        .mount(&server)
        .await;

    let agent = AgentDefinition::builder("greeter")
        .model("gemini:gemini-2.0-flash")
        .build()
        .unwrap();
    let providers = ProviderConfig::new()
        .with_api_key(ProviderKind::Google, "g-key")
        .with_base_url(ProviderKind::Google, server.uri());
    let runner = Runner::builder(agent)
        .provider_config(providers)
        .config(test_config())
        .build()
        .unwrap();

    let session = runner
        .start_session(Some("Say hello in French".into()))
        .await
        .unwrap();
    assert_eq!(session.reply().await.unwrap(), "Bonjour!");

    let state = runner.engine().store().load(session.id()).await.unwrap().unwrap();
    assert_eq!(state.usage.total_tokens, 7);
}
