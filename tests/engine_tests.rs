//! Tests for the conversation engine: model/tool loop, ordering, limits and
//! failure handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use strand::agent::AgentDefinition;
use strand::agent_loop::{EngineEvent, EngineEventKind, EngineStatus};
use strand::error::{CallError, FailureKind, StrandError};
use strand::provider::SingleProvider;
use strand::store::{ConversationStore, MemoryStore};
use strand::tools::{FunctionTool, ParameterSchema};
use strand::types::{CallOutcome, Role};

fn order_status_tool(log: &ToolLog) -> FunctionTool {
    let log = log.clone();
    FunctionTool::new(
        "get_order_status",
        "Look up the shipping status of an order",
        ParameterSchema::object().string("order_id", "Order number", true).build(),
        move |args, ctx| {
            let log = log.clone();
            async move {
                log.record("get_order_status", args.raw(), &ctx);
                assert_eq!(args.get_str("order_id")?, "12345");
                Ok(json!({"status": "in transit", "eta": "tomorrow"}))
            }
        },
    )
}

#[tokio::test]
async fn order_status_round_trip() {
    let provider = ScriptedProvider::new();
    provider.calls("support", &[("get_order_status", json!({"order_id": "12345"}))]);
    provider.text("support", "Your order #12345 is expected to be delivered tomorrow.");

    let log = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .instructions("Help customers with orders.")
            .function(order_status_tool(&log))
            .build()
            .unwrap(),
    );
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&provider, store.clone(), test_config());

    let handle = engine
        .start(agent, "What's the status of order 12345?")
        .await
        .unwrap();
    let answer = handle.await_reply().await.unwrap();

    assert_eq!(answer, "Your order #12345 is expected to be delivered tomorrow.");
    assert_eq!(handle.status(), EngineStatus::Completed);
    assert_eq!(log.count(), 1);

    let transcript = handle.transcript().await;
    assert_eq!(
        roles(&transcript),
        vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
    );
    let result = transcript[2].results().next().unwrap();
    assert_eq!(
        result.to_model_value(),
        json!({"content": {"status": "in transit", "eta": "tomorrow"}})
    );

    // The second model call saw the tool result.
    let requests = provider.requests_for("support");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].turns.len(), 3);
    assert_eq!(requests[1].actions[0].name, "get_order_status");

    let stored = store.load(handle.id()).await.unwrap().unwrap();
    assert_eq!(stored.status, EngineStatus::Completed);
    assert_eq!(stored.turns.len(), 4);
    assert_eq!(stored.usage.total_tokens, 15);
}

#[tokio::test(start_paused = true)]
async fn results_commit_in_call_id_order() {
    let provider = ScriptedProvider::new();
    provider.calls(
        "support",
        &[("slow", json!({})), ("medium", json!({})), ("fast", json!({}))],
    );
    provider.text("support", "All done.");

    let log = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .function(recording_tool("slow", Duration::from_millis(300), json!("slow"), &log))
            .function(recording_tool("medium", Duration::from_millis(200), json!("medium"), &log))
            .function(recording_tool("fast", Duration::from_millis(100), json!("fast"), &log))
            .build()
            .unwrap(),
    );
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "go").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "All done.");

    // Completion order is the reverse of request order...
    assert_eq!(log.names(), vec!["fast", "medium", "slow"]);

    // ...but the transcript follows call ids.
    let transcript = handle.transcript().await;
    let committed: Vec<(u64, String)> = transcript
        .iter()
        .flat_map(|t| t.results().map(|r| (r.call_id, r.target.clone())))
        .collect();
    assert_eq!(
        committed,
        vec![
            (1, "slow".to_string()),
            (2, "medium".to_string()),
            (3, "fast".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn tool_timeout_is_fed_back_and_retried_by_the_model() {
    let provider = ScriptedProvider::new();
    provider.calls("support", &[("lookup", json!({"fast": false}))]);
    provider.calls("support", &[("lookup", json!({"fast": true}))]);
    provider.text("support", "Found it on the second try.");

    let log = ToolLog::default();
    let tool_log = log.clone();
    let lookup = FunctionTool::new(
        "lookup",
        "slow unless asked to hurry",
        ParameterSchema::object()
            .boolean("fast", "Skip the slow path", true)
            .build(),
        move |args, ctx| {
            let log = tool_log.clone();
            async move {
                if !args.get_bool("fast")? {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                log.record("lookup", args.raw(), &ctx);
                Ok(json!({"found": true}))
            }
        },
    );
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .function_with_timeout(lookup, Duration::from_millis(250))
            .build()
            .unwrap(),
    );
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "find it").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "Found it on the second try.");
    assert_eq!(handle.status(), EngineStatus::Completed);

    let transcript = handle.transcript().await;
    let outcomes: Vec<CallOutcome> = transcript
        .iter()
        .flat_map(|t| t.results().map(|r| r.outcome.clone()))
        .collect();
    assert_eq!(
        outcomes[0],
        CallOutcome::Error(CallError::ToolTimeout {
            target: "lookup".into(),
            timeout_ms: 250
        })
    );
    assert_eq!(outcomes[1], CallOutcome::Value(json!({"found": true})));
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn unknown_targets_and_bad_arguments_do_not_fail_the_turn() {
    let provider = ScriptedProvider::new();
    provider.calls(
        "support",
        &[
            ("refund_order", json!({"order_id": "12345"})),
            ("get_order_status", json!({"order": 12345})),
        ],
    );
    provider.text("support", "I can only check order status.");

    let log = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .function(order_status_tool(&log))
            .build()
            .unwrap(),
    );
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "refund 12345").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "I can only check order status.");
    assert_eq!(log.count(), 0);

    let transcript = handle.transcript().await;
    let errors: Vec<CallError> = transcript
        .iter()
        .flat_map(|t| {
            t.results().filter_map(|r| match &r.outcome {
                CallOutcome::Error(e) => Some(e.clone()),
                CallOutcome::Value(_) => None,
            })
        })
        .collect();
    assert_eq!(errors.len(), 2);
    assert_eq!(
        errors[0],
        CallError::UnknownTarget {
            target: "refund_order".into()
        }
    );
    assert!(matches!(
        &errors[1],
        CallError::InvalidArguments { target, reason }
            if target == "get_order_status" && reason.contains("order_id")
    ));
}

#[tokio::test]
async fn busy_conversation_rejects_messages() {
    let provider = ScriptedProvider::new();
    provider.calls("support", &[("wait", json!({}))]);

    let started = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .function(hanging_tool("wait", &started))
            .build()
            .unwrap(),
    );
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "first").await.unwrap();
    wait_for_count(&started, 1).await;

    let err = handle.submit_user_message("second").await.unwrap_err();
    assert!(matches!(
        err,
        StrandError::EngineBusy {
            status: EngineStatus::AwaitingTools
        }
    ));

    assert_eq!(handle.close().await, EngineStatus::Cancelled);
    let err = handle.submit_user_message("third").await.unwrap_err();
    assert!(matches!(err, StrandError::EngineClosed { .. }));
    assert!(matches!(handle.await_reply().await, Err(StrandError::Cancelled)));
}

#[tokio::test]
async fn completed_conversation_accepts_follow_ups() {
    let provider = ScriptedProvider::new();
    provider.text("support", "Hello!");
    provider.text("support", "You're welcome.");

    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "hi").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "Hello!");

    handle.submit_user_message("thanks").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "You're welcome.");
    assert_eq!(handle.snapshot().generation, 2);

    let (thoughts, mark) = handle.thoughts(0).await;
    assert_eq!(thoughts, vec!["Hello!", "You're welcome."]);
    assert_eq!(mark, 4);
}

#[tokio::test]
async fn iteration_limit_fails_the_turn() {
    let provider = ScriptedProvider::new();
    provider.fallback("looper", |_| Ok(calls_response(&[("noop", json!({}))])));

    let log = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("looper")
            .function(recording_tool("noop", Duration::ZERO, json!("ok"), &log))
            .build()
            .unwrap(),
    );
    let mut config = test_config();
    config.max_iterations = 3;
    let engine = engine(&provider, Arc::new(MemoryStore::new()), config);

    let handle = engine.start(agent, "loop forever").await.unwrap();
    let err = handle.await_reply().await.unwrap_err();

    assert_eq!(err.report().kind, FailureKind::IterationLimitExceeded);
    assert_eq!(handle.status(), EngineStatus::Failed);
    assert_eq!(provider.requests().len(), 3);
    assert_eq!(log.count(), 3);
    assert!(matches!(
        handle.submit_user_message("again").await,
        Err(StrandError::EngineClosed {
            status: EngineStatus::Failed
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn transient_model_errors_are_retried() {
    let provider = ScriptedProvider::new();
    provider.fail_with("support", || StrandError::api(503, "overloaded"));
    provider.fail_with("support", || StrandError::Timeout(60_000));
    provider.text("support", "Back online.");

    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "hello?").await.unwrap();
    assert_eq!(handle.await_reply().await.unwrap(), "Back online.");
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_model_unavailable() {
    let provider = ScriptedProvider::new();
    provider.fallback("support", |_| Err(StrandError::api(502, "bad gateway")));

    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&provider, store.clone(), test_config());

    let handle = engine.start(agent, "hello?").await.unwrap();
    let report = handle.await_reply().await.unwrap_err().report();

    assert_eq!(report.kind, FailureKind::ModelUnavailable);
    assert!(report.message.contains("3 attempt"));
    assert_eq!(provider.requests().len(), 3);

    let stored = store.load(handle.id()).await.unwrap().unwrap();
    assert_eq!(stored.last_failure, Some(report));
}

#[tokio::test]
async fn configuration_errors_are_not_retried() {
    let provider = ScriptedProvider::new();
    provider.fail_with("support", || StrandError::Authentication("invalid key".into()));

    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "hello?").await.unwrap();
    let report = handle.await_reply().await.unwrap_err().report();
    assert_eq!(report.kind, FailureKind::ModelConfiguration);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn empty_model_output_is_a_protocol_violation() {
    let provider = ScriptedProvider::new();
    provider.text("support", "  ");

    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    let handle = engine.start(agent, "hello?").await.unwrap();
    let report = handle.await_reply().await.unwrap_err().report();
    assert_eq!(report.kind, FailureKind::ProtocolViolation);
}

#[tokio::test]
async fn events_follow_transitions() {
    let provider = ScriptedProvider::new();
    provider.calls("support", &[("noop", json!({}))]);
    provider.text("support", "done");

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let log = ToolLog::default();
    let agent = Arc::new(
        AgentDefinition::builder("support")
            .function(recording_tool("noop", Duration::ZERO, json!(1), &log))
            .build()
            .unwrap(),
    );
    let engine = strand::agent_loop::Engine::builder(Arc::new(SingleProvider(Arc::new(
        SharedProvider(provider.clone()),
    ))))
    .config(test_config())
    .event_sink(Arc::new(move |event: EngineEvent| sink_seen.lock().unwrap().push(event)))
    .build()
    .unwrap();

    let handle = engine.start(agent, "go").await.unwrap();
    handle.await_reply().await.unwrap();

    let events = seen.lock().unwrap().clone();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    let statuses: Vec<EngineStatus> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EngineEventKind::StatusChanged { status } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            EngineStatus::AwaitingTools,
            EngineStatus::AwaitingModel,
            EngineStatus::Completed
        ]
    );
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EngineEventKind::CallResolved { call_id: 1, is_error: false, .. }
    )));
}

#[tokio::test]
async fn duplicate_conversation_ids_are_rejected() {
    let provider = ScriptedProvider::new();
    provider.text("support", "hi");
    let agent = Arc::new(AgentDefinition::builder("support").build().unwrap());
    let engine = engine(&provider, Arc::new(MemoryStore::new()), test_config());

    engine
        .start_with_id(agent.clone(), "support-000001", None)
        .await
        .unwrap();
    let err = engine
        .start_with_id(agent, "support-000001", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StrandError::InvalidArgument(_)));
}
