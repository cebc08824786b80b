//! End-to-end scenarios for the agent executor
//!
//! Each test drives the full stack (executor, handlers, runtime, stream
//! processor, buses) with a scripted model and real workflow plugins,
//! asserting the protocol event sequences external subscribers observe.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{AgentEvent, BusMessage, EventBus, TaskState};
use relay_executor::testing::{
    drain_bus, text_steps, BlockchainTransactionPlugin, ScriptedModel, ScriptStep,
    VaultDepositPlugin,
};
use relay_executor::{
    Agent, AgentBuilder, AgentConfig, RequestContext, StreamChunk, UserMessage,
};
use relay_runtime::DispatchRequest;
use serde_json::json;
use tokio::sync::mpsc;

async fn build_agent(model: ScriptedModel) -> Agent {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    AgentBuilder::new()
        .with_config(AgentConfig::default())
        .with_model(Arc::new(model))
        .with_plugin(Arc::new(BlockchainTransactionPlugin))
        .with_plugin(Arc::new(VaultDepositPlugin))
        .build()
        .await
        .expect("agent builds")
}

fn request(content: &str, task_id: &str, context_id: &str) -> RequestContext {
    RequestContext {
        user_message: UserMessage::text(content),
        task_id: task_id.to_string(),
        context_id: context_id.to_string(),
        configuration: None,
    }
}

async fn recv_event(rx: &mut mpsc::Receiver<BusMessage>) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("bus stalled")
        .expect("bus closed without sentinel")
}

/// Poll until `predicate` holds or a deadline passes
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn text_response_chunks(events: &[AgentEvent]) -> Vec<(Option<bool>, Option<bool>)> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ArtifactUpdate {
                artifact,
                append,
                last_chunk,
                ..
            } if artifact.name.as_deref() == Some("text-response") => {
                Some((*append, *last_chunk))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_new_turn_ai_replies_only() {
    let agent = build_agent(ScriptedModel::single(text_steps(
        "Hello! How can I help you today?",
    )))
    .await;

    let bus = Arc::new(EventBus::new("request", 64));
    let rx = bus.subscribe().await;

    agent
        .executor
        .execute(request("Hello", "", "c1"), bus)
        .await
        .unwrap();

    let events = drain_bus(rx).await;

    // task{submitted} precedes every status-update
    let AgentEvent::Task { id: task_id, status, .. } = &events[0] else {
        panic!("first event must be the task event, got {:?}", events[0]);
    };
    assert_eq!(status.state, TaskState::Submitted);
    assert_eq!(events[1].state(), Some(TaskState::Working));
    assert!(!events[1].is_final());

    let chunks = text_response_chunks(&events);
    assert!(chunks.len() >= 2);
    let (intermediate, last) = chunks.split_at(chunks.len() - 1);
    for (_, last_chunk) in intermediate {
        assert_eq!(*last_chunk, Some(false));
    }
    assert_eq!(last[0].1, Some(true));

    let terminal = events.last().unwrap();
    assert_eq!(terminal.state(), Some(TaskState::Completed));
    assert!(terminal.is_final());

    // History grows by two: user then assistant
    wait_until(|| agent.contexts.history("c1").map_or(false, |h| h.len() == 2)).await;
    let history = agent.contexts.history("c1").unwrap();
    assert_eq!(history[0].content, "Hello");
    assert_eq!(history[1].content, "Hello! How can I help you today?");

    // The context tracks the spawned task
    assert!(agent
        .contexts
        .get("c1")
        .unwrap()
        .tasks
        .contains(task_id));
}

#[tokio::test]
async fn test_workflow_dispatch_via_tool_call() {
    let mut steps = vec![ScriptStep::CallTool {
        id: "call-1".to_string(),
        name: "dispatch_workflow_vault_deposit".to_string(),
        args: json!({"vaultId": "v", "amount": "1"}),
    }];
    steps.extend(text_steps("Your deposit is on its way."));
    let agent = build_agent(ScriptedModel::single(steps)).await;

    let bus = Arc::new(EventBus::new("request", 64));
    let rx = bus.subscribe().await;

    agent
        .executor
        .execute(request("Deposit 1 into vault v", "", "c1"), bus)
        .await
        .unwrap();

    let events = drain_bus(rx).await;

    // The dispatch tool call is suppressed: no tool artifacts on the parent
    assert!(!events.iter().any(|e| matches!(
        e,
        AgentEvent::ArtifactUpdate { artifact, .. }
            if matches!(artifact.name.as_deref(), Some("tool-call") | Some("tool-result"))
    )));

    // Parent bus carries the child reference with the dispatch response
    let reference = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::StatusUpdate { status, .. } => status
                .message
                .as_ref()
                .filter(|m| m.reference_task_ids.is_some()),
            _ => None,
        })
        .expect("reference status-update");
    let child_id = reference.reference_task_ids.as_ref().unwrap()[0].clone();
    assert!(reference
        .parts
        .iter()
        .any(|p| p.as_text().map_or(false, |t| t.contains("queued"))));

    // Parent completes independently of the child
    assert_eq!(events.last().unwrap().state(), Some(TaskState::Completed));

    // The child runs to completion in the same conversation
    wait_until(|| agent.store.state(&child_id) == Some(TaskState::Completed)).await;
    let child = agent.store.get(&child_id).unwrap();
    assert_eq!(child.context_id, "c1");
    assert_eq!(child.result.unwrap()["deposited"], "1");
}

#[tokio::test]
async fn test_pause_and_resume_transaction() {
    let agent = build_agent(ScriptedModel::new(vec![])).await;

    let bus = agent.buses.create("t-tx");
    let mut rx = bus.subscribe().await;
    bus.publish(AgentEvent::task("t-tx", "c1", TaskState::Submitted))
        .await;

    agent
        .runtime
        .dispatch(
            "blockchain_transaction",
            DispatchRequest {
                context_id: "c1".to_string(),
                task_id: Some("t-tx".to_string()),
                parameters: json!({"to": "0xabc"}),
                metadata: None,
            },
        )
        .await
        .unwrap();

    // Opening sequence up to the pause
    let mut seen = Vec::new();
    loop {
        let BusMessage::Event(event) = recv_event(&mut rx).await else {
            panic!("bus finished before pause");
        };
        let paused = event.state() == Some(TaskState::InputRequired);
        seen.push(event);
        if paused {
            break;
        }
    }

    assert_eq!(seen[0].state(), Some(TaskState::Submitted));
    assert_eq!(seen[1].state(), Some(TaskState::Working));
    let artifact_names: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ArtifactUpdate { artifact, .. } => artifact.name.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(
        artifact_names,
        vec!["tx-summary.json", "unsigned-tx", "tx-status.jsonl"]
    );
    let AgentEvent::StatusUpdate { status, .. } = seen.last().unwrap() else {
        unreachable!()
    };
    assert_eq!(
        status.message.as_ref().unwrap().first_text(),
        Some("Please sign the transaction")
    );

    // Resume through the protocol entry point with a data part
    agent
        .executor
        .execute(
            RequestContext {
                user_message: UserMessage::data(json!({"signature": "0xdead", "confirm": true})),
                task_id: "t-tx".to_string(),
                context_id: "c1".to_string(),
                configuration: None,
            },
            bus.clone(),
        )
        .await
        .unwrap();

    let events = drain_bus(rx).await;
    let states: Vec<_> = events.iter().filter_map(|e| e.state()).collect();
    assert_eq!(states, vec![TaskState::Working, TaskState::Completed]);

    let appended: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ArtifactUpdate {
                artifact, append, ..
            } => Some((artifact.name.clone(), *append)),
            _ => None,
        })
        .collect();
    assert_eq!(
        appended,
        vec![
            (Some("tx-status.jsonl".to_string()), Some(true)),
            (Some("tx-receipt.json".to_string()), Some(false)),
        ]
    );

    let record = agent.store.get("t-tx").unwrap();
    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.result.unwrap()["txHash"], "0xfeed");
    agent.buses.release("t-tx");
}

#[tokio::test]
async fn test_schema_rejection_keeps_task_paused() {
    let agent = build_agent(ScriptedModel::new(vec![])).await;

    let bus = agent.buses.create("t-bad");
    let mut rx = bus.subscribe().await;

    agent
        .runtime
        .dispatch(
            "blockchain_transaction",
            DispatchRequest {
                context_id: "c1".to_string(),
                task_id: Some("t-bad".to_string()),
                parameters: json!({}),
                metadata: None,
            },
        )
        .await
        .unwrap();

    wait_until(|| agent.store.state("t-bad") == Some(TaskState::InputRequired)).await;
    // Drop the pre-pause traffic
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {}

    agent
        .executor
        .execute(
            RequestContext {
                user_message: UserMessage::data(json!({"signature": "bad"})),
                task_id: "t-bad".to_string(),
                context_id: "c1".to_string(),
                configuration: None,
            },
            bus.clone(),
        )
        .await
        .unwrap();

    // The pause prompt is re-emitted with structured errors
    let BusMessage::Event(event) = recv_event(&mut rx).await else {
        panic!("expected re-emitted prompt");
    };
    assert_eq!(event.state(), Some(TaskState::InputRequired));
    assert!(!event.is_final());
    let AgentEvent::StatusUpdate { status, .. } = &event else {
        unreachable!()
    };
    let message = status.message.as_ref().unwrap();
    assert_eq!(message.first_text(), Some("Please sign the transaction"));
    let errors = &message.first_data().unwrap()["errors"];
    assert!(!errors.as_array().unwrap().is_empty());

    // No working transition was observed; the task is still paused
    assert_eq!(agent.store.state("t-bad"), Some(TaskState::InputRequired));
    let record = agent.store.get("t-bad").unwrap();
    assert!(!record
        .transitions
        .iter()
        .any(|t| t.from == TaskState::InputRequired && t.to == TaskState::Working));

    agent.executor.cancel_task("t-bad").await;
    agent.buses.release("t-bad");
}

#[tokio::test]
async fn test_message_to_terminal_task_is_rejected() {
    let agent = build_agent(ScriptedModel::new(vec![
        text_steps("First answer."),
    ]))
    .await;

    let bus = Arc::new(EventBus::new("request", 64));
    let rx = bus.subscribe().await;
    agent
        .executor
        .execute(request("Hi", "", "c1"), bus)
        .await
        .unwrap();

    let events = drain_bus(rx).await;
    let AgentEvent::Task { id: task_id, .. } = &events[0] else {
        panic!("missing task event");
    };
    wait_until(|| agent.store.state(task_id) == Some(TaskState::Completed)).await;

    // Second message targeting the completed task
    let retry_bus = Arc::new(EventBus::new("retry", 64));
    let mut retry_rx = retry_bus.subscribe().await;
    let err = agent
        .executor
        .execute(request("Again?", task_id, "c1"), retry_bus)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid request"));

    // Only the sentinel, no events
    assert!(recv_event(&mut retry_rx).await.is_finished());
    assert!(retry_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_while_streaming() {
    let mut steps = Vec::new();
    for n in 0..20 {
        steps.push(ScriptStep::Delay(Duration::from_millis(15)));
        steps.push(ScriptStep::Chunk(StreamChunk::TextDelta {
            delta: format!("chunk-{n} "),
        }));
    }
    steps.push(ScriptStep::Chunk(StreamChunk::TextEnd));
    let agent = build_agent(ScriptedModel::single(steps)).await;

    let bus = Arc::new(EventBus::new("request", 64));
    let mut rx = bus.subscribe().await;
    agent
        .executor
        .execute(request("stream a lot", "", "c1"), bus)
        .await
        .unwrap();

    // task, working, then wait for the third published chunk
    let BusMessage::Event(first) = recv_event(&mut rx).await else {
        panic!("bus finished early")
    };
    let task_id = first.task_id().unwrap().to_string();
    assert_eq!(recv_event(&mut rx).await.event().unwrap().state(), Some(TaskState::Working));
    for _ in 0..3 {
        let msg = recv_event(&mut rx).await;
        assert!(matches!(
            msg.event(),
            Some(AgentEvent::ArtifactUpdate { .. })
        ));
    }

    assert!(agent.executor.cancel_task(&task_id).await);

    // At most one further chunk before the terminal status
    let mut extra_chunks = 0;
    loop {
        let msg = recv_event(&mut rx).await;
        match msg {
            BusMessage::Event(AgentEvent::ArtifactUpdate { .. }) => extra_chunks += 1,
            BusMessage::Event(event) => {
                assert_eq!(event.state(), Some(TaskState::Canceled));
                assert!(event.is_final());
                break;
            }
            BusMessage::Finished => panic!("sentinel before terminal status"),
        }
    }
    assert!(extra_chunks <= 1, "saw {extra_chunks} chunks after cancel");
    assert!(recv_event(&mut rx).await.is_finished());

    // No assistant entry lands in history
    assert_eq!(agent.store.state(&task_id), Some(TaskState::Canceled));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let history = agent.contexts.history("c1").unwrap();
    assert_eq!(history.len(), 1);

    // Cancel is idempotent and a no-op once terminal
    assert!(!agent.executor.cancel_task(&task_id).await);
}

#[tokio::test]
async fn test_registry_exposes_workflow_tools() {
    let agent = build_agent(ScriptedModel::new(vec![])).await;
    let names = agent.registry.names();
    assert!(names.contains(&"dispatch_workflow_blockchain_transaction".to_string()));
    assert!(names.contains(&"dispatch_workflow_vault_deposit".to_string()));
}

#[tokio::test]
async fn test_stream_error_surfaces_as_failed_task() {
    let agent = build_agent(ScriptedModel::single(vec![
        ScriptStep::Chunk(StreamChunk::TextDelta {
            delta: "partial".to_string(),
        }),
        ScriptStep::Error("provider unavailable".to_string()),
    ]))
    .await;

    let bus = Arc::new(EventBus::new("request", 64));
    let rx = bus.subscribe().await;
    agent
        .executor
        .execute(request("Hi", "", "c1"), bus)
        .await
        .unwrap();

    let events = drain_bus(rx).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.state(), Some(TaskState::Failed));
    assert!(terminal.is_final());
    let AgentEvent::StatusUpdate { status, .. } = terminal else {
        unreachable!()
    };
    assert_eq!(
        status.message.as_ref().unwrap().first_text(),
        Some("provider unavailable")
    );

    // Failed turns leave no assistant entry
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.contexts.history("c1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_multi_turn_history_feeds_the_model() {
    let agent = build_agent(ScriptedModel::new(vec![
        text_steps("The answer is 4."),
        text_steps("As I said, 4."),
    ]))
    .await;

    for content in ["What is 2+2?", "Repeat that"] {
        let bus = Arc::new(EventBus::new("request", 64));
        let rx = bus.subscribe().await;
        agent
            .executor
            .execute(request(content, "", "c1"), bus)
            .await
            .unwrap();
        drain_bus(rx).await;
        wait_until(|| {
            agent
                .contexts
                .history("c1")
                .map_or(false, |h| h.len() % 2 == 0)
        })
        .await;
    }

    let history = agent.contexts.history("c1").unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].content, "As I said, 4.");
}

#[tokio::test]
async fn test_data_only_message_on_working_task_falls_through() {
    // The working task is an AI turn, so the resume attempt fails and the
    // payload starts a fresh turn instead.
    let slow_turn = vec![
        ScriptStep::Delay(Duration::from_millis(300)),
        ScriptStep::Chunk(StreamChunk::TextDelta {
            delta: "slow reply".to_string(),
        }),
        ScriptStep::Chunk(StreamChunk::TextEnd),
    ];
    let agent = build_agent(ScriptedModel::new(vec![
        slow_turn,
        text_steps("fresh turn reply"),
    ]))
    .await;

    let bus = Arc::new(EventBus::new("request", 64));
    let mut rx = bus.subscribe().await;
    agent
        .executor
        .execute(request("slow question", "", "c1"), bus)
        .await
        .unwrap();
    let BusMessage::Event(first) = recv_event(&mut rx).await else {
        panic!("bus finished early")
    };
    let busy_task = first.task_id().unwrap().to_string();
    // Let the first turn claim its scripted stream before the second starts
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second_bus = Arc::new(EventBus::new("request-2", 64));
    let second_rx = second_bus.subscribe().await;
    agent
        .executor
        .execute(
            RequestContext {
                user_message: UserMessage::data(json!({"follow": "up"})),
                task_id: busy_task.clone(),
                context_id: "c1".to_string(),
                configuration: None,
            },
            second_bus,
        )
        .await
        .unwrap();

    // A fresh task was started for the payload
    let events = drain_bus(second_rx).await;
    let AgentEvent::Task { id, .. } = &events[0] else {
        panic!("expected a fresh task event");
    };
    assert_ne!(id, &busy_task);
    assert_eq!(events.last().unwrap().state(), Some(TaskState::Completed));
}
