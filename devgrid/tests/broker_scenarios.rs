//! End-to-end broker scenarios over mock ports: a mock camera behind
//! the device connector, a scripted LLM, and the in-memory repository.

use devgrid::config::BrokerConfig;
use devgrid::ports::{MockDeviceConnector, ScriptedLlm, ToolDescriptor, ToolFile, ToolOutput};
use devgrid::registry::DeviceSpec;
use devgrid::{Broker, BrokerError, Principal};
use devgrid_a2a::{
    A2aRequest, Artifact, Message, MessageRole, MessageSendConfiguration, MessageSendParams,
    Part, StreamEvent, TaskIdParams, TaskState,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn camera_connector() -> Arc<MockDeviceConnector> {
    let connector = Arc::new(MockDeviceConnector::new());
    connector.add_source(
        "mock://cam-1",
        vec![ToolDescriptor::new(
            "capture_image",
            "Capture a still image from the camera",
        )],
    );
    connector.set_output(
        "capture_image",
        ToolOutput {
            data: serde_json::json!({ "resolution": "1920x1080" }),
            files: vec![ToolFile {
                name: Some("capture.jpg".to_string()),
                mime_type: "image/jpeg".to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            }],
        },
    );
    connector
}

fn camera_spec() -> DeviceSpec {
    DeviceSpec {
        device_id: "cam-1".to_string(),
        name: "Front Door Camera".to_string(),
        kind: "camera".to_string(),
        capability_source: "mock://cam-1".to_string(),
        intent_keywords: vec!["photo".to_string(), "picture".to_string()],
        system_prompt: None,
        output_modes: vec!["image/jpeg".to_string()],
    }
}

fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    // Long scan/sweep intervals so background loops stay quiet.
    config.scan.interval_secs = 3600;
    config.liveness.sweep_interval_secs = 3600;
    config.streams.sweep_interval_secs = 3600;
    config.streams.blob_root = std::env::temp_dir()
        .join("devgrid-scenario-tests")
        .join(Uuid::new_v4().to_string());
    config
}

async fn broker_without_llm(connector: Arc<MockDeviceConnector>) -> Broker {
    Broker::builder(connector)
        .with_config(test_config())
        .build()
        .await
        .expect("broker builds")
}

async fn broker_with_llm(
    connector: Arc<MockDeviceConnector>,
    llm: Arc<ScriptedLlm>,
) -> Broker {
    Broker::builder(connector)
        .with_config(test_config())
        .with_llm(llm)
        .build()
        .await
        .expect("broker builds")
}

fn user_message(text: &str) -> Message {
    Message {
        kind: "message".to_string(),
        message_id: Uuid::new_v4().to_string(),
        role: MessageRole::User,
        parts: vec![Part::text(text)],
        context_id: None,
        task_id: None,
        reference_task_ids: Vec::new(),
        metadata: None,
    }
}

fn send_params(text: &str) -> MessageSendParams {
    MessageSendParams {
        message: user_message(text),
        configuration: None,
        metadata: None,
    }
}

/// S1: registering a device surfaces a tagged skill on the card within
/// the freshness bound.
#[tokio::test]
async fn device_registration_updates_card() {
    let broker = broker_without_llm(camera_connector()).await;
    broker.register_device(camera_spec()).await.unwrap();

    // Rebuilds are asynchronous but must land well within a second.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let card = broker.card().current();
    let skill = card
        .skills
        .iter()
        .find(|s| s.tags.contains(&"photo".to_string()))
        .expect("skill tagged photo");
    assert!(skill.description.contains("cam-1"));

    // Deregistration removes the skill again.
    broker.deregister_device("cam-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let card = broker.card().current();
    assert!(!card
        .skills
        .iter()
        .any(|s| s.tags.contains(&"photo".to_string())));

    broker.shutdown().await;
}

/// S2: a plain message with no device match completes locally with an
/// agent reply and a two-entry history.
#[tokio::test]
async fn simple_send_completes_locally() {
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"action": "local", "reply": "pong", "confidence": 1.0}"#,
    ));
    let broker = broker_with_llm(camera_connector(), llm).await;
    let handler = broker.handler();

    let started = std::time::Instant::now();
    let task = handler
        .send_message(send_params("ping"), &Principal::external("test", "u1"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(task.history.len(), 2);
    assert_eq!(task.history[0].role, MessageRole::User);
    assert_eq!(task.history[1].role, MessageRole::Agent);
    assert!(!task.history[1].text().is_empty());

    broker.shutdown().await;
}

/// S3: a photo request routes to the camera, invokes the tool exactly
/// once, and produces a file artifact; subscribers observe
/// Working -> artifact -> Completed in order.
#[tokio::test]
async fn device_route_invokes_tool_once() {
    let connector = camera_connector();
    let broker = broker_without_llm(connector.clone()).await;
    broker.register_device(camera_spec()).await.unwrap();
    let handler = broker.handler();

    let mut rx = handler
        .stream_message(
            send_params("take a photo"),
            &Principal::external("test", "u1"),
        )
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_final = event.is_final();
        events.push(event);
        if is_final {
            break;
        }
    }

    // Snapshot (Submitted), Working, artifact, final Completed.
    assert!(matches!(events.first(), Some(StreamEvent::Task(_))));
    let states: Vec<TaskState> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::StatusUpdate(update) => Some(update.status.state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![TaskState::Working, TaskState::Completed]);

    let invocations = connector.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].tool_id, "capture_image");

    let artifact_events: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ArtifactUpdate(update) => Some(update),
            _ => None,
        })
        .collect();
    assert_eq!(artifact_events.len(), 1);
    assert!(artifact_events[0]
        .artifact
        .parts
        .iter()
        .any(|p| matches!(p, Part::File { .. })));

    broker.shutdown().await;
}

/// S4 + S6: two subscribers observe the same ordered chunk stream; a
/// dropped subscriber that resubscribes catches the snapshot plus the
/// remaining chunks and the single final event.
#[tokio::test]
async fn stream_fanout_order_and_resubscribe() {
    let broker = broker_without_llm(camera_connector()).await;
    let tasks = broker.tasks();
    let handler = broker.handler();

    let task = tasks
        .create_task(user_message("assemble a report"), None, None)
        .await
        .unwrap();
    let mut rx1 = tasks.subscribe(&task.id, false).await.unwrap();
    let rx2 = tasks.subscribe(&task.id, false).await.unwrap();

    tasks
        .transition(&task.id, TaskState::Working, None)
        .await
        .unwrap();

    let chunk = |i: usize| Artifact {
        artifact_id: "report".to_string(),
        parts: vec![Part::text(format!("chunk-{i}"))],
        name: None,
        description: None,
        metadata: None,
    };

    for i in 0..3 {
        tasks
            .append_artifact_chunk(&task.id, chunk(i), i > 0, false)
            .await
            .unwrap();
    }

    // Subscriber two drops mid-stream and resubscribes.
    drop(rx2);
    let outcome = handler
        .handle(
            A2aRequest::Resubscribe {
                params: TaskIdParams {
                    id: task.id.clone(),
                    metadata: None,
                },
            },
            &Principal::external("test", "u1"),
        )
        .await
        .unwrap();
    let mut rx3 = match outcome {
        devgrid::HandlerOutcome::Stream(rx) => rx,
        devgrid::HandlerOutcome::Value(_) => panic!("expected stream"),
    };

    for i in 3..5 {
        tasks
            .append_artifact_chunk(&task.id, chunk(i), true, false)
            .await
            .unwrap();
    }
    tasks
        .append_artifact_chunk(&task.id, chunk(5), true, true)
        .await
        .unwrap();
    tasks
        .complete_with_reply(
            &task.id,
            Message {
                kind: "message".to_string(),
                message_id: Uuid::new_v4().to_string(),
                role: MessageRole::Agent,
                parts: vec![Part::text("report complete")],
                context_id: None,
                task_id: None,
                reference_task_ids: Vec::new(),
                metadata: None,
            },
        )
        .await
        .unwrap();

    let drain = |rx: &mut tokio::sync::mpsc::Receiver<StreamEvent>| {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    };

    let events1 = drain(&mut rx1);
    // Working + 6 chunks + final for the continuous subscriber.
    assert_eq!(events1.len(), 8);
    assert_eq!(events1.iter().filter(|e| e.is_final()).count(), 1);
    assert!(events1.last().unwrap().is_final());

    let chunk_texts = |events: &[StreamEvent]| -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ArtifactUpdate(update) => Some(
                    update
                        .artifact
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            Part::Text { text, .. } => Some(text.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join(""),
                ),
                _ => None,
            })
            .collect()
    };
    assert_eq!(
        chunk_texts(&events1),
        (0..6).map(|i| format!("chunk-{i}")).collect::<Vec<_>>()
    );

    // The resumed stream: snapshot first (carrying chunks 0-2), then
    // chunks 3-5 live, then exactly one final event.
    let events3 = drain(&mut rx3);
    assert!(matches!(events3.first(), Some(StreamEvent::Task(_))));
    assert_eq!(chunk_texts(&events3), vec!["chunk-3", "chunk-4", "chunk-5"]);
    assert_eq!(events3.iter().filter(|e| e.is_final()).count(), 1);
    assert!(events3.last().unwrap().is_final());

    // Chunk concatenation equals the assembled artifact.
    let task = tasks.get(&task.id, None).await.unwrap();
    assert_eq!(task.artifacts.len(), 1);
    assert_eq!(task.artifacts[0].parts.len(), 6);

    broker.shutdown().await;
}

/// S5: cancelling a task mid-invocation drives it terminal promptly and
/// frees the worker slot.
#[tokio::test]
async fn cancel_midflight_releases_worker() {
    let connector = camera_connector();
    connector.set_delay("capture_image", Duration::from_secs(10));
    let mut config = test_config();
    config.workers.count = 1;

    let broker = Broker::builder(connector.clone())
        .with_config(config)
        .build()
        .await
        .unwrap();
    broker.register_device(camera_spec()).await.unwrap();
    let handler = broker.handler();

    let params = MessageSendParams {
        message: user_message("take a photo"),
        configuration: Some(MessageSendConfiguration {
            blocking: Some(false),
            ..Default::default()
        }),
        metadata: None,
    };
    let task = handler
        .send_message(params, &Principal::external("test", "u1"))
        .await
        .unwrap();

    // Let the job reach the tool invocation.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.invocations().len(), 1);

    let started = std::time::Instant::now();
    let canceled = broker.tasks().cancel(&task.id).await.unwrap();
    assert_eq!(canceled.status.state, TaskState::Canceled);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The single worker slot is free again: a local request completes.
    let task = handler
        .send_message(send_params("ping"), &Principal::external("test", "u1"))
        .await
        .unwrap();
    assert_eq!(task.status.state, TaskState::Completed);

    broker.shutdown().await;
}

/// Scan-loop idempotence: re-dispatching the same stream entry (as a
/// crash between dispatch and watermark persist would) raises exactly
/// one task.
#[tokio::test]
async fn scan_loop_dedups_on_origin() {
    use devgrid::ports::{InMemoryRepository, Repository};

    let connector = camera_connector();
    let repository = Arc::new(InMemoryRepository::new());
    let broker = Broker::builder(connector.clone())
        .with_config(test_config())
        .with_repository(repository.clone())
        .build()
        .await
        .unwrap();
    broker.register_device(camera_spec()).await.unwrap();

    broker
        .ingest_stream(
            "cam-1",
            serde_json::json!({"source": "motion-detector"}),
            b"please take a photo of the visitor".to_vec(),
            Some("text/plain".to_string()),
        )
        .await
        .unwrap();

    let raised = broker.scan_once().await.unwrap();
    assert_eq!(raised, 1);

    // Nothing new: the watermark advanced past the entry.
    assert_eq!(broker.scan_once().await.unwrap(), 0);

    // Rewind the watermark to simulate a crash between dispatch and
    // persist: the re-dispatch must dedup on (device, seq).
    repository.set_stream_watermark("cam-1", 0).await.unwrap();
    broker.scan_once().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let tasks = broker.tasks().list(None, None).await;
    assert_eq!(tasks.len(), 1);

    broker.shutdown().await;
}

/// A low-confidence non-local decision downgrades to a clarification
/// request and parks the task on input-required.
#[tokio::test]
async fn low_confidence_parks_on_input_required() {
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"action": "device", "target": "cam-1", "confidence": 0.1}"#,
    ));
    let broker = broker_with_llm(camera_connector(), llm).await;
    broker.register_device(camera_spec()).await.unwrap();
    let handler = broker.handler();

    let task = handler
        .send_message(
            send_params("do something with the thing"),
            &Principal::external("test", "u1"),
        )
        .await
        .unwrap();
    assert_eq!(task.status.state, TaskState::InputRequired);
    let note = task.status.message.expect("clarification note");
    assert!(!note.text().is_empty());

    broker.shutdown().await;
}

/// Error taxonomy at the handler surface: unknown tasks and cancels on
/// terminal tasks.
#[tokio::test]
async fn handler_error_paths() {
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"action": "local", "reply": "ok", "confidence": 1.0}"#,
    ));
    let broker = broker_with_llm(camera_connector(), llm).await;
    let handler = broker.handler();
    let principal = Principal::external("test", "u1");

    let err = handler
        .handle(
            A2aRequest::GetTask {
                params: devgrid_a2a::TaskQueryParams {
                    id: "missing".to_string(),
                    history_length: None,
                },
            },
            &principal,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::TaskNotFound { .. }));

    let task = handler
        .send_message(send_params("hello"), &principal)
        .await
        .unwrap();
    assert_eq!(task.status.state, TaskState::Completed);

    let err = handler
        .handle(
            A2aRequest::CancelTask {
                params: TaskIdParams {
                    id: task.id.clone(),
                    metadata: None,
                },
            },
            &principal,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::TaskClosed { .. }));

    broker.shutdown().await;
}

/// Push config round-trip through the handler surface.
#[tokio::test]
async fn push_config_round_trip() {
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"action": "local", "reply": "ok", "confidence": 1.0}"#,
    ));
    let broker = broker_with_llm(camera_connector(), llm).await;
    let handler = broker.handler();
    let principal = Principal::external("test", "u1");

    let task = handler
        .send_message(send_params("hello"), &principal)
        .await
        .unwrap();

    let stored = broker
        .tasks()
        .set_push_config(
            &task.id,
            devgrid_a2a::PushNotificationConfig {
                url: "https://client.example/hook".to_string(),
                id: None,
                token: Some("tok".to_string()),
                authentication: None,
            },
        )
        .await
        .unwrap();
    let config_id = stored.push_notification_config.id.clone().unwrap();

    let listed = broker.tasks().list_push_configs(&task.id).await.unwrap();
    assert_eq!(listed.len(), 1);

    broker
        .tasks()
        .delete_push_config(&task.id, &config_id)
        .await
        .unwrap();
    assert!(broker
        .tasks()
        .list_push_configs(&task.id)
        .await
        .unwrap()
        .is_empty());

    broker.shutdown().await;
}

/// Multi-turn: a task parked on input-required resumes to working and
/// completes on the follow-up message.
#[tokio::test]
async fn input_required_task_resumes() {
    let llm = Arc::new(ScriptedLlm::new(""));
    llm.push_reply(r#"{"action": "device", "target": "cam-1", "confidence": 0.1}"#);
    llm.push_reply(
        r#"{"action": "device", "target": "cam-1", "tool": "capture_image",
            "arguments": {}, "confidence": 0.95}"#,
    );
    let connector = camera_connector();
    let broker = broker_with_llm(connector.clone(), llm).await;
    broker.register_device(camera_spec()).await.unwrap();
    let handler = broker.handler();
    let principal = Principal::external("test", "u1");

    let task = handler
        .send_message(send_params("photo maybe?"), &principal)
        .await
        .unwrap();
    assert_eq!(task.status.state, TaskState::InputRequired);

    // Follow-up on the same task.
    let mut follow_up = user_message("yes, take a photo with cam-1");
    follow_up.task_id = Some(task.id.clone());
    let task = handler
        .send_message(
            MessageSendParams {
                message: follow_up,
                configuration: None,
                metadata: None,
            },
            &principal,
        )
        .await
        .unwrap();

    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(connector.invocations().len(), 1);

    broker.shutdown().await;
}
