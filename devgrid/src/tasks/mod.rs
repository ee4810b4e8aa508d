//! Task lifecycle management.
//!
//! Owns every task, its history, artifacts, live subscribers, and push
//! configurations. A per-task mutex serializes all mutation and event
//! fan-out, which is what gives every subscriber and push target the
//! same total order of events. Terminal states are absorbing.

mod push;

pub use push::PushNotifier;

use crate::errors::{BrokerError, BrokerResult};
use crate::ports::{Repository, StreamOrigin, TaskRecord};
use crate::workers::{CancelHandle, CancelToken};
use chrono::Utc;
use dashmap::DashMap;
use devgrid_a2a::{
    Artifact, FailureKind, Message, MessageRole, PushNotificationConfig, StreamEvent, Task,
    TaskArtifactUpdateEvent, TaskPushNotificationConfig, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Capacity of each subscriber's event buffer.
const SUBSCRIBER_BUFFER: usize = 256;

/// Whether the edge `from -> to` exists in the lifecycle graph.
///
/// Cancel and fail are legal from any non-terminal state; reject only
/// from `Submitted`; resume returns input/auth waits to `Working`.
pub fn transition_allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        (_, Canceled) | (_, Failed) => true,
        (Submitted, Working) | (Submitted, Rejected) => true,
        (Working, InputRequired) | (Working, AuthRequired) | (Working, Completed) => true,
        (InputRequired, Working) => true,
        (AuthRequired, Working) | (AuthRequired, Completed) => true,
        _ => false,
    }
}

struct PushQueue {
    config: PushNotificationConfig,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

struct TaskEntry {
    task: Task,
    origin: Option<StreamOrigin>,
    device_binding: Option<String>,
    subscribers: Arc<Vec<mpsc::Sender<StreamEvent>>>,
    push_queues: HashMap<String, PushQueue>,
    cancel: CancelHandle,
}

impl TaskEntry {
    fn record(&self) -> TaskRecord {
        TaskRecord {
            task: self.task.clone(),
            origin: self.origin.clone(),
            device_binding: self.device_binding.clone(),
        }
    }

    /// Fan an event out to live subscribers and push queues.
    ///
    /// Runs under the entry lock, so every sink observes the same
    /// order. Closed subscriber channels are dropped; the list is
    /// copy-on-write so fan-out never blocks a concurrent subscribe.
    fn emit(&mut self, event: StreamEvent) {
        let live: Vec<mpsc::Sender<StreamEvent>> = self
            .subscribers
            .iter()
            .filter(|tx| tx.try_send(event.clone()).is_ok())
            .cloned()
            .collect();
        self.subscribers = Arc::new(live);

        self.push_queues
            .retain(|_, queue| queue.tx.send(event.clone()).is_ok());
    }
}

pub struct TaskManager {
    tasks: DashMap<String, Arc<Mutex<TaskEntry>>>,
    repository: Arc<dyn Repository>,
    notifier: Arc<PushNotifier>,
    /// When true, each state change with a note appends that note to
    /// history.
    record_transitions: bool,
}

impl TaskManager {
    pub fn new(
        repository: Arc<dyn Repository>,
        notifier: Arc<PushNotifier>,
        record_transitions: bool,
    ) -> Self {
        Self {
            tasks: DashMap::new(),
            repository,
            notifier,
            record_transitions,
        }
    }

    /// Restore persisted tasks and respawn their push delivery queues.
    pub async fn load(&self) -> BrokerResult<usize> {
        let records = self.repository.load_tasks().await?;
        let count = records.len();
        for record in records {
            let task_id = record.task.id.clone();
            let mut entry = TaskEntry {
                task: record.task,
                origin: record.origin,
                device_binding: record.device_binding,
                subscribers: Arc::new(Vec::new()),
                push_queues: HashMap::new(),
                cancel: CancelHandle::new(),
            };
            for config in self.repository.load_push_configs(&task_id).await? {
                let id = config.id.clone().unwrap_or_default();
                entry
                    .push_queues
                    .insert(id, self.spawn_push_queue(config));
            }
            self.tasks.insert(task_id, Arc::new(Mutex::new(entry)));
        }
        tracing::info!(count, "restored tasks from repository");
        Ok(count)
    }

    fn entry(&self, task_id: &str) -> BrokerResult<Arc<Mutex<TaskEntry>>> {
        self.tasks
            .get(task_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BrokerError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Create a task in `Submitted` with the triggering message as the
    /// first history entry.
    ///
    /// Creation is idempotent on the stream origin: a second call with
    /// the same `(device_id, seq)` returns the task already raised for
    /// it.
    pub async fn create_task(
        &self,
        mut message: Message,
        context_id: Option<String>,
        origin: Option<StreamOrigin>,
    ) -> BrokerResult<Task> {
        if let Some(origin) = &origin {
            if let Some(existing) = self.repository.find_task_by_origin(origin).await? {
                tracing::debug!(
                    task_id = %existing,
                    device_id = %origin.device_id,
                    seq = origin.seq,
                    "stream origin already has a task"
                );
                return self.get(&existing, None).await;
            }
        }

        let task_id = Uuid::new_v4().to_string();
        let context_id = context_id
            .or_else(|| message.context_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        message.task_id = Some(task_id.clone());
        message.context_id = Some(context_id.clone());

        let task = Task {
            kind: devgrid_a2a::TASK_KIND.to_string(),
            id: task_id.clone(),
            context_id,
            status: TaskStatus {
                state: TaskState::Submitted,
                timestamp: Some(Utc::now().to_rfc3339()),
                message: None,
            },
            history: vec![message],
            artifacts: Vec::new(),
            metadata: None,
        };

        let entry = TaskEntry {
            task: task.clone(),
            origin,
            device_binding: None,
            subscribers: Arc::new(Vec::new()),
            push_queues: HashMap::new(),
            cancel: CancelHandle::new(),
        };
        self.repository.save_task(&entry.record()).await?;
        self.tasks.insert(task_id, Arc::new(Mutex::new(entry)));
        Ok(task)
    }

    /// The task already raised for a stream origin, if any.
    pub async fn find_by_origin(&self, origin: &StreamOrigin) -> BrokerResult<Option<String>> {
        self.repository.find_task_by_origin(origin).await
    }

    /// A task snapshot, optionally with history truncated to the most
    /// recent `history_length` messages.
    pub async fn get(&self, task_id: &str, history_length: Option<i32>) -> BrokerResult<Task> {
        let entry = self.entry(task_id)?;
        let entry = entry.lock().await;
        let mut task = entry.task.clone();
        if let Some(limit) = history_length {
            let limit = limit.max(0) as usize;
            if task.history.len() > limit {
                task.history = task.history.split_off(task.history.len() - limit);
            }
        }
        Ok(task)
    }

    pub async fn list(
        &self,
        context_id: Option<&str>,
        state: Option<TaskState>,
    ) -> Vec<Task> {
        let mut tasks = Vec::new();
        let entries: Vec<_> = self.tasks.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let entry = entry.lock().await;
            if context_id.map_or(true, |c| entry.task.context_id == c)
                && state.map_or(true, |s| entry.task.status.state == s)
            {
                tasks.push(entry.task.clone());
            }
        }
        tasks
    }

    /// Append a user message to a live task.
    pub async fn append_user_message(
        &self,
        task_id: &str,
        mut message: Message,
    ) -> BrokerResult<Task> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.task.status.state.is_terminal() {
            return Err(BrokerError::TaskClosed {
                task_id: task_id.to_string(),
            });
        }
        message.task_id = Some(task_id.to_string());
        message.context_id = Some(entry.task.context_id.clone());
        entry.task.history.push(message);
        self.repository.save_task(&entry.record()).await?;
        Ok(entry.task.clone())
    }

    /// The cancellation token jobs working this task must watch.
    pub async fn cancel_token(&self, task_id: &str) -> BrokerResult<CancelToken> {
        let entry = self.entry(task_id)?;
        let entry = entry.lock().await;
        Ok(entry.cancel.token())
    }

    /// Record which device is executing the task, for `DeviceGone`
    /// handling.
    pub async fn bind_device(&self, task_id: &str, device_id: &str) -> BrokerResult<()> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        entry.device_binding = Some(device_id.to_string());
        self.repository.save_task(&entry.record()).await
    }

    /// Attach a live event sink.
    ///
    /// With `replay_snapshot`, the current task state arrives as the
    /// first event, so a resubscribing client can catch up before the
    /// live tail.
    pub async fn subscribe(
        &self,
        task_id: &str,
        replay_snapshot: bool,
    ) -> BrokerResult<mpsc::Receiver<StreamEvent>> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if replay_snapshot {
            let _ = tx.try_send(StreamEvent::Task(entry.task.clone()));
        }
        let mut subscribers: Vec<_> = entry.subscribers.iter().cloned().collect();
        subscribers.push(tx);
        entry.subscribers = Arc::new(subscribers);
        Ok(rx)
    }

    /// Move a task along a lifecycle edge, emitting the status event.
    ///
    /// Re-asserting the current state with the same note is a no-op
    /// (`Ok(None)`). Illegal edges fail; anything out of a terminal
    /// state fails with `TaskClosed`.
    pub async fn transition(
        &self,
        task_id: &str,
        to: TaskState,
        note: Option<Message>,
    ) -> BrokerResult<Option<TaskStatusUpdateEvent>> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        self.apply_transition(task_id, &mut entry, to, note, self.record_transitions)
            .await
    }

    async fn apply_transition(
        &self,
        task_id: &str,
        entry: &mut TaskEntry,
        to: TaskState,
        note: Option<Message>,
        note_into_history: bool,
    ) -> BrokerResult<Option<TaskStatusUpdateEvent>> {
        let from = entry.task.status.state;
        if from == to && entry.task.status.message == note {
            return Ok(None);
        }
        if from.is_terminal() {
            return Err(BrokerError::TaskClosed {
                task_id: task_id.to_string(),
            });
        }
        if !transition_allowed(from, to) {
            return Err(BrokerError::InvalidTaskStateTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }

        if note_into_history {
            if let Some(note) = &note {
                entry.task.history.push(note.clone());
            }
        }
        entry.task.status = TaskStatus {
            state: to,
            timestamp: Some(Utc::now().to_rfc3339()),
            message: note,
        };

        let event = TaskStatusUpdateEvent {
            kind: devgrid_a2a::STATUS_UPDATE_KIND.to_string(),
            task_id: task_id.to_string(),
            context_id: entry.task.context_id.clone(),
            status: entry.task.status.clone(),
            is_final: stream_final(to),
            metadata: None,
        };

        self.repository.save_task(&entry.record()).await?;
        entry.emit(StreamEvent::StatusUpdate(event.clone()));
        tracing::debug!(task_id, ?from, ?to, "task transition");
        Ok(Some(event))
    }

    /// Append the agent's reply and complete the task in one section,
    /// so subscribers see the reply on the terminal status event.
    pub async fn complete_with_reply(
        &self,
        task_id: &str,
        reply: Message,
    ) -> BrokerResult<Option<TaskStatusUpdateEvent>> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.task.status.state.is_terminal() {
            // The work raced a cancel; the terminal state stands.
            return Ok(None);
        }
        let mut reply = reply;
        reply.task_id = Some(task_id.to_string());
        reply.context_id = Some(entry.task.context_id.clone());
        entry.task.history.push(reply.clone());
        self.apply_transition(task_id, &mut entry, TaskState::Completed, Some(reply), false)
            .await
    }

    /// Drive a task to `Failed`, naming the runtime condition.
    ///
    /// A no-op if the task already reached a terminal state.
    pub async fn fail(
        &self,
        task_id: &str,
        kind: Option<FailureKind>,
        detail: impl Into<String>,
    ) -> BrokerResult<Option<TaskStatusUpdateEvent>> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.task.status.state.is_terminal() {
            return Ok(None);
        }
        let detail = detail.into();
        let text = match kind {
            Some(kind) => format!("{}: {detail}", kind.as_str()),
            None => detail,
        };
        let note = agent_note(task_id, &entry.task.context_id, text);
        self.apply_transition(task_id, &mut entry, TaskState::Failed, Some(note), false)
            .await
    }

    /// Cancel a live task: signal its job token and emit the terminal
    /// event.
    pub async fn cancel(&self, task_id: &str) -> BrokerResult<Task> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.task.status.state.is_terminal() {
            return Err(BrokerError::TaskClosed {
                task_id: task_id.to_string(),
            });
        }
        entry.cancel.cancel();
        let note = agent_note(task_id, &entry.task.context_id, "canceled by request");
        self.apply_transition(task_id, &mut entry, TaskState::Canceled, Some(note), false)
            .await?;
        Ok(entry.task.clone())
    }

    /// Apply an artifact chunk with append/lastChunk semantics and fan
    /// the event out.
    pub async fn append_artifact_chunk(
        &self,
        task_id: &str,
        artifact: Artifact,
        append: bool,
        last_chunk: bool,
    ) -> BrokerResult<TaskArtifactUpdateEvent> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.task.status.state.is_terminal() {
            return Err(BrokerError::TaskClosed {
                task_id: task_id.to_string(),
            });
        }

        let existing = entry
            .task
            .artifacts
            .iter_mut()
            .find(|a| a.artifact_id == artifact.artifact_id);
        match existing {
            Some(current) if append => current.parts.extend(artifact.parts.clone()),
            Some(current) => *current = artifact.clone(),
            None => entry.task.artifacts.push(artifact.clone()),
        }

        let event = TaskArtifactUpdateEvent {
            kind: devgrid_a2a::ARTIFACT_UPDATE_KIND.to_string(),
            task_id: task_id.to_string(),
            context_id: entry.task.context_id.clone(),
            artifact,
            append: append.then_some(true),
            last_chunk: last_chunk.then_some(true),
            metadata: None,
        };

        self.repository.save_task(&entry.record()).await?;
        entry.emit(StreamEvent::ArtifactUpdate(event.clone()));
        Ok(event)
    }

    /// Fail every non-terminal task bound to a removed device.
    pub async fn fail_tasks_for_device(&self, device_id: &str) -> BrokerResult<usize> {
        let task_ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for task_id in task_ids {
            let Ok(entry) = self.entry(&task_id) else {
                continue;
            };
            let bound = {
                let entry = entry.lock().await;
                entry.device_binding.as_deref() == Some(device_id)
                    && !entry.task.status.state.is_terminal()
            };
            if bound {
                self.fail(
                    &task_id,
                    Some(FailureKind::DeviceGone),
                    format!("device {device_id} was removed"),
                )
                .await?;
                failed += 1;
            }
        }
        Ok(failed)
    }

    // === Push configurations ===

    pub async fn set_push_config(
        &self,
        task_id: &str,
        mut config: PushNotificationConfig,
    ) -> BrokerResult<TaskPushNotificationConfig> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        let config_id = config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        config.id = Some(config_id.clone());

        self.repository.save_push_config(task_id, &config).await?;
        entry
            .push_queues
            .insert(config_id, self.spawn_push_queue(config.clone()));

        Ok(TaskPushNotificationConfig {
            task_id: task_id.to_string(),
            push_notification_config: config,
        })
    }

    pub async fn get_push_config(
        &self,
        task_id: &str,
        config_id: Option<&str>,
    ) -> BrokerResult<TaskPushNotificationConfig> {
        let entry = self.entry(task_id)?;
        let entry = entry.lock().await;
        let config = match config_id {
            Some(id) => entry.push_queues.get(id).map(|q| q.config.clone()),
            None => entry.push_queues.values().next().map(|q| q.config.clone()),
        };
        config
            .map(|config| TaskPushNotificationConfig {
                task_id: task_id.to_string(),
                push_notification_config: config,
            })
            .ok_or_else(|| BrokerError::PushConfigNotFound {
                task_id: task_id.to_string(),
                config_id: config_id.unwrap_or("<any>").to_string(),
            })
    }

    pub async fn list_push_configs(
        &self,
        task_id: &str,
    ) -> BrokerResult<Vec<TaskPushNotificationConfig>> {
        let entry = self.entry(task_id)?;
        let entry = entry.lock().await;
        Ok(entry
            .push_queues
            .values()
            .map(|q| TaskPushNotificationConfig {
                task_id: task_id.to_string(),
                push_notification_config: q.config.clone(),
            })
            .collect())
    }

    pub async fn delete_push_config(&self, task_id: &str, config_id: &str) -> BrokerResult<()> {
        let entry = self.entry(task_id)?;
        let mut entry = entry.lock().await;
        if entry.push_queues.remove(config_id).is_none() {
            return Err(BrokerError::PushConfigNotFound {
                task_id: task_id.to_string(),
                config_id: config_id.to_string(),
            });
        }
        self.repository.delete_push_config(task_id, config_id).await
    }

    /// One ordered delivery queue per push config: events drain
    /// sequentially, so retries on one event delay but never reorder
    /// the next.
    fn spawn_push_queue(&self, config: PushNotificationConfig) -> PushQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let notifier = self.notifier.clone();
        let queue_config = config.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Only update envelopes go to push targets.
                if matches!(
                    event,
                    StreamEvent::StatusUpdate(_) | StreamEvent::ArtifactUpdate(_)
                ) {
                    notifier.deliver(&queue_config, &event).await;
                }
            }
        });
        PushQueue { config, tx }
    }
}

/// Whether a state ends the event stream for the current interaction.
///
/// Terminal states always do; input/auth waits pause the interaction,
/// which also closes the stream (the client resumes via a new send or
/// resubscribe).
fn stream_final(state: TaskState) -> bool {
    state.is_terminal()
        || matches!(state, TaskState::InputRequired | TaskState::AuthRequired)
}

fn agent_note(task_id: &str, context_id: &str, text: impl Into<String>) -> Message {
    Message {
        kind: devgrid_a2a::MESSAGE_KIND.to_string(),
        message_id: Uuid::new_v4().to_string(),
        role: MessageRole::Agent,
        parts: vec![devgrid_a2a::Part::text(text.into())],
        context_id: Some(context_id.to_string()),
        task_id: Some(task_id.to_string()),
        reference_task_ids: Vec::new(),
        metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryRepository;
    use std::time::Duration;

    fn manager() -> TaskManager {
        TaskManager::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(PushNotifier::new(Duration::from_secs(1))),
            false,
        )
    }

    fn user_message(text: &str) -> Message {
        Message {
            kind: "message".to_string(),
            message_id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            parts: vec![devgrid_a2a::Part::text(text)],
            context_id: None,
            task_id: None,
            reference_task_ids: Vec::new(),
            metadata: None,
        }
    }

    #[test]
    fn lifecycle_graph_edges() {
        use TaskState::*;
        assert!(transition_allowed(Submitted, Working));
        assert!(transition_allowed(Submitted, Rejected));
        assert!(transition_allowed(Working, InputRequired));
        assert!(transition_allowed(InputRequired, Working));
        assert!(transition_allowed(AuthRequired, Completed));
        assert!(transition_allowed(Working, Canceled));
        assert!(transition_allowed(InputRequired, Failed));

        assert!(!transition_allowed(Submitted, Completed));
        assert!(!transition_allowed(Working, Rejected));
        assert!(!transition_allowed(Completed, Working));
        assert!(!transition_allowed(Canceled, Canceled));
    }

    #[tokio::test]
    async fn create_keeps_first_message_in_history() {
        let manager = manager();
        let task = manager
            .create_task(user_message("ping"), None, None)
            .await
            .unwrap();
        let fetched = manager.get(&task.id, None).await.unwrap();
        assert_eq!(fetched.status.state, TaskState::Submitted);
        assert_eq!(fetched.history.len(), 1);
        assert_eq!(fetched.history[0].text(), "ping");
        assert_eq!(fetched.history[0].task_id.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn origin_dedup_returns_existing_task() {
        let manager = manager();
        let origin = StreamOrigin {
            device_id: "cam-1".into(),
            seq: 3,
        };
        let first = manager
            .create_task(user_message("motion"), None, Some(origin.clone()))
            .await
            .unwrap();
        let second = manager
            .create_task(user_message("motion"), None, Some(origin))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn terminal_tasks_are_immutable() {
        let manager = manager();
        let task = manager
            .create_task(user_message("hi"), None, None)
            .await
            .unwrap();
        manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        manager
            .complete_with_reply(&task.id, agent_note(&task.id, &task.context_id, "done"))
            .await
            .unwrap();

        let err = manager
            .append_user_message(&task.id, user_message("more"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TaskClosed { .. }));

        let err = manager.cancel(&task.id).await.unwrap_err();
        assert!(matches!(err, BrokerError::TaskClosed { .. }));

        // Failing after completion is swallowed, not an error.
        let event = manager.fail(&task.id, None, "late failure").await.unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn illegal_edge_is_rejected() {
        let manager = manager();
        let task = manager
            .create_task(user_message("hi"), None, None)
            .await
            .unwrap();
        let err = manager
            .transition(&task.id, TaskState::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidTaskStateTransition { .. }));
    }

    #[tokio::test]
    async fn repeated_transition_is_idempotent() {
        let manager = manager();
        let task = manager
            .create_task(user_message("hi"), None, None)
            .await
            .unwrap();
        let first = manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_identical_ordered_streams() {
        let manager = manager();
        let task = manager
            .create_task(user_message("chunks"), None, None)
            .await
            .unwrap();
        let mut rx1 = manager.subscribe(&task.id, false).await.unwrap();
        let mut rx2 = manager.subscribe(&task.id, false).await.unwrap();

        manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        for i in 0..5 {
            let artifact = Artifact {
                artifact_id: "report".to_string(),
                parts: vec![devgrid_a2a::Part::text(format!("chunk-{i}"))],
                name: None,
                description: None,
                metadata: None,
            };
            manager
                .append_artifact_chunk(&task.id, artifact, i > 0, false)
                .await
                .unwrap();
        }
        let last = Artifact {
            artifact_id: "report".to_string(),
            parts: vec![devgrid_a2a::Part::text("chunk-5")],
            name: None,
            description: None,
            metadata: None,
        };
        manager
            .append_artifact_chunk(&task.id, last, true, true)
            .await
            .unwrap();
        manager
            .complete_with_reply(&task.id, agent_note(&task.id, &task.context_id, "done"))
            .await
            .unwrap();

        let drain = |rx: &mut mpsc::Receiver<StreamEvent>| {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            events
        };
        let events1 = drain(&mut rx1);
        let events2 = drain(&mut rx2);

        assert_eq!(events1, events2);
        // Working + 6 chunks + final.
        assert_eq!(events1.len(), 8);
        assert_eq!(events1.iter().filter(|e| e.is_final()).count(), 1);
        assert!(events1.last().unwrap().is_final());

        // Chunk concatenation equals the assembled artifact.
        let task = manager.get(&task.id, None).await.unwrap();
        assert_eq!(task.artifacts.len(), 1);
        let texts: Vec<String> = task.artifacts[0]
            .parts
            .iter()
            .filter_map(|p| match p {
                devgrid_a2a::Part::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            (0..6).map(|i| format!("chunk-{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn cancel_signals_job_token() {
        let manager = manager();
        let task = manager
            .create_task(user_message("slow"), None, None)
            .await
            .unwrap();
        manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        let token = manager.cancel_token(&task.id).await.unwrap();
        assert!(!token.is_cancelled());

        let canceled = manager.cancel(&task.id).await.unwrap();
        assert_eq!(canceled.status.state, TaskState::Canceled);
        assert!(token.is_cancelled());

        // The job finishing late must not resurrect the task.
        let late = manager
            .complete_with_reply(&task.id, agent_note(&task.id, &task.context_id, "late"))
            .await
            .unwrap();
        assert!(late.is_none());
        let task = manager.get(&task.id, None).await.unwrap();
        assert_eq!(task.status.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn history_truncation() {
        let manager = manager();
        let task = manager
            .create_task(user_message("one"), None, None)
            .await
            .unwrap();
        for text in ["two", "three"] {
            manager
                .append_user_message(&task.id, user_message(text))
                .await
                .unwrap();
        }
        let truncated = manager.get(&task.id, Some(2)).await.unwrap();
        assert_eq!(truncated.history.len(), 2);
        assert_eq!(truncated.history[0].text(), "two");
        assert_eq!(truncated.history[1].text(), "three");
    }

    #[tokio::test]
    async fn device_removal_fails_bound_tasks() {
        let manager = manager();
        let task = manager
            .create_task(user_message("photo"), None, None)
            .await
            .unwrap();
        manager
            .transition(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        manager.bind_device(&task.id, "cam-1").await.unwrap();

        let failed = manager.fail_tasks_for_device("cam-1").await.unwrap();
        assert_eq!(failed, 1);
        let task = manager.get(&task.id, None).await.unwrap();
        assert_eq!(task.status.state, TaskState::Failed);
        let note = task.status.message.expect("failure note");
        assert!(note.text().contains("device-gone"));
    }

    #[tokio::test]
    async fn push_config_crud() {
        let manager = manager();
        let task = manager
            .create_task(user_message("hi"), None, None)
            .await
            .unwrap();
        let config = PushNotificationConfig {
            url: "https://client.example/hook".into(),
            id: None,
            token: None,
            authentication: None,
        };
        let stored = manager.set_push_config(&task.id, config).await.unwrap();
        let config_id = stored.push_notification_config.id.clone().unwrap();

        let listed = manager.list_push_configs(&task.id).await.unwrap();
        assert_eq!(listed.len(), 1);

        let fetched = manager
            .get_push_config(&task.id, Some(&config_id))
            .await
            .unwrap();
        assert_eq!(fetched.push_notification_config.id.as_deref(), Some(config_id.as_str()));

        manager
            .delete_push_config(&task.id, &config_id)
            .await
            .unwrap();
        assert!(manager.list_push_configs(&task.id).await.unwrap().is_empty());
    }
}
