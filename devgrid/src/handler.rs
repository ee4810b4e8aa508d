//! A2A request handler.
//!
//! The neutral half of the protocol surface: typed requests in, typed
//! results or event streams out. Transport adapters (see
//! `devgrid-server`) translate wire frames to and from this layer.
//!
//! `message/send` resolves or creates the task, appends the user
//! message, routes it, and executes the decision through the worker
//! pool. Blocking sends hold the response until the interaction
//! settles; streaming sends subscribe before execution so no event is
//! lost.

use crate::agents::EndpointRegistry;
use crate::card::CardService;
use crate::config::BrokerConfig;
use crate::errors::{BrokerError, BrokerResult};
use crate::ports::{DeviceConnector, StreamOrigin, ToolOutput};
use crate::registry::{Device, DeviceRegistry};
use crate::router::{Decision, IntentRouter, RouteOutcome, RouterSnapshot};
use crate::tasks::TaskManager;
use crate::workers::WorkerPool;
use base64::Engine;
use devgrid_a2a::{
    A2aRequest, Artifact, FailureKind, FileContent, Message, MessageRole, MessageSendParams,
    Part, SendMessageResult, StreamEvent, Task, TaskState,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The already-authenticated caller, as handed over by the transport.
#[derive(Debug, Clone)]
pub struct Principal {
    pub app_name: String,
    pub user_id: String,
    /// True for requests the broker synthesizes itself (scan loop).
    pub internal: bool,
}

impl Principal {
    pub fn external(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            internal: false,
        }
    }

    /// The privileged internal principal used by the scan loop.
    pub fn internal() -> Self {
        Self {
            app_name: "devgrid".to_string(),
            user_id: "scan-loop".to_string(),
            internal: true,
        }
    }
}

/// Result of one handled request: a value or an ordered event stream.
#[derive(Debug)]
pub enum HandlerOutcome {
    Value(serde_json::Value),
    Stream(mpsc::Receiver<StreamEvent>),
}

#[derive(Clone)]
pub struct A2aHandler {
    config: Arc<BrokerConfig>,
    registry: Arc<DeviceRegistry>,
    tasks: Arc<TaskManager>,
    router: Arc<IntentRouter>,
    workers: Arc<WorkerPool>,
    endpoints: Arc<EndpointRegistry>,
    connector: Arc<dyn DeviceConnector>,
    card: Arc<CardService>,
}

impl A2aHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<BrokerConfig>,
        registry: Arc<DeviceRegistry>,
        tasks: Arc<TaskManager>,
        router: Arc<IntentRouter>,
        workers: Arc<WorkerPool>,
        endpoints: Arc<EndpointRegistry>,
        connector: Arc<dyn DeviceConnector>,
        card: Arc<CardService>,
    ) -> Self {
        Self {
            config,
            registry,
            tasks,
            router,
            workers,
            endpoints,
            connector,
            card,
        }
    }

    /// Dispatch one typed request.
    pub async fn handle(
        &self,
        request: A2aRequest,
        principal: &Principal,
    ) -> BrokerResult<HandlerOutcome> {
        tracing::debug!(method = request.method(), user = %principal.user_id, "handling request");
        match request {
            A2aRequest::SendMessage { params } => {
                let task = self.send_message(params, principal).await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(
                    SendMessageResult::Task(task),
                )?))
            }
            A2aRequest::StreamMessage { params } => {
                if !self.config.capabilities.streaming {
                    return Err(BrokerError::StreamingDisabled);
                }
                let rx = self.stream_message(params, principal).await?;
                Ok(HandlerOutcome::Stream(rx))
            }
            A2aRequest::GetTask { params } => {
                let task = self.tasks.get(&params.id, params.history_length).await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(task)?))
            }
            A2aRequest::ListTasks { params } => {
                let tasks = self
                    .tasks
                    .list(params.context_id.as_deref(), params.state)
                    .await;
                Ok(HandlerOutcome::Value(serde_json::to_value(tasks)?))
            }
            A2aRequest::CancelTask { params } => {
                let task = self.tasks.cancel(&params.id).await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(task)?))
            }
            A2aRequest::Resubscribe { params } => {
                if !self.config.capabilities.streaming {
                    return Err(BrokerError::StreamingDisabled);
                }
                let task = self.tasks.get(&params.id, None).await?;
                if task.status.state.is_terminal() {
                    return Err(BrokerError::TaskClosed { task_id: params.id });
                }
                let rx = self.tasks.subscribe(&params.id, true).await?;
                Ok(HandlerOutcome::Stream(rx))
            }
            A2aRequest::SetPushConfig { params } => {
                self.require_push()?;
                let stored = self
                    .tasks
                    .set_push_config(&params.task_id, params.push_notification_config)
                    .await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(stored)?))
            }
            A2aRequest::GetPushConfig { params } => {
                self.require_push()?;
                let config = self
                    .tasks
                    .get_push_config(&params.id, params.push_notification_config_id.as_deref())
                    .await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(config)?))
            }
            A2aRequest::ListPushConfigs { params } => {
                self.require_push()?;
                let configs = self.tasks.list_push_configs(&params.id).await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(configs)?))
            }
            A2aRequest::DeletePushConfig { params } => {
                self.require_push()?;
                self.tasks
                    .delete_push_config(&params.id, &params.push_notification_config_id)
                    .await?;
                Ok(HandlerOutcome::Value(serde_json::Value::Null))
            }
            A2aRequest::GetExtendedCard => {
                Ok(HandlerOutcome::Value(serde_json::to_value(
                    self.card.current().as_ref(),
                )?))
            }
        }
    }

    fn require_push(&self) -> BrokerResult<()> {
        if self.config.capabilities.push_notifications {
            Ok(())
        } else {
            Err(BrokerError::PushNotificationsDisabled)
        }
    }

    /// `message/send`: create or continue a task, run the decision, and
    /// (for blocking sends, the default) wait for the interaction to
    /// settle.
    pub async fn send_message(
        &self,
        params: MessageSendParams,
        _principal: &Principal,
    ) -> BrokerResult<Task> {
        let configuration = params.configuration.clone().unwrap_or_default();
        self.check_accepted_modes(&configuration.accepted_output_modes)?;
        let blocking = configuration.blocking.unwrap_or(true);
        let history_length = configuration.history_length;

        let task = self.prepare_task(params).await?;
        let task_id = task.id.clone();

        let mut rx = self.tasks.subscribe(&task_id, false).await?;
        self.spawn_routed_job(&task_id, None, None).await?;

        if blocking {
            let deadline = self.config.timeouts.blocking_request();
            let settled = tokio::time::timeout(deadline, async {
                while let Some(event) = rx.recv().await {
                    if event.is_final() {
                        break;
                    }
                }
            })
            .await;
            if settled.is_err() {
                self.tasks
                    .fail(
                        &task_id,
                        Some(FailureKind::Timeout),
                        format!("request deadline of {deadline:?} elapsed"),
                    )
                    .await?;
            }
        }

        self.tasks.get(&task_id, history_length).await
    }

    /// `message/stream`: subscribe first, then execute, so subscribers
    /// observe every event from `Working` onward.
    pub async fn stream_message(
        &self,
        params: MessageSendParams,
        _principal: &Principal,
    ) -> BrokerResult<mpsc::Receiver<StreamEvent>> {
        let configuration = params.configuration.clone().unwrap_or_default();
        self.check_accepted_modes(&configuration.accepted_output_modes)?;

        let task = self.prepare_task(params).await?;
        let rx = self.tasks.subscribe(&task.id, true).await?;
        self.spawn_routed_job(&task.id, None, None).await?;
        Ok(rx)
    }

    /// Entry point for the scan loop: the router already produced a
    /// decision for this stream entry, so execution skips straight to
    /// it. Task creation dedups on the origin.
    pub async fn submit_internal(
        &self,
        text: String,
        device: Device,
        origin: StreamOrigin,
        outcome: RouteOutcome,
    ) -> BrokerResult<String> {
        if let Some(existing) = self.tasks.find_by_origin(&origin).await? {
            // This entry was dispatched before (at-least-once delivery);
            // the existing task stands.
            return Ok(existing);
        }

        let message = Message {
            kind: devgrid_a2a::MESSAGE_KIND.to_string(),
            message_id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            parts: vec![Part::text(text)],
            context_id: None,
            task_id: None,
            reference_task_ids: Vec::new(),
            metadata: None,
        };

        let task = self
            .tasks
            .create_task(message, None, Some(origin))
            .await?;
        let task_id = task.id.clone();
        self.spawn_routed_job(&task_id, Some(device), Some(outcome))
            .await?;
        Ok(task_id)
    }

    /// Resolve the task a send refers to, appending the user message.
    async fn prepare_task(&self, params: MessageSendParams) -> BrokerResult<Task> {
        let push_config = params
            .configuration
            .as_ref()
            .and_then(|c| c.push_notification_config.clone());

        let task = match params.message.task_id.clone() {
            Some(task_id) => {
                self.tasks
                    .append_user_message(&task_id, params.message)
                    .await?
            }
            None => {
                let context_id = params.message.context_id.clone();
                self.tasks
                    .create_task(params.message, context_id, None)
                    .await?
            }
        };

        if let Some(config) = push_config {
            if self.config.capabilities.push_notifications {
                self.tasks.set_push_config(&task.id, config).await?;
            } else {
                return Err(BrokerError::PushNotificationsDisabled);
            }
        }
        Ok(task)
    }

    /// Queue the route-and-execute job; a full queue fails the task
    /// with `Overloaded` (the caller still returns the task, now
    /// terminal, to the client).
    async fn spawn_routed_job(
        &self,
        task_id: &str,
        origin_device: Option<Device>,
        outcome: Option<RouteOutcome>,
    ) -> BrokerResult<()> {
        let this = self.clone();
        let job_task_id = task_id.to_string();
        let submitted = self
            .workers
            .submit(async move {
                this.run_task(&job_task_id, origin_device, outcome).await;
            })
            .await;

        match submitted {
            Err(BrokerError::Overloaded) => {
                self.tasks
                    .fail(task_id, Some(FailureKind::Overloaded), "worker queue full")
                    .await?;
                Ok(())
            }
            other => other,
        }
    }

    /// The body of one task job: route (unless pre-routed) and execute.
    /// Errors land on the task, never escape the worker.
    async fn run_task(
        &self,
        task_id: &str,
        origin_device: Option<Device>,
        pre_routed: Option<RouteOutcome>,
    ) {
        let outcome = match pre_routed {
            Some(outcome) => Ok(outcome),
            None => self.route_task(task_id, origin_device.as_ref()).await,
        };

        let result = match outcome {
            Ok(outcome) => self.execute_decision(task_id, outcome).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(task_id, error = %e, "task execution failed");
            let kind = match &e {
                BrokerError::Timeout { .. } => Some(FailureKind::Timeout),
                BrokerError::Overloaded => Some(FailureKind::Overloaded),
                BrokerError::DeviceNotFound { .. } => Some(FailureKind::DeviceGone),
                _ => None,
            };
            if let Err(fail_err) = self.tasks.fail(task_id, kind, e.to_string()).await {
                tracing::error!(task_id, error = %fail_err, "failed to record task failure");
            }
        }
    }

    async fn route_task(
        &self,
        task_id: &str,
        origin_device: Option<&Device>,
    ) -> BrokerResult<RouteOutcome> {
        let task = self.tasks.get(task_id, None).await?;
        let text = task
            .history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text())
            .unwrap_or_default();

        let snapshot = RouterSnapshot {
            devices: self.registry.snapshot(),
            endpoints: self
                .endpoints
                .enabled()
                .into_iter()
                .map(|e| {
                    let health = self.endpoints.health(&e.agent_id);
                    (e, health)
                })
                .collect(),
        };
        self.router.route(&text, origin_device, &snapshot).await
    }

    async fn execute_decision(
        &self,
        task_id: &str,
        outcome: RouteOutcome,
    ) -> BrokerResult<()> {
        // A continued task parked on input/auth resumes to Working
        // before the new decision applies.
        let current = self.tasks.get(task_id, None).await?.status.state;
        if matches!(current, TaskState::InputRequired | TaskState::AuthRequired) {
            self.tasks
                .transition(task_id, TaskState::Working, None)
                .await?;
        }

        let RouteOutcome {
            decision,
            needs_input,
            ..
        } = outcome;
        match decision {
            Decision::Local { reply } if needs_input => {
                self.tasks
                    .transition(task_id, TaskState::Working, None)
                    .await?;
                self.tasks
                    .transition(task_id, TaskState::InputRequired, Some(reply))
                    .await?;
                Ok(())
            }
            Decision::Local { reply } => {
                self.tasks
                    .transition(task_id, TaskState::Working, None)
                    .await?;
                self.tasks.complete_with_reply(task_id, reply).await?;
                Ok(())
            }
            Decision::Reject { reason } => {
                let state = self.tasks.get(task_id, None).await?.status.state;
                if state == TaskState::Submitted {
                    let task = self.tasks.get(task_id, None).await?;
                    let note = agent_message(&task.context_id, task_id, reason);
                    self.tasks
                        .transition(task_id, TaskState::Rejected, Some(note))
                        .await?;
                } else {
                    // A continuation cannot be rejected; close it out
                    // with the reason instead.
                    let task = self.tasks.get(task_id, None).await?;
                    let note = agent_message(&task.context_id, task_id, reason);
                    self.tasks.complete_with_reply(task_id, note).await?;
                }
                Ok(())
            }
            Decision::Device {
                device_id,
                tool_id,
                arguments,
            } => {
                self.invoke_device(task_id, &device_id, &tool_id, arguments)
                    .await
            }
            Decision::Delegate { agent_id } => self.delegate(task_id, &agent_id).await,
        }
    }

    async fn invoke_device(
        &self,
        task_id: &str,
        device_id: &str,
        tool_id: &str,
        arguments: serde_json::Value,
    ) -> BrokerResult<()> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| BrokerError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        device
            .tool(tool_id)
            .ok_or_else(|| BrokerError::ToolNotFound {
                device_id: device_id.to_string(),
                tool_id: tool_id.to_string(),
            })?;

        self.tasks.bind_device(task_id, device_id).await?;
        self.tasks
            .transition(task_id, TaskState::Working, None)
            .await?;

        let token = self.tasks.cancel_token(task_id).await?;
        let timeout = self.config.timeouts.tool_call();
        let invocation = self.connector.invoke_tool(
            &device.capability_source,
            tool_id,
            arguments,
            token.clone(),
        );

        let output = tokio::select! {
            result = invocation => result,
            _ = token.cancelled() => Err(BrokerError::Canceled {
                operation: format!("invoke {tool_id}"),
            }),
            _ = tokio::time::sleep(timeout) => Err(BrokerError::Timeout {
                operation: format!("invoke {tool_id} on {device_id}"),
                duration_ms: timeout.as_millis() as u64,
            }),
        };

        let output = match output {
            Ok(output) => output,
            Err(BrokerError::Canceled { .. }) => {
                // The cancel path already drove the task terminal.
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let artifact = tool_output_artifact(tool_id, output);
        self.tasks
            .append_artifact_chunk(task_id, artifact, false, true)
            .await?;

        let task = self.tasks.get(task_id, None).await?;
        let reply = agent_message(
            &task.context_id,
            task_id,
            format!("Tool {tool_id} on device {device_id} completed."),
        );
        self.tasks.complete_with_reply(task_id, reply).await?;
        Ok(())
    }

    async fn delegate(&self, task_id: &str, agent_id: &str) -> BrokerResult<()> {
        self.tasks
            .transition(task_id, TaskState::Working, None)
            .await?;

        let client = self.endpoints.client_for(agent_id).await?;
        let task = self.tasks.get(task_id, None).await?;
        let forwarded_text = task
            .history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text())
            .unwrap_or_default();

        let forward = MessageSendParams {
            message: Message {
                kind: devgrid_a2a::MESSAGE_KIND.to_string(),
                message_id: Uuid::new_v4().to_string(),
                role: MessageRole::User,
                parts: vec![Part::text(forwarded_text)],
                context_id: None,
                task_id: None,
                reference_task_ids: Vec::new(),
                metadata: None,
            },
            configuration: None,
            metadata: None,
        };

        let token = self.tasks.cancel_token(task_id).await?;
        let timeout = self.config.timeouts.blocking_request();
        let result = tokio::select! {
            result = client.send_message(forward) => result,
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(timeout) => {
                return Err(BrokerError::Timeout {
                    operation: format!("delegate to {agent_id}"),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
        };

        let result = result.map_err(|e| match e {
            devgrid_client::ClientError::NonConformant { message } => {
                BrokerError::InvalidAgentResponse {
                    agent_id: agent_id.to_string(),
                    reason: message,
                }
            }
            other => BrokerError::DelegationFailed {
                agent_id: agent_id.to_string(),
                reason: other.to_string(),
            },
        })?;

        match result {
            devgrid_a2a::SendMessageResult::Message(mut message) => {
                message.role = MessageRole::Agent;
                self.tasks.complete_with_reply(task_id, message).await?;
            }
            devgrid_a2a::SendMessageResult::Task(remote) => {
                for artifact in remote.artifacts.clone() {
                    self.tasks
                        .append_artifact_chunk(task_id, artifact, false, true)
                        .await?;
                }
                let reply_text = remote
                    .status
                    .message
                    .as_ref()
                    .map(|m| m.text())
                    .filter(|t| !t.is_empty())
                    .or_else(|| {
                        remote
                            .history
                            .iter()
                            .rev()
                            .find(|m| m.role == MessageRole::Agent)
                            .map(|m| m.text())
                    })
                    .unwrap_or_else(|| format!("Agent {agent_id} handled the request."));
                let reply = agent_message(&task.context_id, task_id, reply_text);
                self.tasks.complete_with_reply(task_id, reply).await?;
            }
        }
        Ok(())
    }

    /// Reject sends whose accepted output modes exclude everything the
    /// broker can produce.
    fn check_accepted_modes(&self, accepted: &[String]) -> BrokerResult<()> {
        if accepted.is_empty() {
            return Ok(());
        }
        let device_modes: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .flat_map(|d| d.output_modes)
            .collect();
        let acceptable = accepted.iter().any(|mode| {
            mode == "*/*"
                || mode.starts_with("text/")
                || mode == "application/json"
                || device_modes.iter().any(|m| m == mode)
        });
        if acceptable {
            Ok(())
        } else {
            Err(BrokerError::ContentTypeNotSupported {
                requested: accepted.join(", "),
            })
        }
    }
}

/// Render a tool invocation's output as a task artifact: structured
/// data first, then one file part per binary payload.
fn tool_output_artifact(tool_id: &str, output: ToolOutput) -> Artifact {
    let mut parts = Vec::new();
    if !output.data.is_null() {
        parts.push(Part::data(output.data));
    }
    for file in output.files {
        parts.push(Part::File {
            file: FileContent::Bytes {
                bytes: base64::engine::general_purpose::STANDARD.encode(&file.bytes),
                mime_type: Some(file.mime_type),
                name: file.name,
            },
            metadata: None,
        });
    }
    Artifact {
        artifact_id: Uuid::new_v4().to_string(),
        parts,
        name: Some(format!("{tool_id} output")),
        description: None,
        metadata: None,
    }
}

fn agent_message(context_id: &str, task_id: &str, text: impl Into<String>) -> Message {
    Message {
        kind: devgrid_a2a::MESSAGE_KIND.to_string(),
        message_id: Uuid::new_v4().to_string(),
        role: MessageRole::Agent,
        parts: vec![Part::text(text.into())],
        context_id: Some(context_id.to_string()),
        task_id: Some(task_id.to_string()),
        reference_task_ids: Vec::new(),
        metadata: None,
    }
}
