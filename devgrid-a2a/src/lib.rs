//! Wire types for the A2A (Agent2Agent) JSON-RPC 2.0 protocol as spoken
//! by the devgrid broker.
//!
//! The structures here mirror the protocol JSON schema and are meant to
//! round-trip through `serde` unchanged: field names on the wire are
//! camelCase, discriminated unions are tagged by their `kind`/`method`
//! field, and optional members are omitted when absent.
//!
//! The broker-facing surface is:
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] envelopes and [`ErrorCode`],
//! - the task lifecycle objects ([`Task`], [`Message`], [`Artifact`]),
//! - the streaming events ([`TaskStatusUpdateEvent`], [`TaskArtifactUpdateEvent`]),
//! - the typed method payloads ([`A2aRequest`]),
//! - the discovery document ([`AgentCard`], in [`card`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod card;
pub use card::{
    AgentCapabilities, AgentCard, AgentInterface, AgentProvider, AgentSkill, SecurityScheme,
    TransportProtocol,
};

/// Version of the A2A protocol this crate tracks.
///
/// Only the feature set common to 0.2.6 and 0.3.0 is relied on;
/// streaming and push notifications are advertised as optional
/// capability flags rather than assumed.
pub const PROTOCOL_VERSION: &str = "0.3.0";

pub const TASK_KIND: &str = "task";
pub const MESSAGE_KIND: &str = "message";
pub const STATUS_UPDATE_KIND: &str = "status-update";
pub const ARTIFACT_UPDATE_KIND: &str = "artifact-update";

/// Well-known path where the agent card is served.
pub const AGENT_CARD_PATH: &str = ".well-known/agent-card.json";

// ============================================================================
// JSON-RPC 2.0 envelopes
// ============================================================================

/// A JSON-RPC 2.0 request identifier: string, number, or null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
    Null,
}

/// A JSON-RPC 2.0 request envelope.
///
/// `id` is absent for notifications, which the broker accepts only on
/// the push-delivery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

/// A JSON-RPC 2.0 response envelope, success or error.
///
/// Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Build an error object from a well-known code with its canonical
    /// message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.canonical_message().to_string(),
            data: None,
        }
    }

    /// Build an error object with a caller-supplied detail message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// The error taxonomy surfaced over JSON-RPC.
///
/// The first five are the standard JSON-RPC codes; the rest are the
/// A2A-specific range starting at -32001.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    TaskNotFound,
    TaskNotCancelable,
    PushNotificationNotSupported,
    UnsupportedOperation,
    ContentTypeNotSupported,
    InvalidAgentResponse,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::TaskNotFound => -32001,
            ErrorCode::TaskNotCancelable => -32002,
            ErrorCode::PushNotificationNotSupported => -32003,
            ErrorCode::UnsupportedOperation => -32004,
            ErrorCode::ContentTypeNotSupported => -32005,
            ErrorCode::InvalidAgentResponse => -32006,
        }
    }

    pub fn canonical_message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Invalid JSON payload",
            ErrorCode::InvalidRequest => "Request payload validation error",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid parameters",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::TaskNotFound => "Task not found",
            ErrorCode::TaskNotCancelable => "Task cannot be canceled",
            ErrorCode::PushNotificationNotSupported => "Push notifications are not supported",
            ErrorCode::UnsupportedOperation => "This operation is not supported",
            ErrorCode::ContentTypeNotSupported => "Incompatible content types",
            ErrorCode::InvalidAgentResponse => "Invalid agent response",
        }
    }
}

/// Runtime condition that drove a task into `Failed`.
///
/// Carried in the text of the terminal status message rather than as a
/// JSON-RPC error: these arise inside a running task, after the
/// request-level response has already been sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    DeviceGone,
    Timeout,
    Overloaded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::DeviceGone => "device-gone",
            FailureKind::Timeout => "timeout",
            FailureKind::Overloaded => "overloaded",
        }
    }
}

// ============================================================================
// Task lifecycle objects
// ============================================================================

/// Lifecycle states of a task.
///
/// `Completed`, `Failed`, `Canceled`, and `Rejected` are terminal and
/// absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl TaskState {
    /// Whether the state is absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }
}

/// The status of a task at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    /// ISO 8601 timestamp of when this status was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Optional agent message elaborating on the status (for terminal
    /// failures this names the [`FailureKind`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

/// A stateful unit of work with identity, lifecycle, history, and
/// artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default = "default_task_kind")]
    pub kind: String,
    /// Server-generated unique identifier.
    pub id: String,
    /// Groups related tasks and their messages.
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_task_kind() -> String {
    TASK_KIND.to_string()
}

/// Sender of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// One message in the conversation between a client and the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "default_message_kind")]
    pub kind: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub role: MessageRole,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "contextId")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        rename = "referenceTaskIds",
        default
    )]
    pub reference_task_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_message_kind() -> String {
    MESSAGE_KIND.to_string()
}

impl Message {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content part of a message or artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// A text segment.
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    /// A file, inline or by reference.
    File {
        file: FileContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    /// A structured data segment.
    Data {
        data: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }
}

/// File content carried either as base64 bytes or as a URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    Bytes {
        /// Base64-encoded content.
        bytes: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Uri {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// A resource produced by the broker during a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Unique within the owning task.
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

// ============================================================================
// Streaming events
// ============================================================================

/// Notifies subscribers of a change in a task's status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusUpdateEvent {
    #[serde(default = "default_status_update_kind")]
    pub kind: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub status: TaskStatus,
    /// True on the last event of the stream for this interaction.
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_status_update_kind() -> String {
    STATUS_UPDATE_KIND.to_string()
}

/// Notifies subscribers of a generated or extended artifact.
///
/// Chunks with `append=true` extend the prior payload for the same
/// `artifactId`; `lastChunk=true` seals it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifactUpdateEvent {
    #[serde(default = "default_artifact_update_kind")]
    pub kind: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub artifact: Artifact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastChunk")]
    pub last_chunk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_artifact_update_kind() -> String {
    ARTIFACT_UPDATE_KIND.to_string()
}

/// One self-contained payload on a `message/stream` or
/// `tasks/resubscribe` stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StreamEvent {
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
    Task(Task),
    Message(Message),
}

impl StreamEvent {
    /// Whether this event terminates the stream.
    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::StatusUpdate(e) if e.is_final)
    }
}

/// Result of `message/send`: a task, or a direct reply message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendMessageResult {
    Task(Task),
    Message(Message),
}

// ============================================================================
// Method parameters
// ============================================================================

/// Parameters of `message/send` and `message/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Per-request configuration for sending a message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageSendConfiguration {
    /// When true the server holds the response until the task reaches a
    /// terminal or input-required state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
    /// Output MIME types the client accepts.
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        rename = "acceptedOutputModes",
        default
    )]
    pub accepted_output_modes: Vec<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "pushNotificationConfig"
    )]
    pub push_notification_config: Option<PushNotificationConfig>,
}

/// Parameters carrying just a task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Parameters of `tasks/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
}

/// Parameters of `tasks/list`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListTasksParams {
    #[serde(skip_serializing_if = "Option::is_none", rename = "contextId")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
}

/// Client-supplied callback configuration for asynchronous updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotificationConfig {
    /// Callback URL the broker POSTs update envelopes to.
    pub url: String,
    /// Config id, unique per task; server-assigned when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Opaque token echoed back for client-side validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushNotificationAuthenticationInfo>,
}

/// Authentication material for a push callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotificationAuthenticationInfo {
    /// Supported schemes, e.g. `Bearer`.
    pub schemes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// Associates a push config with its task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPushNotificationConfig {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "pushNotificationConfig")]
    pub push_notification_config: PushNotificationConfig,
}

/// Parameters of `tasks/pushNotificationConfig/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPushConfigParams {
    pub id: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "pushNotificationConfigId"
    )]
    pub push_notification_config_id: Option<String>,
}

/// Parameters of `tasks/pushNotificationConfig/delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePushConfigParams {
    pub id: String,
    #[serde(rename = "pushNotificationConfigId")]
    pub push_notification_config_id: String,
}

/// All A2A method payloads, tagged by the `method` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum A2aRequest {
    #[serde(rename = "message/send")]
    SendMessage { params: MessageSendParams },
    #[serde(rename = "message/stream")]
    StreamMessage { params: MessageSendParams },
    #[serde(rename = "tasks/get")]
    GetTask { params: TaskQueryParams },
    #[serde(rename = "tasks/list")]
    ListTasks {
        #[serde(default)]
        params: ListTasksParams,
    },
    #[serde(rename = "tasks/cancel")]
    CancelTask { params: TaskIdParams },
    #[serde(rename = "tasks/resubscribe")]
    Resubscribe { params: TaskIdParams },
    #[serde(rename = "tasks/pushNotificationConfig/set")]
    SetPushConfig { params: TaskPushNotificationConfig },
    #[serde(rename = "tasks/pushNotificationConfig/get")]
    GetPushConfig { params: GetPushConfigParams },
    #[serde(rename = "tasks/pushNotificationConfig/list")]
    ListPushConfigs { params: TaskIdParams },
    #[serde(rename = "tasks/pushNotificationConfig/delete")]
    DeletePushConfig { params: DeletePushConfigParams },
    #[serde(rename = "agent/getAuthenticatedExtendedCard")]
    GetExtendedCard,
}

impl A2aRequest {
    /// The wire method name, `{category}/{action}`.
    pub fn method(&self) -> &'static str {
        match self {
            A2aRequest::SendMessage { .. } => "message/send",
            A2aRequest::StreamMessage { .. } => "message/stream",
            A2aRequest::GetTask { .. } => "tasks/get",
            A2aRequest::ListTasks { .. } => "tasks/list",
            A2aRequest::CancelTask { .. } => "tasks/cancel",
            A2aRequest::Resubscribe { .. } => "tasks/resubscribe",
            A2aRequest::SetPushConfig { .. } => "tasks/pushNotificationConfig/set",
            A2aRequest::GetPushConfig { .. } => "tasks/pushNotificationConfig/get",
            A2aRequest::ListPushConfigs { .. } => "tasks/pushNotificationConfig/list",
            A2aRequest::DeletePushConfig { .. } => "tasks/pushNotificationConfig/delete",
            A2aRequest::GetExtendedCard => "agent/getAuthenticatedExtendedCard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InputRequired).unwrap(),
            "\"input-required\""
        );
        assert_eq!(
            serde_json::from_str::<TaskState>("\"auth-required\"").unwrap(),
            TaskState::AuthRequired
        );
    }

    #[test]
    fn terminal_states() {
        for s in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Canceled,
            TaskState::Rejected,
        ] {
            assert!(s.is_terminal());
        }
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
    }

    #[test]
    fn part_kind_tagging() {
        let part = Part::text("hello");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hello");

        let file = Part::File {
            file: FileContent::Uri {
                uri: "https://example.com/img.jpg".into(),
                mime_type: Some("image/jpeg".into()),
                name: None,
            },
            metadata: None,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["file"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn request_dispatches_on_method() {
        let raw = serde_json::json!({
            "method": "tasks/get",
            "params": { "id": "t-1", "historyLength": 5 }
        });
        let req: A2aRequest = serde_json::from_value(raw).unwrap();
        match req {
            A2aRequest::GetTask { params } => {
                assert_eq!(params.id, "t-1");
                assert_eq!(params.history_length, Some(5));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn list_tasks_params_default() {
        let raw = serde_json::json!({ "method": "tasks/list" });
        let req: A2aRequest = serde_json::from_value(raw).unwrap();
        assert!(matches!(req, A2aRequest::ListTasks { .. }));
    }

    #[test]
    fn error_code_values() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::TaskNotFound.code(), -32001);
        assert_eq!(ErrorCode::InvalidAgentResponse.code(), -32006);
    }

    #[test]
    fn stream_event_final_flag() {
        let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: "t-1".into(),
            context_id: "c-1".into(),
            status: TaskStatus {
                state: TaskState::Completed,
                timestamp: None,
                message: None,
            },
            is_final: true,
            metadata: None,
        });
        assert!(event.is_final());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["final"], true);
        assert_eq!(json["kind"], "status-update");
    }

    #[test]
    fn message_text_joins_parts() {
        let msg = Message {
            kind: MESSAGE_KIND.to_string(),
            message_id: "m-1".into(),
            role: MessageRole::User,
            parts: vec![Part::text("take"), Part::text("a photo")],
            context_id: None,
            task_id: None,
            reference_task_ids: Vec::new(),
            metadata: None,
        };
        assert_eq!(msg.text(), "take\na photo");
    }
}
