/// Main error type for the broker core.
use devgrid_a2a::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    // === Device Registry Errors ===
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("device already registered with a different capability source: {device_id}")]
    DeviceAlreadyRegistered { device_id: String },

    #[error("capability source unreachable for {device_id}: {reason}")]
    InvalidCapabilitySource { device_id: String, reason: String },

    #[error("tool not found: {tool_id} on device {device_id}")]
    ToolNotFound { device_id: String, tool_id: String },

    #[error("tool invocation failed: {tool_id} on {device_id}: {reason}")]
    ToolInvocationFailed {
        device_id: String,
        tool_id: String,
        reason: String,
    },

    // === Task Errors ===
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("task is closed: {task_id}")]
    TaskClosed { task_id: String },

    #[error("invalid task state transition: {from} -> {to}")]
    InvalidTaskStateTransition { from: String, to: String },

    #[error("push config not found: {config_id} on task {task_id}")]
    PushConfigNotFound {
        task_id: String,
        config_id: String,
    },

    // === Capability Errors ===
    #[error("push notifications are not enabled for this service")]
    PushNotificationsDisabled,

    #[error("streaming is not enabled for this service")]
    StreamingDisabled,

    #[error("unsupported operation: {reason}")]
    UnsupportedOperation { reason: String },

    #[error("no acceptable content type among: {requested}")]
    ContentTypeNotSupported { requested: String },

    // === Routing / Delegation Errors ===
    #[error("external agent not found: {agent_id}")]
    AgentEndpointNotFound { agent_id: String },

    #[error("delegation to {agent_id} failed: {reason}")]
    DelegationFailed { agent_id: String, reason: String },

    #[error("invalid response from external agent {agent_id}: {reason}")]
    InvalidAgentResponse { agent_id: String, reason: String },

    #[error("llm call failed: {reason}")]
    Llm { reason: String },

    // === Request Validation Errors ===
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("invalid parameters: {reason}")]
    InvalidParams { reason: String },

    // === Runtime Errors ===
    #[error("worker queue is full")]
    Overloaded,

    #[error("operation timed out: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("operation canceled: {operation}")]
    Canceled { operation: String },

    #[error("stream store error for {device_id}: {reason}")]
    Stream { device_id: String, reason: String },

    #[error("repository error: {operation}: {reason}")]
    Repository { operation: String, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

/// Convenience type alias
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// The JSON-RPC error code this error surfaces as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            Self::TaskClosed { .. } | Self::InvalidTaskStateTransition { .. } => {
                ErrorCode::TaskNotCancelable
            }
            Self::PushNotificationsDisabled | Self::PushConfigNotFound { .. } => {
                ErrorCode::PushNotificationNotSupported
            }
            Self::StreamingDisabled
            | Self::UnsupportedOperation { .. }
            | Self::ToolNotFound { .. }
            | Self::DeviceNotFound { .. } => ErrorCode::UnsupportedOperation,
            Self::ContentTypeNotSupported { .. } => ErrorCode::ContentTypeNotSupported,
            Self::InvalidAgentResponse { .. } => ErrorCode::InvalidAgentResponse,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::InvalidParams { .. }
            | Self::DeviceAlreadyRegistered { .. }
            | Self::InvalidCapabilitySource { .. } => ErrorCode::InvalidParams,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            reason: error.to_string(),
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal {
            component: "io".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for BrokerError {
    fn from(error: tokio::task::JoinError) -> Self {
        let reason = if error.is_cancelled() {
            "task cancelled".to_string()
        } else if error.is_panic() {
            "task panicked".to_string()
        } else {
            error.to_string()
        };

        Self::Internal {
            component: "task".to_string(),
            reason,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(error: reqwest::Error) -> Self {
        Self::Internal {
            component: "http".to_string(),
            reason: error.to_string(),
        }
    }
}
