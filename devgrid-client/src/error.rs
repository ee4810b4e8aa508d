use thiserror::Error;

/// Errors raised while talking to a remote A2A agent.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a usable HTTP response.
    #[error("network error: {message}")]
    Network { message: String },

    /// The remote agent answered, but the payload did not conform to
    /// the protocol.
    #[error("nonconformant agent response: {message}")]
    NonConformant { message: String },

    /// The remote agent returned a JSON-RPC error envelope.
    #[error("remote agent error ({code:?}): {message}")]
    RemoteAgent { message: String, code: Option<i32> },

    /// Bad input on our side, e.g. a card without a service URL.
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::Network {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        ClientError::NonConformant {
            message: error.to_string(),
        }
    }
}
