//! Error mapping from the broker core to JSON-RPC envelopes.
//!
//! JSON-RPC-level failures ride back as error envelopes in a 200
//! response, per the single-endpoint binding; only transport concerns
//! (auth, unreadable bodies) surface as non-200 statuses.

use devgrid::BrokerError;
use devgrid_a2a::{ErrorCode, JsonRpcError, JsonRpcResponse, RequestId};

/// Envelope for a core error, carrying the taxonomy code and the
/// error's own message as detail.
pub fn error_response(id: Option<RequestId>, error: &BrokerError) -> JsonRpcResponse {
    JsonRpcResponse::error(
        id,
        JsonRpcError::with_message(error.error_code(), error.to_string()),
    )
}

/// Envelope for a protocol-level failure with the canonical message.
pub fn protocol_error(id: Option<RequestId>, code: ErrorCode) -> JsonRpcResponse {
    JsonRpcResponse::error(id, JsonRpcError::from_code(code))
}

/// Envelope for a protocol-level failure with a detail message.
pub fn protocol_error_with(
    id: Option<RequestId>,
    code: ErrorCode,
    message: impl Into<String>,
) -> JsonRpcResponse {
    JsonRpcResponse::error(id, JsonRpcError::with_message(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_map_to_taxonomy_codes() {
        let response = error_response(
            Some(RequestId::Integer(1)),
            &BrokerError::TaskNotFound {
                task_id: "t-1".into(),
            },
        );
        let error = response.error.expect("error envelope");
        assert_eq!(error.code, -32001);
        assert!(error.message.contains("t-1"));
        assert!(response.result.is_none());
    }

    #[test]
    fn protocol_errors_use_canonical_messages() {
        let response = protocol_error(None, ErrorCode::MethodNotFound);
        let error = response.error.expect("error envelope");
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
    }
}
