//! HTTP routes.
//!
//! One JSON-RPC POST endpoint dispatches every A2A method; streaming
//! methods answer with SSE, each event body a self-contained success
//! envelope. The agent card is served at the well-known path.

use axum::{
    extract::{Extension, State},
    response::{sse, IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use devgrid::{A2aHandler, HandlerOutcome, Principal};
use devgrid_a2a::{
    A2aRequest, ErrorCode, JsonRpcRequest, JsonRpcResponse, RequestId, StreamEvent,
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::error::{error_response, protocol_error, protocol_error_with};

/// Methods this endpoint dispatches.
const METHODS: &[&str] = &[
    "message/send",
    "message/stream",
    "tasks/get",
    "tasks/list",
    "tasks/cancel",
    "tasks/resubscribe",
    "tasks/pushNotificationConfig/set",
    "tasks/pushNotificationConfig/get",
    "tasks/pushNotificationConfig/list",
    "tasks/pushNotificationConfig/delete",
    "agent/getAuthenticatedExtendedCard",
];

/// State shared across all routes.
#[derive(Clone)]
pub struct ServerState {
    pub handler: A2aHandler,
    pub card: Arc<devgrid::card::CardService>,
}

pub fn create_routes(state: ServerState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_endpoint))
        .route("/.well-known/agent-card.json", get(agent_card))
        .route(
            "/agent/getAuthenticatedExtendedCard",
            post(authenticated_agent_card),
        )
        .with_state(state)
}

/// The single JSON-RPC endpoint.
///
/// Protocol-level failures come back as error envelopes in a 200
/// response; the HTTP status is reserved for transport concerns.
async fn rpc_endpoint(
    State(state): State<ServerState>,
    Extension(principal): Extension<Principal>,
    body: String,
) -> Response {
    let envelope: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) => return Json(protocol_error(None, ErrorCode::ParseError)).into_response(),
    };

    if envelope.jsonrpc != "2.0" {
        return Json(protocol_error_with(
            envelope.id,
            ErrorCode::InvalidRequest,
            "jsonrpc must be \"2.0\"",
        ))
        .into_response();
    }
    let Some(id) = envelope.id else {
        // Notifications are only meaningful on the push-delivery path.
        return Json(protocol_error_with(
            None,
            ErrorCode::InvalidRequest,
            "requests on this endpoint must carry an id",
        ))
        .into_response();
    };
    if !envelope.method.contains('/') {
        return Json(protocol_error_with(
            Some(id),
            ErrorCode::InvalidRequest,
            "method must be of the form category/action",
        ))
        .into_response();
    }
    if !METHODS.contains(&envelope.method.as_str()) {
        return Json(protocol_error_with(
            Some(id),
            ErrorCode::MethodNotFound,
            format!("unknown method: {}", envelope.method),
        ))
        .into_response();
    }

    let mut raw = serde_json::Map::new();
    raw.insert(
        "method".to_string(),
        serde_json::Value::String(envelope.method.clone()),
    );
    if let Some(params) = envelope.params {
        raw.insert("params".to_string(), params);
    }
    let request: A2aRequest = match serde_json::from_value(serde_json::Value::Object(raw)) {
        Ok(request) => request,
        Err(e) => {
            return Json(protocol_error_with(
                Some(id),
                ErrorCode::InvalidParams,
                e.to_string(),
            ))
            .into_response()
        }
    };

    match state.handler.handle(request, &principal).await {
        Ok(HandlerOutcome::Value(value)) => {
            Json(JsonRpcResponse::success(Some(id), value)).into_response()
        }
        Ok(HandlerOutcome::Stream(rx)) => event_stream(id, rx).into_response(),
        Err(e) => Json(error_response(Some(id), &e)).into_response(),
    }
}

/// SSE stream of success envelopes; closes after the first final event.
fn event_stream(
    id: RequestId,
    mut rx: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let is_final = event.is_final();
            let envelope = JsonRpcResponse::success(
                Some(id.clone()),
                serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
            );
            yield Ok(sse::Event::default()
                .data(serde_json::to_string(&envelope).unwrap_or_default()));
            if is_final {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// Public agent card at the well-known path.
async fn agent_card(State(state): State<ServerState>) -> Json<devgrid_a2a::AgentCard> {
    Json(state.card.current().as_ref().clone())
}

/// Authenticated card: the full document, including device skills.
async fn authenticated_agent_card(
    State(state): State<ServerState>,
    Extension(_principal): Extension<Principal>,
) -> Json<devgrid_a2a::AgentCard> {
    Json(state.card.current().as_ref().clone())
}
