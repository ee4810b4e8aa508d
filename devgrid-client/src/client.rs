//! HTTP client for calling remote A2A agents.

use crate::error::{ClientError, ClientResult};
use devgrid_a2a::{
    AgentCard, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageSendParams, RequestId,
    SendMessageResult, Task, TaskIdParams, TaskQueryParams, AGENT_CARD_PATH,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How many times a transport-level failure is retried before giving up.
const MAX_TRANSPORT_RETRIES: u32 = 3;
/// Base delay between retries; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Delivery health of one remote endpoint.
///
/// The intent router reads this when breaking ties between candidate
/// agents: a recently successful endpoint wins over a stale one.
#[derive(Debug, Clone, Default)]
pub struct EndpointHealth {
    /// When the last call to this endpoint succeeded.
    pub last_success: Option<Instant>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

/// A client bound to one remote A2A agent.
///
/// Construct it either from a base URL (the agent card is fetched from
/// the well-known path and its `url` field becomes the service
/// endpoint) or directly from a card already in hand.
#[derive(Clone, Debug)]
pub struct AgentClient {
    http: Client,
    endpoint_url: String,
    auth_token: Option<String>,
    request_counter: Arc<AtomicU64>,
    card: Arc<AgentCard>,
    health: Arc<Mutex<EndpointHealth>>,
}

impl AgentClient {
    /// Discover the agent card at `{base_url}/.well-known/agent-card.json`
    /// and bind to the service endpoint it declares.
    pub async fn discover(base_url: impl AsRef<str>) -> ClientResult<Self> {
        Self::discover_with_client(base_url, Client::new()).await
    }

    /// Same as [`discover`](Self::discover), with a caller-configured
    /// `reqwest::Client` (timeouts, proxies, TLS).
    pub async fn discover_with_client(
        base_url: impl AsRef<str>,
        http: Client,
    ) -> ClientResult<Self> {
        let base = base_url.as_ref().trim_end_matches('/');
        let card_url = format!("{base}/{AGENT_CARD_PATH}");

        let response = http
            .get(&card_url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ClientError::Network {
                message: format!("failed to fetch agent card from {card_url}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Network {
                message: format!("agent card fetch returned HTTP {}", response.status()),
            });
        }

        let card: AgentCard = response.json().await.map_err(|e| ClientError::NonConformant {
            message: format!("failed to parse agent card: {e}"),
        })?;

        Self::from_card_with_client(card, http)
    }

    /// Bind to an agent card already in hand.
    pub fn from_card(card: AgentCard) -> ClientResult<Self> {
        Self::from_card_with_client(card, Client::new())
    }

    pub fn from_card_with_client(card: AgentCard, http: Client) -> ClientResult<Self> {
        if card.url.is_empty() {
            return Err(ClientError::InvalidParameter {
                message: "agent card declares no service endpoint url".to_string(),
            });
        }
        Ok(Self {
            http,
            endpoint_url: card.url.clone(),
            auth_token: None,
            request_counter: Arc::new(AtomicU64::new(1)),
            card: Arc::new(card),
            health: Arc::new(Mutex::new(EndpointHealth::default())),
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// The card this client was bound to.
    pub fn agent_card(&self) -> &AgentCard {
        &self.card
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Snapshot of the endpoint's delivery health.
    pub fn health(&self) -> EndpointHealth {
        self.health.lock().expect("health lock poisoned").clone()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.request_counter.fetch_add(1, Ordering::Relaxed) as i64)
    }

    fn record_success(&self) {
        let mut health = self.health.lock().expect("health lock poisoned");
        health.last_success = Some(Instant::now());
        health.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut health = self.health.lock().expect("health lock poisoned");
        health.consecutive_failures += 1;
    }

    /// Forward a message to the remote agent.
    ///
    /// Nonconformant payloads surface as [`ClientError::NonConformant`],
    /// which the broker maps to `InvalidAgentResponse`.
    pub async fn send_message(&self, params: MessageSendParams) -> ClientResult<SendMessageResult> {
        self.call("message/send", params).await
    }

    /// Fetch a task from the remote agent.
    pub async fn get_task(&self, params: TaskQueryParams) -> ClientResult<Task> {
        self.call("tasks/get", params).await
    }

    /// Cancel a task on the remote agent.
    pub async fn cancel_task(&self, params: TaskIdParams) -> ClientResult<Task> {
        self.call("tasks/cancel", params).await
    }

    /// One JSON-RPC call with transport-level retry.
    ///
    /// Only network failures retry; a JSON-RPC error envelope is a
    /// definitive answer from the agent and is returned immediately.
    async fn call<P, R>(&self, method: &str, params: P) -> ClientResult<R>
    where
        P: Serialize + Clone,
        R: DeserializeOwned,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err = None;

        for attempt in 0..MAX_TRANSPORT_RETRIES {
            match self.call_once(method, params.clone()).await {
                Ok(result) => {
                    self.record_success();
                    return Ok(result);
                }
                Err(err @ ClientError::Network { .. }) => {
                    self.record_failure();
                    tracing::warn!(
                        method,
                        attempt,
                        error = %err,
                        "transport error calling remote agent, retrying"
                    );
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    self.record_failure();
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or(ClientError::Network {
            message: format!("{method} failed with no recorded error"),
        }))
    }

    async fn call_once<P, R>(&self, method: &str, params: P) -> ClientResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request_id = self.next_request_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
            id: Some(request_id),
        };

        let mut builder = self
            .http
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request);

        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| ClientError::Network {
            message: format!("failed to send {method} request: {e}"),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ClientError::Network {
            message: format!("failed to read {method} response body: {e}"),
        })?;

        let envelope: JsonRpcResponse =
            serde_json::from_str(&body).map_err(|e| ClientError::NonConformant {
                message: format!("{method} response is not a JSON-RPC envelope ({status}): {e}"),
            })?;

        if let Some(JsonRpcError { code, message, .. }) = envelope.error {
            return Err(ClientError::RemoteAgent {
                message,
                code: Some(code),
            });
        }

        let result = envelope.result.ok_or_else(|| ClientError::NonConformant {
            message: format!("{method} response carries neither result nor error"),
        })?;

        serde_json::from_value(result).map_err(|e| ClientError::NonConformant {
            message: format!("{method} result does not match the expected shape: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(url: &str) -> AgentCard {
        AgentCard::new("remote", "remote test agent", "1.0.0", url)
    }

    #[test]
    fn from_card_requires_endpoint_url() {
        let err = AgentClient::from_card(card("")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidParameter { .. }));

        let client = AgentClient::from_card(card("http://localhost:9000/rpc")).unwrap();
        assert_eq!(client.endpoint_url(), "http://localhost:9000/rpc");
    }

    #[test]
    fn request_ids_increase() {
        let client = AgentClient::from_card(card("http://localhost:9000/rpc")).unwrap();
        assert_eq!(client.next_request_id(), RequestId::Integer(1));
        assert_eq!(client.next_request_id(), RequestId::Integer(2));
    }

    #[test]
    fn health_tracks_failures_until_success() {
        let client = AgentClient::from_card(card("http://localhost:9000/rpc")).unwrap();
        client.record_failure();
        client.record_failure();
        assert_eq!(client.health().consecutive_failures, 2);
        assert!(client.health().last_success.is_none());

        client.record_success();
        assert_eq!(client.health().consecutive_failures, 0);
        assert!(client.health().last_success.is_some());
    }
}
