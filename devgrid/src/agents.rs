//! External agent endpoints.
//!
//! The table of peer A2A services the broker may delegate to. Managed
//! out-of-band (operator API or config), persisted through the
//! repository, and consumed by the intent router for candidate
//! selection and by the handler for the actual outbound call.

use crate::errors::{BrokerError, BrokerResult};
use crate::ports::Repository;
use dashmap::DashMap;
use devgrid_client::{AgentClient, EndpointHealth};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One delegation target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub agent_id: String,
    /// Base URL; the agent card is discovered beneath it.
    pub url: String,
    /// Tags describing what the agent is good at.
    #[serde(default)]
    pub capability_tags: Vec<String>,
    /// Bearer token for outbound calls, when required.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub struct EndpointRegistry {
    endpoints: DashMap<String, AgentEndpoint>,
    /// Lazily discovered clients, one per endpoint.
    clients: DashMap<String, AgentClient>,
    repository: Arc<dyn Repository>,
}

impl EndpointRegistry {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            endpoints: DashMap::new(),
            clients: DashMap::new(),
            repository,
        }
    }

    pub async fn load(&self) -> BrokerResult<usize> {
        let endpoints = self.repository.load_endpoints().await?;
        let count = endpoints.len();
        for endpoint in endpoints {
            self.endpoints.insert(endpoint.agent_id.clone(), endpoint);
        }
        Ok(count)
    }

    pub async fn upsert(&self, endpoint: AgentEndpoint) -> BrokerResult<()> {
        self.repository.save_endpoint(&endpoint).await?;
        // A URL or token change invalidates any cached client.
        self.clients.remove(&endpoint.agent_id);
        self.endpoints.insert(endpoint.agent_id.clone(), endpoint);
        Ok(())
    }

    pub async fn remove(&self, agent_id: &str) -> BrokerResult<()> {
        self.repository.delete_endpoint(agent_id).await?;
        self.endpoints.remove(agent_id);
        self.clients.remove(agent_id);
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentEndpoint> {
        self.endpoints.get(agent_id).map(|e| e.clone())
    }

    /// Enabled endpoints, for router snapshots.
    pub fn enabled(&self) -> Vec<AgentEndpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Delivery health for an endpoint; default (never called) when no
    /// client exists yet.
    pub fn health(&self, agent_id: &str) -> EndpointHealth {
        self.clients
            .get(agent_id)
            .map(|c| c.health())
            .unwrap_or_default()
    }

    /// Client for an endpoint, discovering the remote agent card on
    /// first use.
    pub async fn client_for(&self, agent_id: &str) -> BrokerResult<AgentClient> {
        if let Some(client) = self.clients.get(agent_id) {
            return Ok(client.clone());
        }

        let endpoint = self
            .get(agent_id)
            .ok_or_else(|| BrokerError::AgentEndpointNotFound {
                agent_id: agent_id.to_string(),
            })?;
        if !endpoint.enabled {
            return Err(BrokerError::AgentEndpointNotFound {
                agent_id: agent_id.to_string(),
            });
        }

        let mut client = AgentClient::discover(&endpoint.url).await.map_err(|e| {
            BrokerError::DelegationFailed {
                agent_id: agent_id.to_string(),
                reason: format!("agent card discovery failed: {e}"),
            }
        })?;
        if let Some(token) = &endpoint.auth_token {
            client = client.with_auth_token(token.clone());
        }
        self.clients.insert(agent_id.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryRepository;

    fn endpoint(agent_id: &str, tags: &[&str], enabled: bool) -> AgentEndpoint {
        AgentEndpoint {
            agent_id: agent_id.to_string(),
            url: format!("http://{agent_id}.example"),
            capability_tags: tags.iter().map(|t| t.to_string()).collect(),
            auth_token: None,
            enabled,
        }
    }

    #[tokio::test]
    async fn enabled_filters_disabled_endpoints() {
        let registry = EndpointRegistry::new(Arc::new(InMemoryRepository::new()));
        registry
            .upsert(endpoint("translator", &["translation"], true))
            .await
            .unwrap();
        registry
            .upsert(endpoint("archived", &["storage"], false))
            .await
            .unwrap();

        let enabled = registry.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].agent_id, "translator");
    }

    #[tokio::test]
    async fn endpoints_survive_reload() {
        let repo = Arc::new(InMemoryRepository::new());
        {
            let registry = EndpointRegistry::new(repo.clone());
            registry
                .upsert(endpoint("translator", &["translation"], true))
                .await
                .unwrap();
        }
        let restored = EndpointRegistry::new(repo);
        assert_eq!(restored.load().await.unwrap(), 1);
        assert!(restored.get("translator").is_some());
    }

    #[tokio::test]
    async fn unknown_endpoint_has_default_health() {
        let registry = EndpointRegistry::new(Arc::new(InMemoryRepository::new()));
        let health = registry.health("nope");
        assert!(health.last_success.is_none());
        assert_eq!(health.consecutive_failures, 0);
    }
}
