//! Agent card and discovery types.
//!
//! The card is the self-descriptive manifest an agent serves at the
//! well-known path: identity, transports, capability flags, security
//! scheme declarations, and the skill list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported A2A transport protocols.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransportProtocol {
    /// JSON-RPC 2.0 over HTTP.
    #[serde(rename = "JSONRPC")]
    #[default]
    JsonRpc,
    /// gRPC over HTTP/2.
    #[serde(rename = "GRPC")]
    Grpc,
    /// REST-style HTTP with JSON.
    #[serde(rename = "HTTP+JSON")]
    HttpJson,
}

/// A target URL and the transport protocol spoken there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInterface {
    pub transport: TransportProtocol,
    pub url: String,
}

/// Optional capabilities an agent may declare.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentCapabilities {
    /// Server-sent-event streaming responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    /// Asynchronous task updates via push callbacks.
    #[serde(skip_serializing_if = "Option::is_none", rename = "pushNotifications")]
    pub push_notifications: Option<bool>,
    /// Whether task state transitions are recorded in history.
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "stateTransitionHistory"
    )]
    pub state_transition_history: Option<bool>,
}

/// The organization behind an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProvider {
    pub organization: String,
    pub url: String,
}

/// A security scheme declaration for the card.
///
/// Only the schemes the broker actually advertises are modeled: API
/// keys and HTTP authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityScheme {
    ApiKey {
        /// Header, query, or cookie parameter name.
        name: String,
        /// Location of the key: `header`, `query`, or `cookie`.
        #[serde(rename = "in")]
        location: String,
    },
    Http {
        /// HTTP authentication scheme, e.g. `bearer`.
        scheme: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "bearerFormat")]
        bearer_format: Option<String>,
    },
}

/// A distinct capability the agent can perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Keywords describing what the skill covers.
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub examples: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", rename = "inputModes", default)]
    pub input_modes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", rename = "outputModes", default)]
    pub output_modes: Vec<String>,
}

impl AgentSkill {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            examples: Vec::new(),
            input_modes: Vec::new(),
            output_modes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_input_modes(mut self, modes: Vec<String>) -> Self {
        self.input_modes = modes;
        self
    }

    pub fn with_output_modes(mut self, modes: Vec<String>) -> Self {
        self.output_modes = modes;
        self
    }
}

/// The self-describing manifest for an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(rename = "protocolVersion", default = "default_protocol_version")]
    pub protocol_version: String,
    /// Preferred endpoint URL.
    pub url: String,
    #[serde(rename = "preferredTransport", default)]
    pub preferred_transport: TransportProtocol,
    pub capabilities: AgentCapabilities,
    #[serde(rename = "defaultInputModes")]
    pub default_input_modes: Vec<String>,
    #[serde(rename = "defaultOutputModes")]
    pub default_output_modes: Vec<String>,
    pub skills: Vec<AgentSkill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        rename = "additionalInterfaces",
        default
    )]
    pub additional_interfaces: Vec<AgentInterface>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "securitySchemes")]
    pub security_schemes: Option<HashMap<String, SecurityScheme>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "supportsAuthenticatedExtendedCard"
    )]
    pub supports_authenticated_extended_card: Option<bool>,
}

fn default_protocol_version() -> String {
    crate::PROTOCOL_VERSION.to_string()
}

impl AgentCard {
    /// Create a card with minimal required fields and text defaults.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            protocol_version: default_protocol_version(),
            url: url.into(),
            preferred_transport: TransportProtocol::default(),
            capabilities: AgentCapabilities::default(),
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
            skills: Vec::new(),
            provider: None,
            additional_interfaces: Vec::new(),
            security_schemes: None,
            supports_authenticated_extended_card: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.capabilities.streaming = Some(enabled);
        self
    }

    pub fn with_push_notifications(mut self, enabled: bool) -> Self {
        self.capabilities.push_notifications = Some(enabled);
        self
    }

    pub fn with_state_transition_history(mut self, enabled: bool) -> Self {
        self.capabilities.state_transition_history = Some(enabled);
        self
    }

    pub fn with_provider(
        mut self,
        organization: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.provider = Some(AgentProvider {
            organization: organization.into(),
            url: url.into(),
        });
        self
    }

    pub fn add_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn add_interface(mut self, transport: TransportProtocol, url: impl Into<String>) -> Self {
        self.additional_interfaces.push(AgentInterface {
            transport,
            url: url.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_defaults() {
        let card = AgentCard::new("devgrid", "device broker", "0.2.0", "http://localhost:7420");
        assert_eq!(card.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(card.preferred_transport, TransportProtocol::JsonRpc);
        assert_eq!(card.default_input_modes, vec!["text/plain"]);
    }

    #[test]
    fn card_builder_flags() {
        let card = AgentCard::new("devgrid", "broker", "0.2.0", "http://localhost:7420")
            .with_streaming(true)
            .with_push_notifications(true)
            .with_state_transition_history(true);
        assert_eq!(card.capabilities.streaming, Some(true));
        assert_eq!(card.capabilities.push_notifications, Some(true));
        assert_eq!(card.capabilities.state_transition_history, Some(true));
    }

    #[test]
    fn transport_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransportProtocol::JsonRpc).unwrap(),
            "\"JSONRPC\""
        );
        assert_eq!(
            serde_json::to_string(&TransportProtocol::HttpJson).unwrap(),
            "\"HTTP+JSON\""
        );
    }

    #[test]
    fn skill_serializes_camel_case() {
        let skill = AgentSkill::new("device-cam-1", "cam-1 tools")
            .with_tags(vec!["photo".into(), "picture".into()])
            .with_output_modes(vec!["image/jpeg".into()]);
        let json = serde_json::to_value(&skill).unwrap();
        assert_eq!(json["outputModes"][0], "image/jpeg");
        assert_eq!(json["tags"][0], "photo");
    }
}
