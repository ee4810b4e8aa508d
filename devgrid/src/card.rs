//! Capability manifest builder.
//!
//! Derives the public agent card from the service identity and the
//! current registry state, and keeps a cached copy that readers swap in
//! atomically. Rebuilds are coalesced: mutations poke a notifier, and a
//! single background loop rebuilds at most once per wakeup, so readers
//! never observe a partially built document.

use crate::config::{BrokerConfig, CapabilityFlags, ServiceIdentity};
use crate::registry::{Device, DeviceFilter, DeviceRegistry};
use devgrid_a2a::{AgentCard, AgentSkill, SecurityScheme, TransportProtocol};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Notify};

/// Identifier of the built-in conversational skill.
pub const BASIC_CHAT_SKILL: &str = "basic-chat";

pub struct CardService {
    identity: ServiceIdentity,
    capabilities: CapabilityFlags,
    card: RwLock<Arc<AgentCard>>,
    dirty: Arc<Notify>,
}

impl CardService {
    /// Create the service with an empty-skill card; call
    /// [`rebuild`](Self::rebuild) once wiring is complete.
    pub fn new(config: &BrokerConfig, dirty: Arc<Notify>) -> Self {
        let identity = config.service.clone();
        let capabilities = config.capabilities.clone();
        let initial = build_card(&identity, &capabilities, &[]);
        Self {
            identity,
            capabilities,
            card: RwLock::new(Arc::new(initial)),
            dirty,
        }
    }

    /// The current card. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<AgentCard> {
        self.card.read().expect("card lock poisoned").clone()
    }

    /// Request an asynchronous rebuild.
    pub fn invalidate(&self) {
        self.dirty.notify_one();
    }

    /// Rebuild the card from the registry and swap it in.
    pub fn rebuild(&self, registry: &DeviceRegistry) {
        let online = registry.list(&DeviceFilter {
            kind: None,
            online_only: true,
        });
        let card = build_card(&self.identity, &self.capabilities, &online);
        *self.card.write().expect("card lock poisoned") = Arc::new(card);
        tracing::debug!(skills = online.len() + 1, "agent card rebuilt");
    }

    /// Background loop: rebuild whenever the registry marks the
    /// manifest dirty. Wakeups arriving mid-rebuild coalesce into one
    /// pending rebuild.
    pub async fn run(
        self: Arc<Self>,
        registry: Arc<DeviceRegistry>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = self.dirty.notified() => self.rebuild(&registry),
                changed = shutdown.changed() => {
                    // A closed channel means the broker is gone; stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn build_card(
    identity: &ServiceIdentity,
    capabilities: &CapabilityFlags,
    online_devices: &[Device],
) -> AgentCard {
    let mut card = AgentCard::new(
        identity.name.clone(),
        identity.description.clone(),
        identity.version.clone(),
        identity.base_url.clone(),
    )
    .with_streaming(capabilities.streaming)
    .with_push_notifications(capabilities.push_notifications)
    .with_state_transition_history(capabilities.state_transition_history)
    .add_skill(
        AgentSkill::new(BASIC_CHAT_SKILL, "Basic Chat")
            .with_description("General conversation and Q&A")
            .with_tags(vec![
                "chat".to_string(),
                "conversation".to_string(),
                "qa".to_string(),
            ]),
    );

    if let Some(org) = &identity.organization {
        card = card.with_provider(org.clone(), identity.base_url.clone());
    }

    card.supports_authenticated_extended_card = Some(true);
    card.security_schemes = Some(HashMap::from([(
        "bearer".to_string(),
        SecurityScheme::Http {
            scheme: "bearer".to_string(),
            bearer_format: None,
        },
    )]));
    card.additional_interfaces.push(devgrid_a2a::AgentInterface {
        transport: TransportProtocol::JsonRpc,
        url: identity.base_url.clone(),
    });

    for device in online_devices {
        card = card.add_skill(device_skill(device));
    }
    card
}

/// One synthesized skill per online device.
fn device_skill(device: &Device) -> AgentSkill {
    let tool_summary = device
        .tools
        .iter()
        .map(|t| {
            if t.description.is_empty() {
                t.tool_id.clone()
            } else {
                format!("{}: {}", t.tool_id, t.description)
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    let description = format!(
        "Tools exposed by device {} ({}, {}). {}",
        device.device_id, device.name, device.kind, tool_summary
    );

    let output_modes = if device.output_modes.is_empty() {
        vec!["text/plain".to_string()]
    } else {
        device.output_modes.clone()
    };

    AgentSkill::new(format!("device-{}", device.device_id), device.name.clone())
        .with_description(description)
        .with_tags(device.intent_keywords.clone())
        .with_input_modes(vec!["text/plain".to_string()])
        .with_output_modes(output_modes)
}
