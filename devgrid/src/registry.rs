//! Device registry.
//!
//! The authoritative in-memory index of attached devices and their tool
//! surfaces. All mutations go through the registry, write through to
//! the repository, and poke the manifest notifier so the agent card is
//! rebuilt.

use crate::config::LivenessConfig;
use crate::errors::{BrokerError, BrokerResult};
use crate::ports::{DeviceConnector, Repository, ToolDescriptor};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Liveness of a device, driven by heartbeats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Unknown,
    Offline,
}

impl Liveness {
    /// Sort rank for intent matching: online first.
    fn rank(self) -> u8 {
        match self {
            Liveness::Online => 0,
            Liveness::Unknown => 1,
            Liveness::Offline => 2,
        }
    }
}

/// An attached device and its declared tool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    /// Device kind tag, e.g. `camera` or `sensor`.
    pub kind: String,
    /// Opaque capability-source reference, resolved by the connector.
    pub capability_source: String,
    pub tools: Vec<ToolDescriptor>,
    /// Keywords the intent router matches requests against.
    pub intent_keywords: Vec<String>,
    /// Optional prompt guiding the LLM when routing this device's
    /// stream data.
    pub system_prompt: Option<String>,
    /// MIME types this device's tools can produce.
    pub output_modes: Vec<String>,
    pub last_seen: DateTime<Utc>,
    pub liveness: Liveness,
}

impl Device {
    pub fn tool(&self, tool_id: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.tool_id == tool_id)
    }
}

/// What a caller supplies to register a device; the tool list is
/// ingested from the capability source, not declared here.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    pub device_id: String,
    pub name: String,
    pub kind: String,
    pub capability_source: String,
    #[serde(default)]
    pub intent_keywords: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub output_modes: Vec<String>,
}

/// Mutable fields of a registered device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub intent_keywords: Option<Vec<String>>,
    pub system_prompt: Option<Option<String>>,
    pub output_modes: Option<Vec<String>>,
}

/// Read filter for [`DeviceRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub kind: Option<String>,
    pub online_only: bool,
}

pub struct DeviceRegistry {
    devices: DashMap<String, Device>,
    connector: Arc<dyn DeviceConnector>,
    repository: Arc<dyn Repository>,
    /// Poked on every mutation that affects the agent card.
    manifest_dirty: Arc<Notify>,
    liveness: LivenessConfig,
}

impl DeviceRegistry {
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        repository: Arc<dyn Repository>,
        manifest_dirty: Arc<Notify>,
        liveness: LivenessConfig,
    ) -> Self {
        Self {
            devices: DashMap::new(),
            connector,
            repository,
            manifest_dirty,
            liveness,
        }
    }

    /// Restore persisted devices into the in-memory index.
    pub async fn load(&self) -> BrokerResult<usize> {
        let devices = self.repository.load_devices().await?;
        let count = devices.len();
        for device in devices {
            self.devices.insert(device.device_id.clone(), device);
        }
        if count > 0 {
            self.manifest_dirty.notify_one();
        }
        tracing::info!(count, "restored devices from repository");
        Ok(count)
    }

    /// Register a device, probing its capability source for the real
    /// tool list.
    ///
    /// Re-registering the same device refreshes it in place, so
    /// registration is idempotent modulo the tool-list diff. A second
    /// registration under the same id but a different capability source
    /// is rejected.
    pub async fn register(&self, spec: DeviceSpec) -> BrokerResult<Device> {
        if let Some(existing) = self.devices.get(&spec.device_id) {
            if existing.capability_source != spec.capability_source {
                return Err(BrokerError::DeviceAlreadyRegistered {
                    device_id: spec.device_id,
                });
            }
        }

        let tools = self
            .connector
            .discover_tools(&spec.capability_source)
            .await
            .map_err(|e| BrokerError::InvalidCapabilitySource {
                device_id: spec.device_id.clone(),
                reason: e.to_string(),
            })?;

        let device = Device {
            device_id: spec.device_id,
            name: spec.name,
            kind: spec.kind,
            capability_source: spec.capability_source,
            tools,
            intent_keywords: spec.intent_keywords,
            system_prompt: spec.system_prompt,
            output_modes: spec.output_modes,
            last_seen: Utc::now(),
            liveness: Liveness::Online,
        };

        self.repository.save_device(&device).await?;
        self.devices
            .insert(device.device_id.clone(), device.clone());
        self.manifest_dirty.notify_one();
        tracing::info!(
            device_id = %device.device_id,
            tools = device.tools.len(),
            "registered device"
        );
        Ok(device)
    }

    /// Remove a device. In-flight tasks bound to it are the caller's
    /// concern (the broker fails them with `DeviceGone`).
    pub async fn deregister(&self, device_id: &str) -> BrokerResult<Device> {
        let (_, device) =
            self.devices
                .remove(device_id)
                .ok_or_else(|| BrokerError::DeviceNotFound {
                    device_id: device_id.to_string(),
                })?;
        self.repository.delete_device(device_id).await?;
        self.manifest_dirty.notify_one();
        tracing::info!(device_id, "deregistered device");
        Ok(device)
    }

    /// Refresh a device's last-seen timestamp, reviving it if it had
    /// gone unknown or offline.
    pub async fn heartbeat(&self, device_id: &str) -> BrokerResult<()> {
        let device = {
            let mut entry =
                self.devices
                    .get_mut(device_id)
                    .ok_or_else(|| BrokerError::DeviceNotFound {
                        device_id: device_id.to_string(),
                    })?;
            let was = entry.liveness;
            entry.last_seen = Utc::now();
            entry.liveness = Liveness::Online;
            if was != Liveness::Online {
                self.manifest_dirty.notify_one();
                tracing::debug!(device_id, from = ?was, "device back online");
            }
            entry.clone()
        };
        self.repository.save_device(&device).await
    }

    /// Patch the mutable fields of a device.
    pub async fn update(&self, device_id: &str, patch: DevicePatch) -> BrokerResult<Device> {
        let device = {
            let mut entry =
                self.devices
                    .get_mut(device_id)
                    .ok_or_else(|| BrokerError::DeviceNotFound {
                        device_id: device_id.to_string(),
                    })?;
            if let Some(name) = patch.name {
                entry.name = name;
            }
            if let Some(keywords) = patch.intent_keywords {
                entry.intent_keywords = keywords;
            }
            if let Some(prompt) = patch.system_prompt {
                entry.system_prompt = prompt;
            }
            if let Some(modes) = patch.output_modes {
                entry.output_modes = modes;
            }
            entry.clone()
        };
        self.repository.save_device(&device).await?;
        self.manifest_dirty.notify_one();
        Ok(device)
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    pub fn list(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.devices
            .iter()
            .map(|d| d.value().clone())
            .filter(|d| filter.kind.as_deref().map_or(true, |k| d.kind == k))
            .filter(|d| !filter.online_only || d.liveness == Liveness::Online)
            .collect()
    }

    /// All devices, for router snapshots.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.value().clone()).collect()
    }

    /// Candidate devices for a set of intent keywords.
    ///
    /// Offline devices and devices with no keyword overlap are
    /// excluded. Ordering: overlap count, then liveness (online first),
    /// then most recent heartbeat.
    pub fn match_by_intent(&self, keywords: &[String], kind: Option<&str>) -> Vec<Device> {
        let wanted: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut matches: Vec<(usize, Device)> = self
            .devices
            .iter()
            .map(|d| d.value().clone())
            .filter(|d| d.liveness != Liveness::Offline)
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .filter_map(|d| {
                let overlap = d
                    .intent_keywords
                    .iter()
                    .filter(|k| wanted.contains(&k.to_lowercase()))
                    .count();
                (overlap > 0).then_some((overlap, d))
            })
            .collect();

        matches.sort_by(|(overlap_a, a), (overlap_b, b)| {
            overlap_b
                .cmp(overlap_a)
                .then(a.liveness.rank().cmp(&b.liveness.rank()))
                .then(b.last_seen.cmp(&a.last_seen))
        });
        matches.into_iter().map(|(_, d)| d).collect()
    }

    /// Apply the liveness policy to every device: no heartbeat for the
    /// grace window demotes to unknown, for twice the window to offline.
    pub async fn sweep_liveness(&self) -> BrokerResult<()> {
        let grace = chrono::Duration::from_std(self.liveness.heartbeat_grace())
            .unwrap_or_else(|_| chrono::Duration::seconds(90));
        let now = Utc::now();
        let mut changed = Vec::new();

        for mut entry in self.devices.iter_mut() {
            let silent_for = now - entry.last_seen;
            let next = if silent_for > grace * 2 {
                Liveness::Offline
            } else if silent_for > grace {
                Liveness::Unknown
            } else {
                Liveness::Online
            };
            if next != entry.liveness {
                tracing::info!(
                    device_id = %entry.device_id,
                    from = ?entry.liveness,
                    to = ?next,
                    "device liveness transition"
                );
                entry.liveness = next;
                changed.push(entry.clone());
            }
        }

        if !changed.is_empty() {
            for device in &changed {
                self.repository.save_device(device).await?;
            }
            self.manifest_dirty.notify_one();
        }
        Ok(())
    }

    /// Background loop applying [`sweep_liveness`](Self::sweep_liveness)
    /// until shutdown.
    pub async fn run_liveness_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.liveness.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_liveness().await {
                        tracing::error!(error = %e, "liveness sweep failed");
                    }
                }
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
