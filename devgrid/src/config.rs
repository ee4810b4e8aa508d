//! Broker configuration.
//!
//! Every tunable lives here with its default; deployments override
//! through a deserialized config file, `DEVGRID_*` environment
//! variables, or both (environment wins).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a broker instance.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    pub service: ServiceIdentity,
    pub capabilities: CapabilityFlags,
    pub liveness: LivenessConfig,
    pub scan: ScanConfig,
    pub streams: StreamConfig,
    pub router: RouterConfig,
    pub workers: WorkerConfig,
    pub timeouts: TimeoutConfig,
}

/// Who this broker says it is on its agent card.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceIdentity {
    pub name: String,
    pub description: String,
    pub version: String,
    /// Public base URL clients reach the broker at.
    pub base_url: String,
    pub organization: Option<String>,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "devgrid".to_string(),
            description: "Broker between device fleets and A2A agents".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            base_url: "http://localhost:7420".to_string(),
            organization: None,
        }
    }
}

/// Optional protocol capabilities advertised on the card.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapabilityFlags {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            streaming: true,
            push_notifications: true,
            state_transition_history: false,
        }
    }
}

/// Device liveness windows.
///
/// A device with no heartbeat for `heartbeat_grace` is `unknown`; after
/// twice that, `offline`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub heartbeat_grace_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace_secs: 90,
            sweep_interval_secs: 15,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The periodic device-stream scan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_secs: u64,
    /// Entries read per device per sweep.
    pub batch_limit: usize,
    /// Devices visited per sweep.
    pub max_devices: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            batch_limit: 50,
            max_devices: 10,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Stream store storage policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Payloads at or below this size stay inline with the entry.
    pub inline_threshold_bytes: usize,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    /// Root directory for external payloads.
    pub blob_root: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: 1024 * 1024,
            retention_hours: 24,
            sweep_interval_secs: 300,
            blob_root: PathBuf::from("./data/stream-blobs"),
        }
    }
}

impl StreamConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Intent router thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Decisions below this confidence downgrade to a clarification
    /// request.
    pub confidence_threshold: f64,
    /// Keyword overlaps needed for the fast path.
    pub keyword_min_overlap: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            keyword_min_overlap: 1,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Zero means derive from the CPU count (minimum 4).
    pub count: usize,
    pub queue_depth: usize,
    pub submit_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            queue_depth: 64,
            submit_grace_secs: 2,
        }
    }
}

impl WorkerConfig {
    /// Effective worker count.
    pub fn effective_count(&self) -> usize {
        if self.count > 0 {
            return self.count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(4)
    }

    pub fn submit_grace(&self) -> Duration {
        Duration::from_secs(self.submit_grace_secs)
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub blocking_request_secs: u64,
    pub llm_call_secs: u64,
    pub tool_call_secs: u64,
    pub push_attempt_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            blocking_request_secs: 60,
            llm_call_secs: 30,
            tool_call_secs: 60,
            push_attempt_secs: 15,
        }
    }
}

impl TimeoutConfig {
    pub fn blocking_request(&self) -> Duration {
        Duration::from_secs(self.blocking_request_secs)
    }

    pub fn llm_call(&self) -> Duration {
        Duration::from_secs(self.llm_call_secs)
    }

    pub fn tool_call(&self) -> Duration {
        Duration::from_secs(self.tool_call_secs)
    }

    pub fn push_attempt(&self) -> Duration {
        Duration::from_secs(self.push_attempt_secs)
    }
}

impl BrokerConfig {
    /// Apply `DEVGRID_*` environment overrides on top of the current
    /// values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(name) = std::env::var("DEVGRID_SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(url) = std::env::var("DEVGRID_BASE_URL") {
            self.service.base_url = url;
        }
        if let Ok(v) = std::env::var("DEVGRID_HEARTBEAT_GRACE_SECS") {
            if let Ok(secs) = v.parse() {
                self.liveness.heartbeat_grace_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DEVGRID_SCAN_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.scan.interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DEVGRID_RETENTION_HOURS") {
            if let Ok(hours) = v.parse() {
                self.streams.retention_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("DEVGRID_BLOB_ROOT") {
            self.streams.blob_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DEVGRID_WORKER_COUNT") {
            if let Ok(count) = v.parse() {
                self.workers.count = count;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = BrokerConfig::default();
        assert_eq!(config.liveness.heartbeat_grace_secs, 90);
        assert_eq!(config.scan.interval_secs, 30);
        assert_eq!(config.streams.inline_threshold_bytes, 1024 * 1024);
        assert_eq!(config.streams.retention_hours, 24);
        assert_eq!(config.router.confidence_threshold, 0.5);
        assert_eq!(config.timeouts.blocking_request_secs, 60);
        assert!(config.workers.effective_count() >= 4);
    }

    #[test]
    fn partial_config_deserializes() {
        let config: BrokerConfig = serde_json::from_str(
            r#"{ "service": { "name": "edge-broker" }, "scan": { "interval_secs": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.service.name, "edge-broker");
        assert_eq!(config.scan.interval_secs, 5);
        assert_eq!(config.liveness.heartbeat_grace_secs, 90);
    }
}
