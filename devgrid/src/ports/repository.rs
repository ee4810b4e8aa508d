//! Repository port.
//!
//! Durable storage behind the broker: devices, tasks, push configs,
//! stream high-water marks, and external agent endpoints. Owners write
//! through on every mutation; on startup the store is the source of
//! truth. The engine behind the trait is a deployment choice.

use crate::agents::AgentEndpoint;
use crate::errors::BrokerResult;
use crate::registry::Device;
use async_trait::async_trait;
use dashmap::DashMap;
use devgrid_a2a::{PushNotificationConfig, Task};
use serde::{Deserialize, Serialize};

/// Identifies the stream entry a scan-loop task originated from.
///
/// Task creation is deduplicated on this key, which is what makes the
/// scan loop's at-least-once dispatch safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamOrigin {
    pub device_id: String,
    pub seq: u64,
}

/// A task as persisted: the protocol object plus broker-side bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    /// Set when the task was raised by the scan loop.
    pub origin: Option<StreamOrigin>,
    /// Device currently executing this task, if any.
    pub device_binding: Option<String>,
}

/// Durable storage port.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_device(&self, device: &Device) -> BrokerResult<()>;
    /// Remove a device, leaving a tombstone so a restart does not
    /// resurrect it.
    async fn delete_device(&self, device_id: &str) -> BrokerResult<()>;
    async fn load_devices(&self) -> BrokerResult<Vec<Device>>;

    async fn save_task(&self, record: &TaskRecord) -> BrokerResult<()>;
    async fn load_task(&self, task_id: &str) -> BrokerResult<Option<TaskRecord>>;
    async fn load_tasks(&self) -> BrokerResult<Vec<TaskRecord>>;
    /// Task ids in a context, unordered.
    async fn find_tasks_by_context(&self, context_id: &str) -> BrokerResult<Vec<String>>;
    /// The task raised for a stream origin, if one exists.
    async fn find_task_by_origin(&self, origin: &StreamOrigin) -> BrokerResult<Option<String>>;

    async fn save_push_config(
        &self,
        task_id: &str,
        config: &PushNotificationConfig,
    ) -> BrokerResult<()>;
    async fn load_push_configs(&self, task_id: &str) -> BrokerResult<Vec<PushNotificationConfig>>;
    async fn delete_push_config(&self, task_id: &str, config_id: &str) -> BrokerResult<()>;

    /// Highest stream seq already dispatched for a device (0 = none).
    async fn stream_watermark(&self, device_id: &str) -> BrokerResult<u64>;
    async fn set_stream_watermark(&self, device_id: &str, seq: u64) -> BrokerResult<()>;

    async fn save_endpoint(&self, endpoint: &AgentEndpoint) -> BrokerResult<()>;
    async fn delete_endpoint(&self, agent_id: &str) -> BrokerResult<()>;
    async fn load_endpoints(&self) -> BrokerResult<Vec<AgentEndpoint>>;
}

/// In-memory repository for tests, examples, and single-process
/// deployments that can afford to lose state.
#[derive(Default)]
pub struct InMemoryRepository {
    devices: DashMap<String, Device>,
    device_tombstones: DashMap<String, ()>,
    tasks: DashMap<String, TaskRecord>,
    origins: DashMap<StreamOrigin, String>,
    push_configs: DashMap<String, Vec<PushNotificationConfig>>,
    watermarks: DashMap<String, u64>,
    endpoints: DashMap<String, AgentEndpoint>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_device(&self, device: &Device) -> BrokerResult<()> {
        self.device_tombstones.remove(&device.device_id);
        self.devices.insert(device.device_id.clone(), device.clone());
        Ok(())
    }

    async fn delete_device(&self, device_id: &str) -> BrokerResult<()> {
        self.devices.remove(device_id);
        self.device_tombstones.insert(device_id.to_string(), ());
        Ok(())
    }

    async fn load_devices(&self) -> BrokerResult<Vec<Device>> {
        Ok(self.devices.iter().map(|d| d.value().clone()).collect())
    }

    async fn save_task(&self, record: &TaskRecord) -> BrokerResult<()> {
        if let Some(origin) = &record.origin {
            self.origins.insert(origin.clone(), record.task.id.clone());
        }
        self.tasks.insert(record.task.id.clone(), record.clone());
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> BrokerResult<Option<TaskRecord>> {
        Ok(self.tasks.get(task_id).map(|t| t.value().clone()))
    }

    async fn load_tasks(&self) -> BrokerResult<Vec<TaskRecord>> {
        Ok(self.tasks.iter().map(|t| t.value().clone()).collect())
    }

    async fn find_tasks_by_context(&self, context_id: &str) -> BrokerResult<Vec<String>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.value().task.context_id == context_id)
            .map(|t| t.key().clone())
            .collect())
    }

    async fn find_task_by_origin(&self, origin: &StreamOrigin) -> BrokerResult<Option<String>> {
        Ok(self.origins.get(origin).map(|id| id.value().clone()))
    }

    async fn save_push_config(
        &self,
        task_id: &str,
        config: &PushNotificationConfig,
    ) -> BrokerResult<()> {
        let mut configs = self.push_configs.entry(task_id.to_string()).or_default();
        configs.retain(|c| c.id != config.id);
        configs.push(config.clone());
        Ok(())
    }

    async fn load_push_configs(&self, task_id: &str) -> BrokerResult<Vec<PushNotificationConfig>> {
        Ok(self
            .push_configs
            .get(task_id)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    async fn delete_push_config(&self, task_id: &str, config_id: &str) -> BrokerResult<()> {
        if let Some(mut configs) = self.push_configs.get_mut(task_id) {
            configs.retain(|c| c.id.as_deref() != Some(config_id));
        }
        Ok(())
    }

    async fn stream_watermark(&self, device_id: &str) -> BrokerResult<u64> {
        Ok(self.watermarks.get(device_id).map(|w| *w.value()).unwrap_or(0))
    }

    async fn set_stream_watermark(&self, device_id: &str, seq: u64) -> BrokerResult<()> {
        self.watermarks.insert(device_id.to_string(), seq);
        Ok(())
    }

    async fn save_endpoint(&self, endpoint: &AgentEndpoint) -> BrokerResult<()> {
        self.endpoints
            .insert(endpoint.agent_id.clone(), endpoint.clone());
        Ok(())
    }

    async fn delete_endpoint(&self, agent_id: &str) -> BrokerResult<()> {
        self.endpoints.remove(agent_id);
        Ok(())
    }

    async fn load_endpoints(&self) -> BrokerResult<Vec<AgentEndpoint>> {
        Ok(self.endpoints.iter().map(|e| e.value().clone()).collect())
    }
}
