//! Periodic device-stream scan.
//!
//! Every interval, for each online device: read stream entries past the
//! persisted high-water mark, ask the router for a decision per entry,
//! and raise an internal task for every non-local decision. The mark
//! advances only after the whole batch dispatched, so delivery is
//! at-least-once; task creation dedups on `(device_id, seq)`.

use crate::agents::EndpointRegistry;
use crate::config::ScanConfig;
use crate::errors::BrokerResult;
use crate::handler::A2aHandler;
use crate::ports::{Repository, StreamOrigin};
use crate::registry::{DeviceFilter, DeviceRegistry};
use crate::router::{Decision, IntentRouter, RouterSnapshot};
use crate::streams::StreamStore;
use std::sync::Arc;
use tokio::sync::watch;

pub struct ScanLoop {
    registry: Arc<DeviceRegistry>,
    streams: Arc<StreamStore>,
    router: Arc<IntentRouter>,
    endpoints: Arc<EndpointRegistry>,
    handler: A2aHandler,
    repository: Arc<dyn Repository>,
    config: ScanConfig,
}

impl ScanLoop {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        streams: Arc<StreamStore>,
        router: Arc<IntentRouter>,
        endpoints: Arc<EndpointRegistry>,
        handler: A2aHandler,
        repository: Arc<dyn Repository>,
        config: ScanConfig,
    ) -> Self {
        Self {
            registry,
            streams,
            router,
            endpoints,
            handler,
            repository,
            config,
        }
    }

    /// One sweep over every online device.
    ///
    /// A failure on one entry or one device is logged and skipped; it
    /// never aborts the batch or the sweep.
    pub async fn sweep(&self) -> BrokerResult<usize> {
        let devices = self.registry.list(&DeviceFilter {
            kind: None,
            online_only: true,
        });
        let mut raised = 0;

        for device in devices.into_iter().take(self.config.max_devices) {
            match self.scan_device(&device.device_id).await {
                Ok(count) => raised += count,
                Err(e) => {
                    tracing::error!(device_id = %device.device_id, error = %e, "device scan failed");
                }
            }
        }
        Ok(raised)
    }

    async fn scan_device(&self, device_id: &str) -> BrokerResult<usize> {
        let Some(device) = self.registry.get(device_id) else {
            return Ok(0);
        };
        let watermark = self.repository.stream_watermark(device_id).await?;
        let entries = self
            .streams
            .read(device_id, watermark + 1, self.config.batch_limit)
            .await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let snapshot = RouterSnapshot {
            devices: self.registry.snapshot(),
            endpoints: self
                .endpoints
                .enabled()
                .into_iter()
                .map(|e| {
                    let health = self.endpoints.health(&e.agent_id);
                    (e, health)
                })
                .collect(),
        };

        let mut raised = 0;
        let last_seq = entries.last().map(|e| e.seq).unwrap_or(watermark);

        for entry in entries {
            let Some(text) = entry.text().filter(|t| !t.is_empty()) else {
                tracing::trace!(device_id, seq = entry.seq, "entry carries no analyzable text");
                continue;
            };

            let outcome = match self.router.route(&text, Some(&device), &snapshot).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(device_id, seq = entry.seq, error = %e, "routing stream entry failed");
                    continue;
                }
            };

            if matches!(outcome.decision, Decision::Local { .. }) {
                continue;
            }

            let origin = StreamOrigin {
                device_id: device_id.to_string(),
                seq: entry.seq,
            };
            match self
                .handler
                .submit_internal(text, device.clone(), origin, outcome)
                .await
            {
                Ok(task_id) => {
                    tracing::info!(device_id, seq = entry.seq, task_id = %task_id, "raised task from stream");
                    raised += 1;
                }
                Err(e) => {
                    tracing::warn!(device_id, seq = entry.seq, error = %e, "failed to raise task from stream");
                }
            }
        }

        // The whole batch dispatched; only now advance the mark. A
        // crash before this line re-dispatches the batch, which the
        // origin dedup absorbs.
        self.repository
            .set_stream_watermark(device_id, last_seq)
            .await?;
        Ok(raised)
    }

    /// Background loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(raised) if raised > 0 => {
                            tracing::info!(raised, "scan sweep raised tasks");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "scan sweep failed"),
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
