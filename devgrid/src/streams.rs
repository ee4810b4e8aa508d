//! Per-device append-only data stream.
//!
//! Devices feed timestamped entries into a per-device log. Small
//! payloads stay inline with the entry; anything over the threshold is
//! written to a content-addressed file keyed by `(device_id, seq)` and
//! the entry carries the locator. A background sweep evicts entries
//! past the retention horizon, removing the external payload before the
//! entry so readers never see a dangling locator.

use crate::config::StreamConfig;
use crate::errors::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Where an entry's payload lives.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadRef {
    /// Payload stored with the entry (at or below the inline threshold).
    Inline(Vec<u8>),
    /// Payload stored externally; `locator` is a filesystem path today.
    External { locator: String, size: u64 },
    /// The entry committed but its external payload is gone (partial
    /// write or raced eviction). Readers get this instead of an error.
    Unavailable,
}

/// One durable record appended by a device.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub device_id: String,
    /// Strictly increasing per device, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub mime_type: Option<String>,
    pub payload: PayloadRef,
}

impl StreamEntry {
    /// Best-effort text rendering of the payload for intent analysis.
    pub fn text(&self) -> Option<String> {
        if let PayloadRef::Inline(bytes) = &self.payload {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return Some(text.to_string());
            }
        }
        self.metadata
            .get("text")
            .or_else(|| self.metadata.get("transcript"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

struct DeviceLog {
    entries: VecDeque<StreamEntry>,
    next_seq: u64,
    min_seq: u64,
    tails: Vec<mpsc::Sender<StreamEntry>>,
}

impl DeviceLog {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 1,
            min_seq: 1,
            tails: Vec::new(),
        }
    }
}

pub struct StreamStore {
    logs: DashMap<String, Arc<Mutex<DeviceLog>>>,
    config: StreamConfig,
}

impl StreamStore {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            logs: DashMap::new(),
            config,
        }
    }

    fn log_for(&self, device_id: &str) -> Arc<Mutex<DeviceLog>> {
        self.logs
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceLog::new())))
            .clone()
    }

    fn blob_path(&self, device_id: &str, seq: u64, payload: &[u8]) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(device_id.as_bytes());
        hasher.update(seq.to_be_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        self.config
            .blob_root
            .join(device_id)
            .join(format!("{seq}-{:016x}.bin", u64::from_be_bytes(digest[..8].try_into().unwrap())))
    }

    /// Append a payload to a device's stream, returning its seq.
    ///
    /// Per-device appends are serialized; the external payload (if any)
    /// is durable before the entry commits.
    pub async fn append(
        &self,
        device_id: &str,
        metadata: serde_json::Value,
        payload: Vec<u8>,
        mime_type: Option<String>,
    ) -> BrokerResult<u64> {
        let log = self.log_for(device_id);
        let mut log = log.lock().await;
        let seq = log.next_seq;

        let payload_ref = if payload.len() <= self.config.inline_threshold_bytes {
            PayloadRef::Inline(payload)
        } else {
            let path = self.blob_path(device_id, seq, &payload);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let size = payload.len() as u64;
            tokio::fs::write(&path, &payload)
                .await
                .map_err(|e| BrokerError::Stream {
                    device_id: device_id.to_string(),
                    reason: format!("external payload write failed: {e}"),
                })?;
            PayloadRef::External {
                locator: path.to_string_lossy().into_owned(),
                size,
            }
        };

        let entry = StreamEntry {
            device_id: device_id.to_string(),
            seq,
            timestamp: Utc::now(),
            metadata,
            mime_type,
            payload: payload_ref,
        };

        log.next_seq += 1;
        // Fan out to open tails before storing; closed tails drop out.
        log.tails.retain(|tail| tail.try_send(entry.clone()).is_ok());
        log.entries.push_back(entry);
        Ok(seq)
    }

    /// Read up to `limit` entries with `seq >= from_seq`, ascending.
    ///
    /// Entries whose external payload has vanished come back with
    /// [`PayloadRef::Unavailable`] rather than failing the read.
    pub async fn read(
        &self,
        device_id: &str,
        from_seq: u64,
        limit: usize,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let log = self.log_for(device_id);
        let log = log.lock().await;
        let mut out = Vec::new();
        for entry in log.entries.iter().filter(|e| e.seq >= from_seq) {
            if out.len() >= limit {
                break;
            }
            let mut entry = entry.clone();
            if let PayloadRef::External { locator, .. } = &entry.payload {
                if !Path::new(locator).exists() {
                    entry.payload = PayloadRef::Unavailable;
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Load an external payload's bytes.
    pub async fn fetch_payload(&self, entry: &StreamEntry) -> BrokerResult<Option<Vec<u8>>> {
        match &entry.payload {
            PayloadRef::Inline(bytes) => Ok(Some(bytes.clone())),
            PayloadRef::External { locator, .. } => {
                match tokio::fs::read(locator).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            PayloadRef::Unavailable => Ok(None),
        }
    }

    /// Subscribe to all entries appended after this call, in order.
    pub async fn tail(&self, device_id: &str) -> mpsc::Receiver<StreamEntry> {
        let log = self.log_for(device_id);
        let (tx, rx) = mpsc::channel(256);
        log.lock().await.tails.push(tx);
        rx
    }

    /// Lowest seq still readable for a device.
    pub async fn min_seq(&self, device_id: &str) -> u64 {
        let log = self.log_for(device_id);
        let log = log.lock().await;
        log.min_seq
    }

    /// Evict entries older than the retention horizon.
    ///
    /// External payloads are removed before their entry, so a reader
    /// racing the sweep sees `Unavailable`, never a dangling locator.
    /// Orphaned blob files (written but never committed) are removed
    /// once they age past the horizon.
    pub async fn sweep_expired(&self) -> BrokerResult<usize> {
        let horizon = Utc::now()
            - chrono::Duration::from_std(self.config.retention())
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut evicted = 0;

        // Snapshot the log handles first; holding a map guard across
        // the awaits below could block concurrent appends.
        let logs: Vec<Arc<Mutex<DeviceLog>>> =
            self.logs.iter().map(|e| e.value().clone()).collect();
        for log in logs {
            let mut log = log.lock().await;
            while let Some(front) = log.entries.front() {
                if front.timestamp >= horizon {
                    break;
                }
                if let PayloadRef::External { locator, .. } = &front.payload {
                    if let Err(e) = tokio::fs::remove_file(locator).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!(locator, error = %e, "failed to remove expired payload");
                        }
                    }
                }
                let entry = log.entries.pop_front().expect("front checked above");
                log.min_seq = entry.seq + 1;
                evicted += 1;
            }
        }

        self.sweep_orphans(horizon).await;
        if evicted > 0 {
            tracing::info!(evicted, "stream retention sweep");
        }
        Ok(evicted)
    }

    /// Remove blob files past the horizon that no live entry references.
    async fn sweep_orphans(&self, horizon: DateTime<Utc>) {
        let Ok(mut device_dirs) = tokio::fs::read_dir(&self.config.blob_root).await else {
            return;
        };
        while let Ok(Some(device_dir)) = device_dirs.next_entry().await {
            let device_id = device_dir.file_name().to_string_lossy().into_owned();
            let log = self.logs.get(&device_id).map(|l| l.value().clone());
            let live_min = match log {
                Some(log) => log.lock().await.min_seq,
                None => u64::MAX,
            };
            let Ok(mut files) = tokio::fs::read_dir(device_dir.path()).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let name = file.file_name().to_string_lossy().into_owned();
                let seq: Option<u64> = name.split('-').next().and_then(|s| s.parse().ok());
                let expired = match file.metadata().await.and_then(|m| m.modified()) {
                    Ok(modified) => DateTime::<Utc>::from(modified) < horizon,
                    Err(_) => false,
                };
                if expired && seq.map_or(true, |s| s < live_min) {
                    let _ = tokio::fs::remove_file(file.path()).await;
                }
            }
        }
    }

    /// Background retention loop until shutdown.
    pub async fn run_retention_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_expired().await {
                        tracing::error!(error = %e, "stream retention sweep failed");
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
