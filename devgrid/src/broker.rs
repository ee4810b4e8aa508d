//! Broker assembly and lifecycle.
//!
//! [`Broker`] owns the singletons (registry, task manager, stream
//! store, card cache), wires them to the ports, and runs the background
//! loops: card rebuilds, liveness sweeps, stream retention, and the
//! scan loop. Constructed from persisted state at startup; shut down by
//! signalling the loops and letting subscribers drain.

use crate::agents::{AgentEndpoint, EndpointRegistry};
use crate::card::CardService;
use crate::config::BrokerConfig;
use crate::errors::BrokerResult;
use crate::handler::A2aHandler;
use crate::ports::{DeviceConnector, InMemoryRepository, IntentLlm, Repository};
use crate::registry::{Device, DevicePatch, DeviceRegistry, DeviceSpec};
use crate::router::IntentRouter;
use crate::scan::ScanLoop;
use crate::streams::StreamStore;
use crate::tasks::{PushNotifier, TaskManager};
use crate::workers::WorkerPool;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub struct BrokerBuilder {
    config: BrokerConfig,
    connector: Arc<dyn DeviceConnector>,
    llm: Option<Arc<dyn IntentLlm>>,
    repository: Option<Arc<dyn Repository>>,
}

impl BrokerBuilder {
    pub fn new(connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            config: BrokerConfig::default(),
            connector,
            llm: None,
            repository: None,
        }
    }

    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn IntentLlm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Restore persisted state, wire the components, and start the
    /// background loops.
    pub async fn build(self) -> BrokerResult<Broker> {
        let config = Arc::new(self.config);
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryRepository::new()));
        let manifest_dirty = Arc::new(Notify::new());

        let registry = Arc::new(DeviceRegistry::new(
            self.connector.clone(),
            repository.clone(),
            manifest_dirty.clone(),
            config.liveness.clone(),
        ));
        registry.load().await?;

        let card = Arc::new(CardService::new(&config, manifest_dirty));
        card.rebuild(&registry);

        let streams = Arc::new(StreamStore::new(config.streams.clone()));

        let notifier = Arc::new(PushNotifier::new(config.timeouts.push_attempt()));
        let tasks = Arc::new(TaskManager::new(
            repository.clone(),
            notifier,
            config.capabilities.state_transition_history,
        ));
        tasks.load().await?;

        let endpoints = Arc::new(EndpointRegistry::new(repository.clone()));
        endpoints.load().await?;

        let router = Arc::new(IntentRouter::new(
            self.llm,
            config.router.clone(),
            config.timeouts.llm_call(),
        ));

        let workers = Arc::new(WorkerPool::new(
            config.workers.effective_count(),
            config.workers.queue_depth,
            config.workers.submit_grace(),
        ));

        let handler = A2aHandler::new(
            config.clone(),
            registry.clone(),
            tasks.clone(),
            router.clone(),
            workers.clone(),
            endpoints.clone(),
            self.connector.clone(),
            card.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut background = Vec::new();
        background.push(tokio::spawn(
            card.clone().run(registry.clone(), shutdown_rx.clone()),
        ));
        background.push(tokio::spawn(
            registry.clone().run_liveness_sweep(shutdown_rx.clone()),
        ));
        background.push(tokio::spawn(
            streams.clone().run_retention_sweep(shutdown_rx.clone()),
        ));

        let scan = ScanLoop::new(
            registry.clone(),
            streams.clone(),
            router.clone(),
            endpoints.clone(),
            handler.clone(),
            repository.clone(),
            config.scan.clone(),
        );
        background.push(tokio::spawn(scan.run(shutdown_rx)));

        tracing::info!(
            service = %config.service.name,
            workers = config.workers.effective_count(),
            "broker assembled"
        );

        Ok(Broker {
            config,
            registry,
            tasks,
            streams,
            endpoints,
            card,
            handler,
            router,
            repository,
            shutdown_tx,
            background,
        })
    }
}

pub struct Broker {
    config: Arc<BrokerConfig>,
    registry: Arc<DeviceRegistry>,
    tasks: Arc<TaskManager>,
    streams: Arc<StreamStore>,
    endpoints: Arc<EndpointRegistry>,
    card: Arc<CardService>,
    handler: A2aHandler,
    router: Arc<IntentRouter>,
    repository: Arc<dyn Repository>,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl Broker {
    pub fn builder(connector: Arc<dyn DeviceConnector>) -> BrokerBuilder {
        BrokerBuilder::new(connector)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The request handler a transport adapter dispatches into.
    pub fn handler(&self) -> A2aHandler {
        self.handler.clone()
    }

    pub fn card(&self) -> Arc<CardService> {
        self.card.clone()
    }

    pub fn tasks(&self) -> Arc<TaskManager> {
        self.tasks.clone()
    }

    pub fn streams(&self) -> Arc<StreamStore> {
        self.streams.clone()
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    // === Device management (out-of-band operator surface) ===

    pub async fn register_device(&self, spec: DeviceSpec) -> BrokerResult<Device> {
        self.registry.register(spec).await
    }

    /// Deregister a device and fail its in-flight tasks with
    /// `DeviceGone`.
    pub async fn deregister_device(&self, device_id: &str) -> BrokerResult<Device> {
        let device = self.registry.deregister(device_id).await?;
        let failed = self.tasks.fail_tasks_for_device(device_id).await?;
        if failed > 0 {
            tracing::warn!(device_id, failed, "failed in-flight tasks for removed device");
        }
        Ok(device)
    }

    pub async fn update_device(
        &self,
        device_id: &str,
        patch: DevicePatch,
    ) -> BrokerResult<Device> {
        self.registry.update(device_id, patch).await
    }

    // === Device ingress (the per-device channel feeds these) ===

    pub async fn device_heartbeat(&self, device_id: &str) -> BrokerResult<()> {
        self.registry.heartbeat(device_id).await
    }

    /// Append device-produced data to its stream. Data arriving on the
    /// channel also counts as a heartbeat.
    pub async fn ingest_stream(
        &self,
        device_id: &str,
        metadata: serde_json::Value,
        payload: Vec<u8>,
        mime_type: Option<String>,
    ) -> BrokerResult<u64> {
        if self.registry.get(device_id).is_some() {
            self.registry.heartbeat(device_id).await?;
        }
        self.streams
            .append(device_id, metadata, payload, mime_type)
            .await
    }

    // === External agent endpoints ===

    pub async fn add_agent_endpoint(&self, endpoint: AgentEndpoint) -> BrokerResult<()> {
        self.endpoints.upsert(endpoint).await
    }

    pub async fn remove_agent_endpoint(&self, agent_id: &str) -> BrokerResult<()> {
        self.endpoints.remove(agent_id).await
    }

    /// One scan sweep on demand (tests and operator tooling).
    pub async fn scan_once(&self) -> BrokerResult<usize> {
        let scan = ScanLoop::new(
            self.registry.clone(),
            self.streams.clone(),
            self.router.clone(),
            self.endpoints.clone(),
            self.handler.clone(),
            self.repository.clone(),
            self.config.scan.clone(),
        );
        scan.sweep().await
    }

    /// Signal the background loops and wait for them to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.background {
            let _ = handle.await;
        }
        tracing::info!("broker shut down");
    }
}
