//! Shared fixtures for the runtime integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use procfleet_core::testing::{MemoryBackend, MemoryTaskRef};
use procfleet_core::{
    BackendKind, ConfiguredDeployment, DeploymentModel, FleetContext, LogUploadClient,
    ModelLoader, NameMappings, NameService, ProcessBackend, ProcessError, ProcessInfo,
    ProcessReadiness, ProcessServerConfig, ProcessStatus, SpawnOptions,
};
use procfleet_runtime::SupervisorConfig;

/// Poll period used by supervisors under test.
pub const POLL: Duration = Duration::from_millis(20);

pub fn config() -> SupervisorConfig {
    SupervisorConfig::default().with_poll_interval(POLL)
}

pub fn model(name: &str, tasks: &[&str]) -> Arc<DeploymentModel> {
    Arc::new(DeploymentModel::new("rover", name, tasks.iter().copied()))
}

pub fn deployment(server: &str, name: &str, tasks: &[&str]) -> Arc<ConfiguredDeployment> {
    Arc::new(ConfiguredDeployment::new(
        server,
        model(name, tasks),
        NameMappings::new(),
        SpawnOptions::default(),
    ))
}

/// Register `tasks` with `backend`'s name service, visible right away.
pub fn register_tasks(backend: &MemoryBackend, tasks: &[&str]) -> Vec<Arc<MemoryTaskRef>> {
    tasks
        .iter()
        .map(|name| {
            let task = MemoryTaskRef::new(*name);
            backend.names().register(Arc::clone(&task));
            task
        })
        .collect()
}

/// Context with one process server named `server` backed by `backend`.
pub fn fleet(server: &str, backend: &Arc<MemoryBackend>, log_dir: Option<PathBuf>) -> FleetContext {
    let mut ctx = FleetContext::with_defaults();
    ctx.registry
        .register_process_server(server, backend.clone(), log_dir, "localhost")
        .unwrap();
    ctx
}

pub fn server(ctx: &FleetContext, name: &str) -> ProcessServerConfig {
    ctx.registry.process_server(name).unwrap().clone()
}

/// Process server whose `start` and `stop` take `latency` before reaching
/// the wrapped in-memory backend, like calls over the network.
pub struct SlowBackend {
    inner: Arc<MemoryBackend>,
    latency: Duration,
}

impl SlowBackend {
    pub fn new(inner: Arc<MemoryBackend>, latency: Duration) -> Arc<Self> {
        Arc::new(Self { inner, latency })
    }
}

#[async_trait]
impl ProcessBackend for SlowBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn start(
        &self,
        name: &str,
        deployment_name: &str,
        name_mappings: &NameMappings,
        options: &SpawnOptions,
    ) -> Result<ProcessInfo, ProcessError> {
        tokio::time::sleep(self.latency).await;
        self.inner
            .start(name, deployment_name, name_mappings, options)
            .await
    }

    async fn wait_running(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ProcessReadiness>, ProcessError> {
        self.inner.wait_running(names).await
    }

    async fn stop(&self, name: &str) -> Result<(), ProcessError> {
        tokio::time::sleep(self.latency).await;
        self.inner.stop(name).await
    }

    async fn wait_termination(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, ProcessStatus>, ProcessError> {
        self.inner.wait_termination(timeout).await
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }

    fn name_service(&self) -> Arc<dyn NameService> {
        self.inner.name_service()
    }

    fn model_loader(&self) -> Arc<dyn ModelLoader> {
        self.inner.model_loader()
    }

    fn log_uploader(&self) -> Option<Arc<dyn LogUploadClient>> {
        self.inner.log_uploader()
    }
}
