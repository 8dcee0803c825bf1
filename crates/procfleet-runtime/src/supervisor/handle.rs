//! Per-deployment supervision handle.
//!
//! A [`ProcessSupervisor`] owns up to two background loops: the resolve loop,
//! started by [`ProcessSupervisor::spawn`], and the monitor loop it starts
//! once every task is resolved. The loops report back only through the
//! state channel and the recorded fault; nothing calls back into the owner.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use procfleet_core::{
    BackendKind, ConfiguredDeployment, NameService, ProcessInfo, ProcessServerConfig,
    ProcessStatus, TaskRef,
};

use super::{SupervisorConfig, SupervisorError, SupervisorState, resolve};
use crate::backends::{Backend, SupervisionBackend};

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// State shared between the handle and its background loops.
pub(super) struct Inner {
    pub(super) deployment: Arc<ConfiguredDeployment>,
    pub(super) backend: Backend,
    pub(super) name_service: Arc<dyn NameService>,
    pub(super) config: SupervisorConfig,
    /// Set when the loops must exit.
    pub(super) quitting: CancellationToken,
    state: watch::Sender<SupervisorState>,
    /// Resolved tasks keyed by deployed name
    tasks: RwLock<HashMap<String, Arc<dyn TaskRef>>>,
    fault: Mutex<Option<SupervisorError>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    process: Mutex<Option<ProcessInfo>>,
    exit_status: Mutex<Option<ProcessStatus>>,
    /// Set by whichever of `reap` and `finish` stops the process first.
    terminated: AtomicBool,
}

impl Inner {
    pub(super) fn name(&self) -> &str {
        self.deployment.deployment_name()
    }

    pub(super) fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Move to `to` if the current state is one of `from`.
    pub(super) fn transition(&self, from: &[SupervisorState], to: SupervisorState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(deployment = %self.name(), state = %to, "Supervisor state changed");
        }
        changed
    }

    fn mark_dead(&self) {
        let previous = self.state.send_replace(SupervisorState::Dead);
        if !previous.is_dead() {
            info!(deployment = %self.name(), from = %previous, "Deployment is dead");
        }
    }

    async fn wait_dead(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| state.is_dead()).await;
    }

    pub(super) fn has_task(&self, deployed: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(deployed)
    }

    pub(super) fn insert_task(&self, deployed: String, task: Arc<dyn TaskRef>) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deployed, task);
    }

    fn task(&self, deployed: &str) -> Option<Arc<dyn TaskRef>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(deployed)
            .cloned()
    }

    fn tasks_by_name(&self) -> HashMap<String, Arc<dyn TaskRef>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolved tasks in declaration order.
    pub(super) fn tasks_in_order(&self) -> Vec<Arc<dyn TaskRef>> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        self.deployment
            .deployed_task_names()
            .iter()
            .filter_map(|name| tasks.get(name).cloned())
            .collect()
    }

    fn pending_tasks(&self) -> Vec<String> {
        self.deployment
            .deployed_task_names()
            .into_iter()
            .filter(|name| !self.has_task(name))
            .collect()
    }

    fn record_fault(&self, fault: SupervisorError) {
        let mut slot = lock(&self.fault);
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    /// Stop the started process and keep its exit status. Only the first
    /// call reaches the backend.
    async fn terminate_process(&self) {
        if lock(&self.process).is_none() || self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(status) = self
            .backend
            .terminate(&self.deployment, self.config.termination_timeout)
            .await
        {
            debug!(deployment = %self.name(), %status, "Process exited");
            *lock(&self.exit_status) = Some(status);
        }
    }

    /// Collect the exit status of an owned process that went away by itself.
    pub(super) async fn reap(&self) {
        if self.backend.kind().owns_processes() {
            self.terminate_process().await;
        }
    }

    /// Graceful shutdown: stop and clean up every resolved task, then stop
    /// the process if the backend owns it. Ends in `DEAD`.
    ///
    /// A process whose start is still in flight is not stopped here; the
    /// pending `spawn` reaps it once the backend returns.
    async fn finish(&self) {
        for task in self.tasks_in_order() {
            // The remote side may already be gone
            if let Err(e) = task.stop().await {
                debug!(task = %task.name(), error = %e, "Stop request failed");
            }
            if let Err(e) = task.cleanup().await {
                debug!(task = %task.name(), error = %e, "Cleanup request failed");
            }
        }
        self.terminate_process().await;
        self.mark_dead();
    }

    /// Record a background fault and take the deployment down.
    async fn fail(&self, what: &'static str, fault: SupervisorError) {
        error!(deployment = %self.name(), task = what, error = %fault, "Supervision loop failed");
        self.record_fault(fault);
        self.quitting.cancel();
        if self.transition(&SupervisorState::ACTIVE, SupervisorState::Killing) {
            self.finish().await;
        }
    }

    /// Wait for every background loop, including one started while waiting.
    async fn join_loops(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.loops));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        self.record_fault(SupervisorError::Panicked(panic_message(
                            e.into_panic().as_ref(),
                        )));
                    }
                }
            }
        }
    }
}

/// Run `fut` as a background loop of `inner`.
///
/// An error or a panic is recorded as the supervisor's fault, to be
/// re-raised by `verify_state`.
pub(super) fn spawn_loop<F>(inner: &Arc<Inner>, what: &'static str, fut: F)
where
    F: Future<Output = Result<(), SupervisorError>> + Send + 'static,
{
    let owner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        let fault = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => SupervisorError::Panicked(panic_message(payload.as_ref())),
        };
        owner.fail(what, fault).await;
    });
    lock(&inner.loops).push(handle);
}

/// Supervises one configured deployment.
///
/// Cloning shares the same supervision state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Supervisor for `deployment`, running on `server`.
    pub fn new(
        deployment: Arc<ConfiguredDeployment>,
        server: &ProcessServerConfig,
        config: SupervisorConfig,
    ) -> Self {
        Self::with_backend(
            deployment,
            Backend::for_server(server),
            server.client.name_service(),
            config,
        )
    }

    pub fn with_backend(
        deployment: Arc<ConfiguredDeployment>,
        backend: Backend,
        name_service: Arc<dyn NameService>,
        config: SupervisorConfig,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Created);
        Self {
            inner: Arc::new(Inner {
                deployment,
                backend,
                name_service,
                config,
                quitting: CancellationToken::new(),
                state,
                tasks: RwLock::new(HashMap::new()),
                fault: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
                started_at: Mutex::new(None),
                process: Mutex::new(None),
                exit_status: Mutex::new(None),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Start the deployment and begin resolving its tasks.
    ///
    /// Configuration errors, such as a rename table on an unmanaged server,
    /// are returned directly and leave the supervisor `DEAD`.
    pub async fn spawn(&self) -> Result<(), SupervisorError> {
        let inner = &self.inner;
        if !inner.transition(&[SupervisorState::Created], SupervisorState::Spawning) {
            return Err(SupervisorError::InvalidState {
                operation: "spawn",
                state: inner.state(),
            });
        }
        *lock(&inner.started_at) = Some(Utc::now());
        inner.tasks.write().unwrap_or_else(PoisonError::into_inner).clear();

        let info = match inner.backend.spawn(&inner.deployment).await {
            Ok(info) => info,
            Err(e) => {
                warn!(deployment = %inner.name(), error = %e, "Failed to spawn deployment");
                inner.mark_dead();
                return Err(e);
            }
        };
        let started = info.is_some();
        *lock(&inner.process) = info;

        if inner.quitting.is_cancelled() {
            // Killed while the process was starting. `kill` may already
            // have returned with the supervisor DEAD.
            if started {
                inner.reap().await;
            }
            return Ok(());
        }

        spawn_loop(inner, "resolve", resolve::run(Arc::clone(inner)));
        Ok(())
    }

    /// Wait until every declared task is resolved and monitored.
    ///
    /// `None` blocks until the supervisor is either monitoring or dead.
    pub async fn wait_running(
        &self,
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, Arc<dyn TaskRef>>, SupervisorError> {
        let inner = &self.inner;
        let state = inner.state();
        if state == SupervisorState::Created {
            return Err(SupervisorError::InvalidState {
                operation: "wait for",
                state,
            });
        }

        let mut rx = inner.state.subscribe();
        let settled = async move {
            rx.wait_for(|s| {
                matches!(
                    s,
                    SupervisorState::Monitoring | SupervisorState::Killing | SupervisorState::Dead
                )
            })
            .await
            .map(|s| *s)
        };
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, settled).await.ok(),
            None => Some(settled.await),
        };

        match outcome {
            None => Err(SupervisorError::ResolveTimeout {
                pending: inner.pending_tasks(),
            }),
            Some(Ok(SupervisorState::Monitoring)) => Ok(inner.tasks_by_name()),
            Some(_) => Err(lock(&inner.fault)
                .clone()
                .unwrap_or_else(|| SupervisorError::Dead(inner.name().to_owned()))),
        }
    }

    /// [`wait_running`](Self::wait_running) limited by the configured
    /// resolve timeout.
    pub async fn wait_running_default(
        &self,
    ) -> Result<HashMap<String, Arc<dyn TaskRef>>, SupervisorError> {
        self.wait_running(self.inner.config.resolve_timeout).await
    }

    /// Stop supervising and take the deployment down.
    ///
    /// With `wait`, returns once the background loops have exited, the
    /// tasks have been asked to stop and the supervisor is `DEAD`. Without
    /// it, the same sequence runs detached.
    pub async fn kill(&self, wait: bool) {
        let inner = &self.inner;
        if inner.transition(&[SupervisorState::Created], SupervisorState::Dead) {
            return;
        }
        if !inner.transition(&SupervisorState::ACTIVE, SupervisorState::Killing) {
            // Already going down
            if wait {
                inner.wait_dead().await;
            }
            return;
        }

        debug!(deployment = %inner.name(), wait, "Killing deployment");
        inner.quitting.cancel();
        let owner = Arc::clone(inner);
        let teardown = async move {
            owner.join_loops().await;
            owner.finish().await;
        };
        if wait {
            teardown.await;
        } else {
            tokio::spawn(teardown);
        }
    }

    /// Re-raise a fault of the background loops, once.
    pub fn verify_state(&self) -> Result<(), SupervisorError> {
        lock(&self.inner.fault).take().map_or(Ok(()), Err)
    }

    /// Resolved reference of a task, by declared or deployed name.
    pub fn task(&self, name: &str) -> Result<Arc<dyn TaskRef>, SupervisorError> {
        let deployment = &self.inner.deployment;
        let deployed = deployment
            .deployed_task_name(name)
            .or_else(|| deployment.deploys_task(name).then_some(name))
            .ok_or_else(|| SupervisorError::UnknownTask(name.to_owned()))?;

        if !self.is_ready() {
            return Err(SupervisorError::NotRunning(deployed.to_owned()));
        }
        self.inner
            .task(deployed)
            .ok_or_else(|| SupervisorError::NotRunning(deployed.to_owned()))
    }

    /// Snapshot of the resolved tasks, keyed by deployed name.
    pub fn resolved_tasks(&self) -> HashMap<String, Arc<dyn TaskRef>> {
        self.inner.tasks_by_name()
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.state()
    }

    /// Channel following the state of this supervisor.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.subscribe()
    }

    pub fn is_dead(&self) -> bool {
        self.state().is_dead()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn is_running(&self) -> bool {
        !self.is_dead()
    }

    /// Name the deployment was started under.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn deployment(&self) -> &Arc<ConfiguredDeployment> {
        &self.inner.deployment
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.started_at)
    }

    pub fn process_info(&self) -> Option<ProcessInfo> {
        lock(&self.inner.process).clone()
    }

    /// How the process ended, for backends that own it.
    pub fn exit_status(&self) -> Option<ProcessStatus> {
        *lock(&self.inner.exit_status)
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("deployment", &self.name())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
