//! In-memory port implementations for tests.
//!
//! Available to this crate's tests and, through the `test-utils` feature, to
//! downstream crates. Every fake is scriptable from the test and records
//! what was asked of it.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::{BackendKind, DeploymentModel, NameMappings, ProcessStatus, SpawnOptions};
use crate::ports::{
    CommunicationError, LogUploadClient, LogUploadRequest, LogUploadResult, LogUploadState,
    LookupError, ModelLoadError, ModelLoader, NameService, ProcessBackend, ProcessError,
    ProcessInfo, ProcessReadiness, TaskRef, UploadError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Task references
// =============================================================================

/// Task reference whose pings can be made to fail.
#[derive(Debug)]
pub struct MemoryTaskRef {
    name: String,
    ior: String,
    failing: AtomicBool,
    pings: AtomicUsize,
    stopped: AtomicBool,
    cleaned_up: AtomicBool,
}

impl MemoryTaskRef {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            ior: format!("IOR:{name}"),
            name,
            failing: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Make every following ping fail with a communication error.
    pub fn fail_pings(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn was_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CommunicationError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CommunicationError::new(&self.name, "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskRef for MemoryTaskRef {
    fn name(&self) -> &str {
        &self.name
    }

    fn ior(&self) -> &str {
        &self.ior
    }

    async fn ping(&self) -> Result<(), CommunicationError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn stop(&self) -> Result<(), CommunicationError> {
        self.check()?;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CommunicationError> {
        self.check()?;
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Name service
// =============================================================================

#[derive(Debug)]
struct NameEntry {
    task: Arc<MemoryTaskRef>,
    /// Lookup on which the name becomes visible (1-based, 0 = immediately).
    appears_on: usize,
    lookups: usize,
}

impl NameEntry {
    const fn visible(&self) -> bool {
        self.lookups >= self.appears_on
    }
}

/// Name service whose registrations can appear after a number of lookups.
#[derive(Debug, Default)]
pub struct MemoryNameService {
    entries: Mutex<HashMap<String, NameEntry>>,
    permanent_failures: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
}

impl MemoryNameService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a task, visible right away.
    pub fn register(&self, task: Arc<MemoryTaskRef>) {
        self.register_on_lookup(task, 0);
    }

    /// Register a task that only resolves starting with lookup number
    /// `lookup` of its name.
    pub fn register_on_lookup(&self, task: Arc<MemoryTaskRef>, lookup: usize) {
        lock(&self.entries).insert(
            task.name.clone(),
            NameEntry {
                task,
                appears_on: lookup,
                lookups: 0,
            },
        );
    }

    pub fn unregister(&self, name: &str) {
        lock(&self.entries).remove(name);
    }

    /// Make lookups of `name` fail permanently.
    pub fn fail_permanently(&self, name: impl Into<String>) {
        lock(&self.permanent_failures).insert(name.into());
    }

    /// Make every call fail with a communication error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of lookups issued for `name` so far.
    pub fn lookup_count(&self, name: &str) -> usize {
        lock(&self.entries).get(name).map_or(0, |e| e.lookups)
    }
}

#[async_trait]
impl NameService for MemoryNameService {
    async fn get(&self, name: &str) -> Result<Arc<dyn TaskRef>, LookupError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LookupError::Communication("name service unreachable".into()));
        }
        if lock(&self.permanent_failures).contains(name) {
            return Err(LookupError::PermanentFailure(format!(
                "{name} is not a task context"
            )));
        }

        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| LookupError::NotYetAvailable(name.to_owned()))?;
        entry.lookups += 1;
        if entry.visible() {
            Ok(entry.task.clone())
        } else {
            Err(LookupError::NotYetAvailable(name.to_owned()))
        }
    }

    async fn known_tasks(&self) -> Result<Vec<String>, LookupError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LookupError::Communication("name service unreachable".into()));
        }
        let mut names: Vec<String> = lock(&self.entries)
            .iter()
            .filter(|(_, e)| e.visible())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

// =============================================================================
// Model loader
// =============================================================================

/// Model loader serving a fixed set of deployment models.
///
/// Every load returns a new model instance, like a loader bound to a fresh
/// connection would.
#[derive(Debug, Default)]
pub struct StaticModelLoader {
    models: Mutex<HashMap<String, HashMap<String, DeploymentModel>>>,
}

impl StaticModelLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, model: DeploymentModel) {
        lock(&self.models)
            .entry(model.project.clone())
            .or_default()
            .insert(model.name.clone(), model);
    }

    /// Forget a whole project.
    pub fn remove_project(&self, project: &str) {
        lock(&self.models).remove(project);
    }
}

impl ModelLoader for StaticModelLoader {
    fn load_deployment(
        &self,
        project: &str,
        deployment: &str,
    ) -> Result<Arc<DeploymentModel>, ModelLoadError> {
        let models = lock(&self.models);
        let project_models = models
            .get(project)
            .ok_or_else(|| ModelLoadError::UnknownProject(project.to_owned()))?;
        project_models
            .get(deployment)
            .map(|m| Arc::new(m.clone()))
            .ok_or_else(|| ModelLoadError::UnknownDeployment {
                project: project.to_owned(),
                deployment: deployment.to_owned(),
            })
    }
}

// =============================================================================
// Upload client
// =============================================================================

#[derive(Debug)]
struct QueuedUpload {
    request: LogUploadRequest,
    /// `None` never completes.
    complete_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct UploadBook {
    queued: Vec<QueuedUpload>,
    requests: Vec<LogUploadRequest>,
}

/// Upload client completing every request after a fixed delay.
#[derive(Debug, Default)]
pub struct MemoryUploadClient {
    delay: Duration,
    stuck: Mutex<HashSet<PathBuf>>,
    failing: Mutex<HashSet<PathBuf>>,
    book: Mutex<UploadBook>,
}

impl MemoryUploadClient {
    /// Client completing uploads on the next state query.
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Uploads of `path` stay pending forever.
    pub fn never_complete(&self, path: impl Into<PathBuf>) {
        lock(&self.stuck).insert(path.into());
    }

    /// Uploads of `path` complete with a failure.
    pub fn fail_upload(&self, path: impl Into<PathBuf>) {
        lock(&self.failing).insert(path.into());
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<LogUploadRequest> {
        lock(&self.book).requests.clone()
    }
}

#[async_trait]
impl LogUploadClient for MemoryUploadClient {
    async fn log_upload_file(&self, request: LogUploadRequest) -> Result<(), UploadError> {
        if request.path.as_os_str().is_empty() {
            return Err(UploadError::InvalidRequest("empty path".into()));
        }
        let complete_at = if lock(&self.stuck).contains(&request.path) {
            None
        } else {
            Some(Instant::now() + self.delay)
        };

        let mut book = lock(&self.book);
        book.requests.push(request.clone());
        book.queued.push(QueuedUpload {
            request,
            complete_at,
        });
        Ok(())
    }

    async fn log_upload_state(&self) -> Result<LogUploadState, UploadError> {
        let now = Instant::now();
        let failing = lock(&self.failing).clone();
        let mut book = lock(&self.book);

        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut book.queued)
            .into_iter()
            .partition(|u| u.complete_at.is_some_and(|at| at <= now));
        book.queued = pending;

        let results = done
            .into_iter()
            .map(|u| {
                let path = u.request.path;
                if failing.contains(&path) {
                    LogUploadResult::failed(path, "upload rejected")
                } else {
                    let bytes = std::fs::metadata(&path).map_or(0, |m| m.len());
                    LogUploadResult::succeeded(path, bytes)
                }
            })
            .collect();

        Ok(LogUploadState {
            pending_count: book.queued.len(),
            results,
        })
    }
}

// =============================================================================
// Process backend
// =============================================================================

#[derive(Debug, Default)]
struct BackendBook {
    started: Vec<String>,
    stopped: Vec<String>,
    readiness: HashMap<String, ProcessReadiness>,
    exit_statuses: HashMap<String, ProcessStatus>,
    awaiting_exit: Vec<String>,
    next_pid: u32,
}

/// In-memory process backend of any [`BackendKind`].
///
/// Started processes report `Ready` unless scripted otherwise, and exit
/// with status 0 when stopped unless scripted otherwise.
pub struct MemoryBackend {
    kind: BackendKind,
    name_service: Arc<MemoryNameService>,
    model_loader: Arc<StaticModelLoader>,
    uploader: Option<Arc<dyn LogUploadClient>>,
    book: Mutex<BackendBook>,
    fail_starts: AtomicBool,
    disconnects: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            name_service: MemoryNameService::new(),
            model_loader: StaticModelLoader::new(),
            uploader: None,
            book: Mutex::new(BackendBook {
                next_pid: 1000,
                ..BackendBook::default()
            }),
            fail_starts: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn remote() -> Self {
        Self::new(BackendKind::Remote)
    }

    pub fn unmanaged() -> Self {
        Self::new(BackendKind::Unmanaged)
    }

    pub fn in_process() -> Self {
        Self::new(BackendKind::InProcess)
    }

    #[must_use]
    pub fn with_name_service(mut self, name_service: Arc<MemoryNameService>) -> Self {
        self.name_service = name_service;
        self
    }

    #[must_use]
    pub fn with_model_loader(mut self, model_loader: Arc<StaticModelLoader>) -> Self {
        self.model_loader = model_loader;
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: Arc<dyn LogUploadClient>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn names(&self) -> &Arc<MemoryNameService> {
        &self.name_service
    }

    pub fn models(&self) -> &Arc<StaticModelLoader> {
        &self.model_loader
    }

    pub fn set_readiness(&self, process: impl Into<String>, readiness: ProcessReadiness) {
        lock(&self.book).readiness.insert(process.into(), readiness);
    }

    pub fn set_exit_status(&self, process: impl Into<String>, status: ProcessStatus) {
        lock(&self.book).exit_statuses.insert(process.into(), status);
    }

    /// Make every following `start` fail.
    pub fn fail_starts(&self) {
        self.fail_starts.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<String> {
        lock(&self.book).started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        lock(&self.book).stopped.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(
        &self,
        name: &str,
        _deployment_name: &str,
        _name_mappings: &NameMappings,
        _options: &SpawnOptions,
    ) -> Result<ProcessInfo, ProcessError> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(ProcessError::StartFailed {
                name: name.to_owned(),
                reason: "scripted failure".into(),
            });
        }
        let mut book = lock(&self.book);
        book.started.push(name.to_owned());
        book.next_pid += 1;
        Ok(ProcessInfo::new(name, Some(book.next_pid)))
    }

    async fn wait_running(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ProcessReadiness>, ProcessError> {
        let book = lock(&self.book);
        Ok(names
            .iter()
            .map(|name| {
                let readiness = book.readiness.get(name).cloned().unwrap_or_else(|| {
                    if book.started.contains(name) {
                        ProcessReadiness::Ready {
                            iors: BTreeMap::new(),
                        }
                    } else {
                        ProcessReadiness::Failed {
                            reason: format!("{name} was never started"),
                        }
                    }
                });
                (name.clone(), readiness)
            })
            .collect())
    }

    async fn stop(&self, name: &str) -> Result<(), ProcessError> {
        let mut book = lock(&self.book);
        if !book.started.iter().any(|n| n == name) {
            return Err(ProcessError::NotRunning(name.to_owned()));
        }
        book.stopped.push(name.to_owned());
        book.awaiting_exit.push(name.to_owned());
        Ok(())
    }

    async fn wait_termination(
        &self,
        _timeout: Duration,
    ) -> Result<HashMap<String, ProcessStatus>, ProcessError> {
        let mut book = lock(&self.book);
        let exited = std::mem::take(&mut book.awaiting_exit);
        Ok(exited
            .into_iter()
            .map(|name| {
                let status = book
                    .exit_statuses
                    .get(&name)
                    .copied()
                    .unwrap_or(ProcessStatus::Exited(0));
                (name, status)
            })
            .collect())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn name_service(&self) -> Arc<dyn NameService> {
        self.name_service.clone()
    }

    fn model_loader(&self) -> Arc<dyn ModelLoader> {
        self.model_loader.clone()
    }

    fn log_uploader(&self) -> Option<Arc<dyn LogUploadClient>> {
        self.uploader.clone()
    }
}
