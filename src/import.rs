//! Bulk import: upload a spreadsheet, then poll the server task to completion.
//!
//! [`ImportPoller`] is a small state machine:
//!
//! ```text
//! Idle --start--> Uploading --task id--> Polling --terminal status--> Succeeded | Failed
//!                     |                     |
//!                     +--error--> Failed    +--poll error / timeout--> Failed
//! ```
//!
//! Polling is a sequential loop: sleep one interval, read the status, apply
//! it, repeat. There is never more than one status request in flight.
//!
//! Selecting or clearing a file resets the machine to `Idle` and aborts the
//! worker. Every state write from the worker carries the generation it was
//! started under; a write from an older generation is discarded, so a
//! response that arrives after a reselect never reaches the new state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ImportConfig;
use crate::models::{ImportTask, TaskStatus, UploadFile};
use crate::traits::ImportApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls until the task reaches a terminal status.
    pub max_duration: Option<Duration>,
}

impl From<&ImportConfig> for PollSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_duration: config.max_poll_duration(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

/// Why an import ended in [`ImportPhase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportFailure {
    /// The upload request failed; polling never started.
    Upload(String),
    /// A status read failed; polling stopped.
    Poll(String),
    /// The task itself reported failure.
    Task(TaskStatus),
    /// No terminal status within the configured bound.
    TimedOut(Duration),
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportFailure::Upload(msg) => write!(f, "upload failed: {}", msg),
            ImportFailure::Poll(msg) => write!(f, "lost track of import task: {}", msg),
            ImportFailure::Task(status) => write!(f, "import task finished with {}", status),
            ImportFailure::TimedOut(after) => {
                write!(f, "import task still running after {}s", after.as_secs())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImportPhase {
    #[default]
    Idle,
    Uploading,
    Polling,
    Succeeded,
    Failed(ImportFailure),
}

impl ImportPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportPhase::Succeeded | ImportPhase::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImportPhase::Idle => "idle",
            ImportPhase::Uploading => "uploading",
            ImportPhase::Polling => "polling",
            ImportPhase::Succeeded => "succeeded",
            ImportPhase::Failed(_) => "failed",
        }
    }
}

/// What the view renders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportState {
    pub phase: ImportPhase,
    pub file_name: Option<String>,
    pub task_id: Option<String>,
    /// Last task status applied, kept after the terminal transition.
    pub task: Option<ImportTask>,
    pub polls: u32,
}

impl ImportState {
    pub fn summary(&self) -> Option<ImportSummary> {
        self.task.as_ref().map(ImportSummary::from_task)
    }
}

/// Imported count plus row-level errors. A successful task with errors is a
/// partial success, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    pub errors: Vec<String>,
}

impl ImportSummary {
    pub fn from_task(task: &ImportTask) -> Self {
        let result = task.result.clone().unwrap_or_default();
        Self {
            imported: result.imported,
            errors: result.errors,
        }
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} imported, {} errors", self.imported, self.errors.len())
    }
}

struct Inner {
    state: ImportState,
    file: Option<UploadFile>,
    generation: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    tx: watch::Sender<ImportState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset to `Idle` under a new generation.
    fn reset(&self, file: Option<UploadFile>) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = ImportState {
            file_name: file.as_ref().map(|f| f.file_name.clone()),
            ..ImportState::default()
        };
        inner.file = file;
        self.tx.send_replace(inner.state.clone());
    }

    /// Apply `update` if `generation` is still current. Returns false for a
    /// stale write.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut ImportState)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(
                generation,
                current = inner.generation,
                "discarding stale import update"
            );
            return false;
        }
        update(&mut inner.state);
        self.tx.send_replace(inner.state.clone());
        true
    }
}

pub struct ImportPoller {
    api: Arc<dyn ImportApi>,
    settings: PollSettings,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ImportPoller {
    pub fn new(api: Arc<dyn ImportApi>, settings: PollSettings) -> Self {
        let (tx, _rx) = watch::channel(ImportState::default());
        Self {
            api,
            settings,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ImportState::default(),
                    file: None,
                    generation: 0,
                }),
                tx,
            }),
            worker: Mutex::new(None),
        }
    }

    fn abort_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = worker.take() {
            handle.abort();
        }
    }

    /// Choose the file to import. Clears any previous task and stops its polling.
    pub fn select_file(&self, file: UploadFile) {
        self.shared.reset(Some(file));
        self.abort_worker();
    }

    pub fn clear_file(&self) {
        self.shared.reset(None);
        self.abort_worker();
    }

    /// Upload the selected file and begin polling.
    ///
    /// Returns false without doing anything when no file is selected or the
    /// machine has already left `Idle` for this file.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let (generation, file) = {
            let mut inner = self.shared.lock();
            let file = match (&inner.state.phase, &inner.file) {
                (ImportPhase::Idle, Some(file)) => file.clone(),
                _ => return false,
            };
            inner.state.phase = ImportPhase::Uploading;
            self.shared.tx.send_replace(inner.state.clone());
            (inner.generation, file)
        };

        let handle = tokio::spawn(run(
            self.api.clone(),
            self.shared.clone(),
            self.settings,
            generation,
            file,
        ));
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        *worker = Some(handle);
        true
    }

    pub fn state(&self) -> ImportState {
        self.shared.lock().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImportState> {
        self.shared.tx.subscribe()
    }

    /// Wait until the current run settles: terminal, or reset to `Idle`.
    pub async fn wait_terminal(&self) -> ImportState {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|s| s.phase.is_terminal() || s.phase == ImportPhase::Idle)
            .await
            .map(|s| s.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Stop polling for good. Call from the owning view's teardown.
    pub fn dispose(&self) {
        self.shared.lock().generation += 1;
        self.abort_worker();
    }
}

impl Drop for ImportPoller {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(
    api: Arc<dyn ImportApi>,
    shared: Arc<Shared>,
    settings: PollSettings,
    generation: u64,
    file: UploadFile,
) {
    let task_id = match api.upload(&file).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(file = %file.file_name, error = %e, "import upload failed");
            shared.apply(generation, |s| {
                s.phase = ImportPhase::Failed(ImportFailure::Upload(e.user_message()))
            });
            return;
        }
    };
    tracing::debug!(task_id = %task_id, "import task accepted");

    let moved_on = !shared.apply(generation, |s| {
        s.task_id = Some(task_id.clone());
        s.phase = ImportPhase::Polling;
    });
    if moved_on {
        return;
    }

    let started = Instant::now();
    loop {
        tokio::time::sleep(settings.interval).await;

        if let Some(max) = settings.max_duration {
            if started.elapsed() >= max {
                tracing::warn!(task_id = %task_id, "import polling timed out");
                shared.apply(generation, |s| {
                    s.phase = ImportPhase::Failed(ImportFailure::TimedOut(max))
                });
                return;
            }
        }

        let mut task = match api.task_status(&task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "import status read failed");
                shared.apply(generation, |s| {
                    s.phase = ImportPhase::Failed(ImportFailure::Poll(e.user_message()))
                });
                return;
            }
        };
        if task.task_id.is_empty() {
            task.task_id = task_id.clone();
        }

        let status = task.status;
        tracing::debug!(task_id = %task_id, status = %status, "import status");
        let applied = shared.apply(generation, |s| {
            s.polls += 1;
            s.task = Some(task);
            if status.is_terminal() {
                s.phase = if status.is_success() {
                    ImportPhase::Succeeded
                } else {
                    ImportPhase::Failed(ImportFailure::Task(status))
                };
            }
        });
        if !applied || status.is_terminal() {
            return;
        }
    }
}
