// Self-update orchestration
// Drives check -> download -> apply through an `UpdateBackend` and forwards every
// lifecycle event to the update window.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::context::BoxFuture;
use crate::windows::{WindowKind, WindowManager};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update already in progress")]
    Busy,
    #[error("no update available to download (state: {0})")]
    NotAvailable(&'static str),
    #[error("update check failed: {0}")]
    Check(String),
    #[error("update download failed: {0}")]
    Download(String),
    #[error("update install failed: {0}")]
    Install(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum UpdateState {
    Idle,
    Checking,
    Available { version: String },
    NotAvailable,
    Downloading { fraction: Option<f64> },
    Downloaded,
}

impl UpdateState {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available { .. } => "available",
            UpdateState::NotAvailable => "not-available",
            UpdateState::Downloading { .. } => "downloading",
            UpdateState::Downloaded => "downloaded",
        }
    }

    fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdateState::Checking | UpdateState::Downloading { .. } | UpdateState::Downloaded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub fraction: Option<f64>,
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn new(downloaded: u64, total: Option<u64>) -> Self {
        let fraction = match total {
            Some(total) if total > 0 => Some((downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        };
        DownloadProgress {
            fraction,
            downloaded,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    Available { version: String },
    NotAvailable,
    DownloadProgress(DownloadProgress),
    Error { message: String },
}

impl UpdateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateEvent::Available { .. } => "update-available",
            UpdateEvent::NotAvailable => "update-not-available",
            UpdateEvent::DownloadProgress(_) => "download-progress",
            UpdateEvent::Error { .. } => "update-error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            UpdateEvent::Available { version } => json!({ "version": version }),
            UpdateEvent::NotAvailable => Value::Null,
            UpdateEvent::DownloadProgress(progress) => json!(progress),
            UpdateEvent::Error { message } => json!({ "message": message }),
        }
    }
}

pub trait UpdateEventSink: Send + Sync {
    fn deliver(&self, event: UpdateEvent);
}

impl UpdateEventSink for WindowManager {
    fn deliver(&self, event: UpdateEvent) {
        if let Err(e) = self.emit(WindowKind::Update, event.name(), event.payload()) {
            debug!("[UPDATER] '{}' not delivered: {}", event.name(), e);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub version: String,
    pub current_version: String,
}

/// Reply to an update check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub available: bool,
    pub version: Option<String>,
    pub current_version: String,
}

pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

pub trait UpdateBackend: Send + Sync {
    fn current_version(&self) -> String;
    fn check(&self) -> BoxFuture<'_, Result<Option<UpdateInfo>, UpdateError>>;
    fn download(&self, on_progress: ProgressCallback) -> BoxFuture<'_, Result<(), UpdateError>>;
    /// Installs the downloaded update and restarts the process.
    fn apply(&self) -> Result<(), UpdateError>;
}

pub struct UpdateOrchestrator {
    backend: Arc<dyn UpdateBackend>,
    sink: Arc<dyn UpdateEventSink>,
    state: Arc<Mutex<UpdateState>>,
}

fn lock_state(state: &Mutex<UpdateState>) -> MutexGuard<'_, UpdateState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl UpdateOrchestrator {
    pub fn new(backend: Arc<dyn UpdateBackend>, sink: Arc<dyn UpdateEventSink>) -> Self {
        UpdateOrchestrator {
            backend,
            sink,
            state: Arc::new(Mutex::new(UpdateState::Idle)),
        }
    }

    pub fn state(&self) -> UpdateState {
        lock_state(&self.state).clone()
    }

    fn set_state(&self, next: UpdateState) {
        let mut state = lock_state(&self.state);
        debug!("[UPDATER] {} -> {}", state.name(), next.name());
        *state = next;
    }

    fn fail(&self, error: &UpdateError) {
        error!("[UPDATER] {}", error);
        self.set_state(UpdateState::Idle);
        self.sink.deliver(UpdateEvent::Error {
            message: error.to_string(),
        });
    }

    pub async fn check_for_updates(&self) -> Result<UpdateCheck, UpdateError> {
        {
            let mut state = lock_state(&self.state);
            if state.is_busy() {
                warn!("[UPDATER] check rejected while {}", state.name());
                return Err(UpdateError::Busy);
            }
            *state = UpdateState::Checking;
        }
        info!("[UPDATER] Checking for updates");

        let current_version = self.backend.current_version();
        match self.backend.check().await {
            Ok(Some(info)) => {
                info!("[UPDATER] Update {} available (current {})", info.version, info.current_version);
                self.set_state(UpdateState::Available {
                    version: info.version.clone(),
                });
                self.sink.deliver(UpdateEvent::Available {
                    version: info.version.clone(),
                });
                Ok(UpdateCheck {
                    available: true,
                    version: Some(info.version),
                    current_version: info.current_version,
                })
            }
            Ok(None) => {
                info!("[UPDATER] Already on the latest version ({})", current_version);
                self.set_state(UpdateState::NotAvailable);
                self.sink.deliver(UpdateEvent::NotAvailable);
                Ok(UpdateCheck {
                    available: false,
                    version: None,
                    current_version,
                })
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Downloads the available update, then applies it and restarts. Only valid
    /// after a check found an update; any other state is left untouched.
    pub async fn start_update(&self) -> Result<(), UpdateError> {
        {
            let mut state = lock_state(&self.state);
            if !matches!(*state, UpdateState::Available { .. }) {
                warn!("[UPDATER] start rejected while {}", state.name());
                return Err(UpdateError::NotAvailable(state.name()));
            }
            *state = UpdateState::Downloading { fraction: None };
        }
        info!("[UPDATER] Downloading update");

        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let on_progress: ProgressCallback = Box::new(move |progress| {
            if let UpdateState::Downloading { fraction } = &mut *lock_state(&state) {
                *fraction = progress.fraction;
            }
            sink.deliver(UpdateEvent::DownloadProgress(progress));
        });

        if let Err(e) = self.backend.download(on_progress).await {
            self.fail(&e);
            return Err(e);
        }

        self.set_state(UpdateState::Downloaded);
        info!("[UPDATER] Update downloaded, applying and restarting");
        if let Err(e) = self.backend.apply() {
            self.fail(&e);
            return Err(e);
        }
        Ok(())
    }
}
