// Window manager
// Owns the registry of the two launcher windows (main, update) and forwards
// window operations to the host UI runtime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Main,
    Update,
}

impl WindowKind {
    pub const ALL: [WindowKind; 2] = [WindowKind::Main, WindowKind::Update];

    pub fn label(self) -> &'static str {
        match self {
            WindowKind::Main => "main",
            WindowKind::Update => "update",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "main" => Some(WindowKind::Main),
            "update" => Some(WindowKind::Update),
            _ => None,
        }
    }
}

/// Taskbar progress indicator of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum ProgressState {
    None,
    Fraction(f64),
    Indeterminate,
}

impl ProgressState {
    /// `progress / size`, clamped to [0, 1]. A zero or invalid size means no progress.
    pub fn from_ratio(progress: f64, size: f64) -> Self {
        if !progress.is_finite() || !size.is_finite() || size <= 0.0 {
            return ProgressState::None;
        }
        ProgressState::Fraction((progress / size).clamp(0.0, 1.0))
    }
}

/// Operations applied to a live window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowAction {
    Show,
    Focus,
    Hide,
    Minimize,
    ToggleMaximize,
    Reload,
    OpenDevtools,
    CloseDevtools,
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("window '{0}' is not open")]
    NotOpen(&'static str),
    #[error("window '{0}' is already being opened")]
    Opening(&'static str),
    #[error("failed to build window '{label}': {reason}")]
    Build { label: &'static str, reason: String },
    #[error("window '{label}' operation failed: {reason}")]
    Host { label: &'static str, reason: String },
}

/// The UI runtime side of window management.
pub trait WindowHost: Send + Sync {
    fn build(&self, kind: WindowKind) -> Result<(), WindowError>;
    fn destroy(&self, kind: WindowKind) -> Result<(), WindowError>;
    fn perform(&self, kind: WindowKind, action: WindowAction) -> Result<(), WindowError>;
    fn set_progress(&self, kind: WindowKind, progress: ProgressState) -> Result<(), WindowError>;
    fn emit(&self, kind: WindowKind, event: &str, payload: Value) -> Result<(), WindowError>;
}

/// Live window registration. Present in the registry only while the window is open.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHandle {
    pub kind: WindowKind,
    pub progress: ProgressState,
}

#[derive(Default)]
struct Registry {
    open: HashMap<WindowKind, WindowHandle>,
    building: HashSet<WindowKind>,
}

pub struct WindowManager {
    host: Arc<dyn WindowHost>,
    registry: Mutex<Registry>,
}

impl WindowManager {
    pub fn new(host: Arc<dyn WindowHost>) -> Self {
        WindowManager {
            host,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the live handle for `kind`, building the window first if needed.
    /// A concurrent call for a window still being built fails with `Opening`.
    pub fn create_window(&self, kind: WindowKind) -> Result<WindowHandle, WindowError> {
        {
            let mut registry = self.registry();
            if let Some(handle) = registry.open.get(&kind) {
                debug!("[WINDOWS] '{}' already open, reusing handle", kind.label());
                return Ok(handle.clone());
            }
            if !registry.building.insert(kind) {
                return Err(WindowError::Opening(kind.label()));
            }
        }

        // Built outside the lock; runtime window events re-enter the registry
        let built = self.host.build(kind);

        let mut registry = self.registry();
        registry.building.remove(&kind);
        built?;
        let handle = registry
            .open
            .entry(kind)
            .or_insert_with(|| WindowHandle {
                kind,
                progress: ProgressState::None,
            })
            .clone();
        info!("[WINDOWS] Created '{}' window", kind.label());
        Ok(handle)
    }

    pub fn get_window(&self, kind: WindowKind) -> Option<WindowHandle> {
        self.registry().open.get(&kind).cloned()
    }

    pub fn is_open(&self, kind: WindowKind) -> bool {
        self.registry().open.contains_key(&kind)
    }

    /// Releases the window if it is live. Returns false when there was nothing to destroy.
    pub fn destroy_window(&self, kind: WindowKind) -> bool {
        let removed = self.registry().open.remove(&kind);
        if removed.is_none() {
            debug!("[WINDOWS] destroy '{}' skipped: not open", kind.label());
            return false;
        }

        if let Err(e) = self.host.destroy(kind) {
            warn!("[WINDOWS] Failed to destroy '{}': {}", kind.label(), e);
        } else {
            info!("[WINDOWS] Destroyed '{}' window", kind.label());
        }
        true
    }

    /// Drops the registration of a window the runtime already tore down.
    pub fn forget(&self, kind: WindowKind) {
        if self.registry().open.remove(&kind).is_some() {
            debug!("[WINDOWS] '{}' closed by the runtime", kind.label());
        }
    }

    /// Shows and focuses the main window, creating it when absent.
    pub fn show_or_create_main(&self) -> Result<WindowHandle, WindowError> {
        match self.get_window(WindowKind::Main) {
            Some(handle) => {
                self.host.perform(WindowKind::Main, WindowAction::Show)?;
                self.host.perform(WindowKind::Main, WindowAction::Focus)?;
                Ok(handle)
            }
            None => self.create_window(WindowKind::Main),
        }
    }

    pub fn control(&self, kind: WindowKind, action: WindowAction) -> Result<(), WindowError> {
        if !self.is_open(kind) {
            return Err(WindowError::NotOpen(kind.label()));
        }
        self.host.perform(kind, action)
    }

    pub fn set_progress(&self, kind: WindowKind, progress: ProgressState) -> Result<(), WindowError> {
        if !self.is_open(kind) {
            return Err(WindowError::NotOpen(kind.label()));
        }
        self.host.set_progress(kind, progress)?;
        if let Some(handle) = self.registry().open.get_mut(&kind) {
            handle.progress = progress;
        }
        Ok(())
    }

    pub fn emit(&self, kind: WindowKind, event: &str, payload: Value) -> Result<(), WindowError> {
        if !self.is_open(kind) {
            return Err(WindowError::NotOpen(kind.label()));
        }
        self.host.emit(kind, event, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        built: Mutex<Vec<WindowKind>>,
        destroyed: Mutex<Vec<WindowKind>>,
        actions: Mutex<Vec<(WindowKind, WindowAction)>>,
    }

    impl WindowHost for CountingHost {
        fn build(&self, kind: WindowKind) -> Result<(), WindowError> {
            self.built.lock().unwrap().push(kind);
            Ok(())
        }

        fn destroy(&self, kind: WindowKind) -> Result<(), WindowError> {
            self.destroyed.lock().unwrap().push(kind);
            Ok(())
        }

        fn perform(&self, kind: WindowKind, action: WindowAction) -> Result<(), WindowError> {
            self.actions.lock().unwrap().push((kind, action));
            Ok(())
        }

        fn set_progress(&self, _kind: WindowKind, _progress: ProgressState) -> Result<(), WindowError> {
            Ok(())
        }

        fn emit(&self, _kind: WindowKind, _event: &str, _payload: Value) -> Result<(), WindowError> {
            Ok(())
        }
    }

    /// Blocks inside `build` until released.
    struct StallingHost {
        builds: Mutex<usize>,
        stalled: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl WindowHost for StallingHost {
        fn build(&self, _kind: WindowKind) -> Result<(), WindowError> {
            *self.builds.lock().unwrap() += 1;
            self.stalled.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(())
        }

        fn destroy(&self, _kind: WindowKind) -> Result<(), WindowError> {
            Ok(())
        }

        fn perform(&self, _kind: WindowKind, _action: WindowAction) -> Result<(), WindowError> {
            Ok(())
        }

        fn set_progress(&self, _kind: WindowKind, _progress: ProgressState) -> Result<(), WindowError> {
            Ok(())
        }

        fn emit(&self, _kind: WindowKind, _event: &str, _payload: Value) -> Result<(), WindowError> {
            Ok(())
        }
    }

    fn manager() -> (Arc<CountingHost>, WindowManager) {
        let host = Arc::new(CountingHost::default());
        let manager = WindowManager::new(host.clone());
        (host, manager)
    }

    #[test]
    fn test_create_window_reuses_live_handle() {
        let (host, manager) = manager();

        manager.create_window(WindowKind::Main).unwrap();
        manager.create_window(WindowKind::Main).unwrap();

        assert_eq!(*host.built.lock().unwrap(), vec![WindowKind::Main]);
        assert!(manager.is_open(WindowKind::Main));
        assert!(!manager.is_open(WindowKind::Update));
    }

    #[test]
    fn test_concurrent_create_builds_once() {
        let (stalled_tx, stalled_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let host = Arc::new(StallingHost {
            builds: Mutex::new(0),
            stalled: Mutex::new(stalled_tx),
            release: Mutex::new(release_rx),
        });
        let manager = Arc::new(WindowManager::new(host.clone()));

        let first = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.create_window(WindowKind::Main))
        };
        stalled_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = manager.create_window(WindowKind::Main);
        assert!(matches!(second, Err(WindowError::Opening("main"))));
        assert!(!manager.is_open(WindowKind::Main));

        release_tx.send(()).unwrap();
        first.join().unwrap().unwrap();

        assert!(manager.is_open(WindowKind::Main));
        manager.create_window(WindowKind::Main).unwrap();
        assert_eq!(*host.builds.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_build_can_be_retried() {
        struct FlakyHost(Mutex<usize>);

        impl WindowHost for FlakyHost {
            fn build(&self, kind: WindowKind) -> Result<(), WindowError> {
                let mut attempts = self.0.lock().unwrap();
                *attempts += 1;
                if *attempts == 1 {
                    return Err(WindowError::Build {
                        label: kind.label(),
                        reason: "no display".into(),
                    });
                }
                Ok(())
            }
            fn destroy(&self, _kind: WindowKind) -> Result<(), WindowError> {
                Ok(())
            }
            fn perform(&self, _kind: WindowKind, _action: WindowAction) -> Result<(), WindowError> {
                Ok(())
            }
            fn set_progress(&self, _kind: WindowKind, _progress: ProgressState) -> Result<(), WindowError> {
                Ok(())
            }
            fn emit(&self, _kind: WindowKind, _event: &str, _payload: Value) -> Result<(), WindowError> {
                Ok(())
            }
        }

        let manager = WindowManager::new(Arc::new(FlakyHost(Mutex::new(0))));
        assert!(matches!(manager.create_window(WindowKind::Update), Err(WindowError::Build { .. })));
        assert!(!manager.is_open(WindowKind::Update));
        manager.create_window(WindowKind::Update).unwrap();
        assert!(manager.is_open(WindowKind::Update));
    }

    #[test]
    fn test_destroy_absent_window_is_noop() {
        let (host, manager) = manager();

        assert!(!manager.destroy_window(WindowKind::Update));
        assert!(host.destroyed.lock().unwrap().is_empty());

        manager.create_window(WindowKind::Update).unwrap();
        assert!(manager.destroy_window(WindowKind::Update));
        assert!(!manager.destroy_window(WindowKind::Update));
        assert_eq!(*host.destroyed.lock().unwrap(), vec![WindowKind::Update]);
    }

    #[test]
    fn test_create_destroy_sequences_keep_one_handle() {
        let (host, manager) = manager();
        let steps = [true, true, false, false, true, false, true, true, false];

        for create in steps {
            if create {
                manager.create_window(WindowKind::Main).unwrap();
            } else {
                manager.destroy_window(WindowKind::Main);
            }
            let built = host.built.lock().unwrap().len();
            let destroyed = host.destroyed.lock().unwrap().len();
            let live = built - destroyed;
            assert!(live <= 1);
            assert_eq!(live == 1, manager.is_open(WindowKind::Main));
        }
    }

    #[test]
    fn test_get_window_never_constructs() {
        let (host, manager) = manager();
        assert!(manager.get_window(WindowKind::Main).is_none());
        assert!(host.built.lock().unwrap().is_empty());
    }

    #[test]
    fn test_show_or_create_main() {
        let (host, manager) = manager();

        manager.show_or_create_main().unwrap();
        assert_eq!(host.built.lock().unwrap().len(), 1);
        assert!(host.actions.lock().unwrap().is_empty());

        manager.show_or_create_main().unwrap();
        assert_eq!(host.built.lock().unwrap().len(), 1);
        assert_eq!(
            *host.actions.lock().unwrap(),
            vec![
                (WindowKind::Main, WindowAction::Show),
                (WindowKind::Main, WindowAction::Focus)
            ]
        );
    }

    #[test]
    fn test_control_requires_open_window() {
        let (_host, manager) = manager();
        let result = manager.control(WindowKind::Main, WindowAction::Hide);
        assert!(matches!(result, Err(WindowError::NotOpen("main"))));
    }

    #[test]
    fn test_progress_is_recorded_on_handle() {
        let (_host, manager) = manager();
        manager.create_window(WindowKind::Update).unwrap();

        manager
            .set_progress(WindowKind::Update, ProgressState::from_ratio(25.0, 100.0))
            .unwrap();

        let handle = manager.get_window(WindowKind::Update).unwrap();
        assert_eq!(handle.progress, ProgressState::Fraction(0.25));
    }

    #[test]
    fn test_progress_ratio_edges() {
        assert_eq!(ProgressState::from_ratio(5.0, 0.0), ProgressState::None);
        assert_eq!(ProgressState::from_ratio(150.0, 100.0), ProgressState::Fraction(1.0));
        assert_eq!(ProgressState::from_ratio(-1.0, 10.0), ProgressState::Fraction(0.0));
        assert_eq!(ProgressState::from_ratio(f64::NAN, 10.0), ProgressState::None);
    }

    #[test]
    fn test_window_labels_round_trip() {
        for kind in WindowKind::ALL {
            assert_eq!(WindowKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(WindowKind::from_label("microsoft-login"), None);
    }
}
