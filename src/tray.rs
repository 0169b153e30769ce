// System tray integration module
// Owns the single tray icon and maps its menu entries to launcher actions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use thiserror::Error;

pub const TRAY_ID: &str = "launcher-tray";
pub const TRAY_MENU_OPEN: &str = "tray_open";
pub const TRAY_MENU_CLOSE: &str = "tray_close";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayMenuAction {
    Open,
    Close,
}

impl TrayMenuAction {
    pub fn menu_id(self) -> &'static str {
        match self {
            TrayMenuAction::Open => TRAY_MENU_OPEN,
            TrayMenuAction::Close => TRAY_MENU_CLOSE,
        }
    }
}

pub fn action_from_menu_id(menu_id: &str) -> Option<TrayMenuAction> {
    match menu_id {
        TRAY_MENU_OPEN => Some(TrayMenuAction::Open),
        TRAY_MENU_CLOSE => Some(TrayMenuAction::Close),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrayMenuEntry {
    pub label: String,
    pub action: TrayMenuAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraySpec {
    pub icon_path: Option<PathBuf>,
    pub tooltip: String,
    pub entries: Vec<TrayMenuEntry>,
}

impl TraySpec {
    pub fn new(tooltip: &str, icon_path: Option<PathBuf>, open_label: &str, close_label: &str) -> Self {
        TraySpec {
            icon_path,
            tooltip: tooltip.to_string(),
            entries: vec![
                TrayMenuEntry {
                    label: open_label.to_string(),
                    action: TrayMenuAction::Open,
                },
                TrayMenuEntry {
                    label: close_label.to_string(),
                    action: TrayMenuAction::Close,
                },
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum TrayError {
    #[error("tray icon is already initialized")]
    AlreadyInitialized,
    #[error("tray host error: {0}")]
    Host(String),
}

pub trait TrayHost: Send + Sync {
    fn create(&self, spec: &TraySpec) -> Result<(), TrayError>;
    fn destroy(&self) -> Result<(), TrayError>;
}

pub struct TrayController {
    host: Arc<dyn TrayHost>,
    live: Mutex<Option<TraySpec>>,
}

impl TrayController {
    pub fn new(host: Arc<dyn TrayHost>) -> Self {
        TrayController {
            host,
            live: Mutex::new(None),
        }
    }

    fn live(&self) -> MutexGuard<'_, Option<TraySpec>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the tray icon. Rejected while an icon is already live.
    pub fn initialize(&self, spec: TraySpec) -> Result<(), TrayError> {
        let mut live = self.live();
        if live.is_some() {
            warn!("[TRAY] initialize rejected: tray already live");
            return Err(TrayError::AlreadyInitialized);
        }

        self.host.create(&spec)?;
        info!("[TRAY] Tray icon created ({} menu entries)", spec.entries.len());
        *live = Some(spec);
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }

    /// Releases the icon if present. Returns false when there was nothing to release.
    pub fn destroy(&self) -> bool {
        let Some(_spec) = self.live().take() else {
            debug!("[TRAY] destroy skipped: no tray icon");
            return false;
        };

        match self.host.destroy() {
            Ok(()) => info!("[TRAY] Tray icon destroyed"),
            Err(e) => warn!("[TRAY] Failed to destroy tray icon: {}", e),
        }
        true
    }
}
