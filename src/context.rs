// Launcher context
// Owns every process-lifetime component and is handed explicitly to the router,
// tray callbacks and window event handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::auth::AuthProvider;
use crate::paths::AppPaths;
use crate::presence::{PresenceBroadcaster, PresenceTransport};
use crate::shutdown::{ProcessControl, ShutdownReport, ShutdownSequencer, ShutdownTrigger};
use crate::tray::{TrayController, TrayError, TrayHost, TrayMenuAction, TraySpec};
use crate::updater::{UpdateBackend, UpdateOrchestrator};
use crate::windows::{WindowAction, WindowError, WindowHandle, WindowHost, WindowKind, WindowManager};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Dark,
    Light,
}

impl ThemePreference {
    /// `dark` and `light` force a theme; anything else (`system`, empty) defers to the OS.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "dark" => Some(ThemePreference::Dark),
            "light" => Some(ThemePreference::Light),
            _ => None,
        }
    }
}

/// OS-reported color scheme.
pub trait ThemeSource: Send + Sync {
    fn prefers_dark(&self) -> bool;
}

/// Asks the desktop environment directly, independent of any theme forced on a window.
pub struct SystemTheme;

impl ThemeSource for SystemTheme {
    fn prefers_dark(&self) -> bool {
        matches!(dark_light::detect(), dark_light::Mode::Dark)
    }
}

pub fn resolve_dark_theme(requested: Option<ThemePreference>, os: &dyn ThemeSource) -> bool {
    match requested {
        Some(ThemePreference::Dark) => true,
        Some(ThemePreference::Light) => false,
        None => os.prefers_dark(),
    }
}

/// Runtime-facing collaborators the context is assembled from.
pub struct LauncherHosts {
    pub windows: Arc<dyn WindowHost>,
    pub tray: Arc<dyn TrayHost>,
    pub presence: Box<dyn PresenceTransport>,
    pub updates: Arc<dyn UpdateBackend>,
    pub auth: Arc<dyn AuthProvider>,
    pub theme: Arc<dyn ThemeSource>,
    pub process: Arc<dyn ProcessControl>,
}

pub struct LauncherContext {
    pub windows: Arc<WindowManager>,
    pub tray: Arc<TrayController>,
    pub presence: Arc<PresenceBroadcaster>,
    pub updates: Arc<UpdateOrchestrator>,
    pub auth: Arc<dyn AuthProvider>,
    pub theme: Arc<dyn ThemeSource>,
    pub process: Arc<dyn ProcessControl>,
    pub paths: AppPaths,
    pub dev_mode: bool,
}

impl LauncherContext {
    pub fn new(hosts: LauncherHosts, paths: AppPaths, dev_mode: bool, presence_enabled: bool) -> Self {
        let windows = Arc::new(WindowManager::new(hosts.windows));
        let updates = Arc::new(UpdateOrchestrator::new(hosts.updates, windows.clone()));

        LauncherContext {
            tray: Arc::new(TrayController::new(hosts.tray)),
            presence: Arc::new(PresenceBroadcaster::new(hosts.presence, presence_enabled)),
            updates,
            windows,
            auth: hosts.auth,
            theme: hosts.theme,
            process: hosts.process,
            paths,
            dev_mode,
        }
    }

    /// Development runs go straight to the launcher; installed builds check for updates first.
    pub fn startup_window(&self) -> WindowKind {
        if self.dev_mode {
            WindowKind::Main
        } else {
            WindowKind::Update
        }
    }

    pub fn open_startup_window(&self) -> Result<WindowHandle, WindowError> {
        let kind = self.startup_window();
        info!("Opening startup window '{}'", kind.label());
        self.windows.create_window(kind)
    }

    pub fn initialize_tray(&self, spec: TraySpec) -> Result<(), TrayError> {
        self.tray.initialize(spec)
    }

    /// Tray menu clicks and the icon double-click land here.
    pub fn handle_tray_action(&self, action: TrayMenuAction) -> Option<ShutdownReport> {
        match action {
            TrayMenuAction::Open => {
                if let Err(e) = self.windows.show_or_create_main() {
                    warn!("Failed to open the main window from the tray: {}", e);
                }
                None
            }
            TrayMenuAction::Close => Some(self.shutdown(ShutdownTrigger::TrayMenu)),
        }
    }

    /// A tracked window asked to close. The default close is replaced by the full shutdown.
    pub fn handle_close_requested(&self, kind: WindowKind) -> ShutdownReport {
        debug!("Close requested on '{}'", kind.label());
        self.shutdown(ShutdownTrigger::WindowClose(kind))
    }

    /// Brings the launcher forward when a second instance is started.
    pub fn focus_existing(&self) {
        let target = WindowKind::ALL
            .into_iter()
            .find(|kind| self.windows.is_open(*kind));

        match target {
            Some(kind) => {
                for action in [WindowAction::Show, WindowAction::Focus] {
                    if let Err(e) = self.windows.control(kind, action) {
                        warn!("Failed to focus '{}': {}", kind.label(), e);
                    }
                }
            }
            None => {
                if let Err(e) = self.windows.show_or_create_main() {
                    warn!("Failed to reopen the main window: {}", e);
                }
            }
        }
    }

    pub fn is_dark_theme(&self, requested: Option<ThemePreference>) -> bool {
        resolve_dark_theme(requested, self.theme.as_ref())
    }

    pub fn shutdown(&self, trigger: ShutdownTrigger) -> ShutdownReport {
        ShutdownSequencer {
            presence: &self.presence,
            windows: &self.windows,
            tray: &self.tray,
            process: self.process.as_ref(),
        }
        .run(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTheme(bool);

    impl ThemeSource for FixedTheme {
        fn prefers_dark(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_theme_preference_parse() {
        assert_eq!(ThemePreference::parse("dark"), Some(ThemePreference::Dark));
        assert_eq!(ThemePreference::parse(" Light "), Some(ThemePreference::Light));
        assert_eq!(ThemePreference::parse("system"), None);
        assert_eq!(ThemePreference::parse(""), None);
    }

    #[test]
    fn test_explicit_theme_ignores_os() {
        for os_dark in [true, false] {
            let os = FixedTheme(os_dark);
            assert!(resolve_dark_theme(Some(ThemePreference::Dark), &os));
            assert!(!resolve_dark_theme(Some(ThemePreference::Light), &os));
            assert_eq!(resolve_dark_theme(None, &os), os_dark);
        }
    }

    #[test]
    fn test_system_theme_reads_the_desktop() {
        let expected = matches!(dark_light::detect(), dark_light::Mode::Dark);
        assert_eq!(SystemTheme.prefers_dark(), expected);
        assert_eq!(resolve_dark_theme(None, &SystemTheme), expected);
    }
}
