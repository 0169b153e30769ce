// Tauri-backed implementations of the launcher's host traits.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use tauri::image::Image;
use tauri::menu::{IsMenuItem, Menu, MenuItem};
use tauri::tray::{MouseButton, TrayIconBuilder, TrayIconEvent};
use tauri::window::{ProgressBarState, ProgressBarStatus};
use tauri::{AppHandle, Emitter, Manager, Theme, WebviewUrl, WebviewWindowBuilder, WindowEvent, Wry};
use tauri_plugin_updater::{Update, UpdaterExt};
use tokio::sync::oneshot;

use crate::auth::{authorize_url, extract_authorization_code, AuthError, AuthProfile, AuthProvider, TokenExchange};
use crate::config::{ConfigManager, WindowConfig, WindowsConfig};
use crate::context::{BoxFuture, LauncherContext, LauncherHosts, SystemTheme, ThemePreference};
use crate::paths::AppPaths;
use crate::presence::DiscordTransport;
use crate::shutdown::ProcessControl;
use crate::tray::{action_from_menu_id, TrayError, TrayHost, TrayMenuAction, TraySpec, TRAY_ID};
use crate::updater::{DownloadProgress, ProgressCallback, UpdateBackend, UpdateError, UpdateInfo};
use crate::windows::{ProgressState, WindowAction, WindowError, WindowHost, WindowKind};

const LOGIN_WINDOW: &str = "microsoft-login";

fn recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn launcher(app: &AppHandle) -> Option<Arc<LauncherContext>> {
    app.try_state::<Arc<LauncherContext>>().map(|state| state.inner().clone())
}

pub struct TauriWindowHost {
    app: AppHandle,
    windows: WindowsConfig,
    theme: Option<ThemePreference>,
}

impl TauriWindowHost {
    pub fn new(app: AppHandle, windows: WindowsConfig, theme: Option<ThemePreference>) -> Self {
        TauriWindowHost { app, windows, theme }
    }

    fn config_for(&self, kind: WindowKind) -> &WindowConfig {
        match kind {
            WindowKind::Main => &self.windows.main,
            WindowKind::Update => &self.windows.update,
        }
    }

    fn window(&self, kind: WindowKind) -> Result<tauri::WebviewWindow, WindowError> {
        self.app
            .get_webview_window(kind.label())
            .ok_or(WindowError::NotOpen(kind.label()))
    }
}

fn host_error(kind: WindowKind) -> impl Fn(tauri::Error) -> WindowError {
    move |e| WindowError::Host {
        label: kind.label(),
        reason: e.to_string(),
    }
}

impl WindowHost for TauriWindowHost {
    fn build(&self, kind: WindowKind) -> Result<(), WindowError> {
        let config = self.config_for(kind);
        let build_error = |reason: String| WindowError::Build {
            label: kind.label(),
            reason,
        };

        let url = if config.url.contains("://") {
            WebviewUrl::External(config.url.parse().map_err(|e: url::ParseError| build_error(e.to_string()))?)
        } else {
            WebviewUrl::App(PathBuf::from(&config.url))
        };

        let theme = self.theme.map(|preference| match preference {
            ThemePreference::Dark => Theme::Dark,
            ThemePreference::Light => Theme::Light,
        });

        let mut builder = WebviewWindowBuilder::new(&self.app, kind.label(), url)
            .title(&config.title)
            .inner_size(config.width as f64, config.height as f64)
            .min_inner_size(config.min_width as f64, config.min_height as f64)
            .resizable(config.resizable)
            .decorations(config.decorations)
            .theme(theme);
        if config.center {
            builder = builder.center();
        }

        builder.build().map_err(|e| build_error(e.to_string()))?;
        debug!("Built webview window '{}'", kind.label());
        Ok(())
    }

    fn destroy(&self, kind: WindowKind) -> Result<(), WindowError> {
        match self.app.get_webview_window(kind.label()) {
            Some(window) => window.destroy().map_err(host_error(kind)),
            None => Ok(()),
        }
    }

    fn perform(&self, kind: WindowKind, action: WindowAction) -> Result<(), WindowError> {
        let window = self.window(kind)?;
        let to_host = host_error(kind);

        match action {
            WindowAction::Show => window.show().map_err(to_host),
            WindowAction::Focus => window.set_focus().map_err(to_host),
            WindowAction::Hide => window.hide().map_err(to_host),
            WindowAction::Minimize => window.minimize().map_err(to_host),
            WindowAction::ToggleMaximize => {
                if window.is_maximized().map_err(&to_host)? {
                    window.unmaximize().map_err(to_host)
                } else {
                    window.maximize().map_err(to_host)
                }
            }
            WindowAction::Reload => window.eval("window.location.reload()").map_err(to_host),
            WindowAction::OpenDevtools => {
                window.open_devtools();
                Ok(())
            }
            WindowAction::CloseDevtools => {
                window.close_devtools();
                Ok(())
            }
        }
    }

    fn set_progress(&self, kind: WindowKind, progress: ProgressState) -> Result<(), WindowError> {
        let window = self.window(kind)?;
        let state = match progress {
            ProgressState::None => ProgressBarState {
                status: Some(ProgressBarStatus::None),
                progress: None,
            },
            ProgressState::Fraction(fraction) => ProgressBarState {
                status: Some(ProgressBarStatus::Normal),
                progress: Some((fraction * 100.0).round() as u64),
            },
            ProgressState::Indeterminate => ProgressBarState {
                status: Some(ProgressBarStatus::Indeterminate),
                progress: None,
            },
        };
        window.set_progress_bar(state).map_err(host_error(kind))
    }

    fn emit(&self, kind: WindowKind, event: &str, payload: Value) -> Result<(), WindowError> {
        self.app
            .emit_to(kind.label(), event, payload)
            .map_err(host_error(kind))
    }
}

pub struct TauriTrayHost {
    app: AppHandle,
}

impl TauriTrayHost {
    pub fn new(app: AppHandle) -> Self {
        TauriTrayHost { app }
    }
}

impl TrayHost for TauriTrayHost {
    fn create(&self, spec: &TraySpec) -> Result<(), TrayError> {
        let to_tray = |e: tauri::Error| TrayError::Host(e.to_string());

        let items = spec
            .entries
            .iter()
            .map(|entry| MenuItem::with_id(&self.app, entry.action.menu_id(), &entry.label, true, None::<&str>))
            .collect::<tauri::Result<Vec<_>>>()
            .map_err(to_tray)?;
        let item_refs: Vec<&dyn IsMenuItem<Wry>> = items.iter().map(|item| item as &dyn IsMenuItem<Wry>).collect();
        let menu = Menu::with_items(&self.app, &item_refs).map_err(to_tray)?;

        let icon = match &spec.icon_path {
            Some(path) => Some(Image::from_path(path).map_err(to_tray)?),
            None => self.app.default_window_icon().cloned(),
        };

        let mut builder = TrayIconBuilder::with_id(TRAY_ID)
            .menu(&menu)
            .tooltip(&spec.tooltip)
            .show_menu_on_left_click(false)
            .on_menu_event(|app, event| match action_from_menu_id(event.id().as_ref()) {
                Some(action) => {
                    if let Some(ctx) = launcher(app) {
                        ctx.handle_tray_action(action);
                    }
                }
                None => debug!("Unhandled tray menu id: {:?}", event.id()),
            })
            .on_tray_icon_event(|tray, event| {
                if let TrayIconEvent::DoubleClick {
                    button: MouseButton::Left,
                    ..
                } = event
                {
                    if let Some(ctx) = launcher(tray.app_handle()) {
                        ctx.handle_tray_action(TrayMenuAction::Open);
                    }
                }
            });
        if let Some(icon) = icon {
            builder = builder.icon(icon);
        }

        builder.build(&self.app).map_err(to_tray)?;
        Ok(())
    }

    fn destroy(&self) -> Result<(), TrayError> {
        if self.app.remove_tray_by_id(TRAY_ID).is_none() {
            debug!("Tray '{}' was already removed", TRAY_ID);
        }
        Ok(())
    }
}

/// `tauri-plugin-updater` backend. Keeps the pending update between check and
/// download, and the downloaded bytes until they are installed.
pub struct TauriUpdateBackend {
    app: AppHandle,
    pending: Mutex<Option<Update>>,
    downloaded: Mutex<Option<Vec<u8>>>,
}

impl TauriUpdateBackend {
    pub fn new(app: AppHandle) -> Self {
        TauriUpdateBackend {
            app,
            pending: Mutex::new(None),
            downloaded: Mutex::new(None),
        }
    }
}

impl UpdateBackend for TauriUpdateBackend {
    fn current_version(&self) -> String {
        self.app.package_info().version.to_string()
    }

    fn check(&self) -> BoxFuture<'_, Result<Option<UpdateInfo>, UpdateError>> {
        Box::pin(async move {
            let updater = self
                .app
                .updater()
                .map_err(|e| UpdateError::Check(e.to_string()))?;
            let update = updater
                .check()
                .await
                .map_err(|e| UpdateError::Check(e.to_string()))?;

            let info = update.as_ref().map(|update| UpdateInfo {
                version: update.version.clone(),
                current_version: update.current_version.clone(),
            });
            *recover(&self.pending) = update;
            Ok(info)
        })
    }

    fn download(&self, on_progress: ProgressCallback) -> BoxFuture<'_, Result<(), UpdateError>> {
        Box::pin(async move {
            let update = recover(&self.pending)
                .clone()
                .ok_or_else(|| UpdateError::Download("no pending update".to_string()))?;

            let mut received: u64 = 0;
            let bytes = update
                .download(
                    |chunk, total| {
                        received += chunk as u64;
                        on_progress(DownloadProgress::new(received, total));
                    },
                    || debug!("Update download finished"),
                )
                .await
                .map_err(|e| UpdateError::Download(e.to_string()))?;

            info!("Downloaded update {} ({} bytes)", update.version, bytes.len());
            *recover(&self.downloaded) = Some(bytes);
            Ok(())
        })
    }

    fn apply(&self) -> Result<(), UpdateError> {
        let update = recover(&self.pending)
            .take()
            .ok_or_else(|| UpdateError::Install("no pending update".to_string()))?;
        let bytes = recover(&self.downloaded)
            .take()
            .ok_or_else(|| UpdateError::Install("update was not downloaded".to_string()))?;

        update
            .install(bytes)
            .map_err(|e| UpdateError::Install(e.to_string()))?;
        info!("Update {} installed, restarting", update.version);
        self.app.restart()
    }
}

type CodeSender = oneshot::Sender<Result<String, AuthError>>;

fn take_sender(slot: &Mutex<Option<CodeSender>>) -> Option<CodeSender> {
    recover(slot).take()
}

/// Microsoft sign-in through a dedicated webview window.
pub struct MicrosoftLogin {
    app: AppHandle,
    exchange: TokenExchange,
}

impl MicrosoftLogin {
    pub fn new(app: AppHandle, timeout: Duration) -> Result<Self, AuthError> {
        Ok(MicrosoftLogin {
            app,
            exchange: TokenExchange::new(timeout)?,
        })
    }

    fn close_login_window(&self) {
        if let Some(window) = self.app.get_webview_window(LOGIN_WINDOW) {
            if let Err(e) = window.destroy() {
                warn!("[AUTH] Failed to close the sign-in window: {}", e);
            }
        }
    }

    async fn authorization_code(&self, client_id: &str) -> Result<String, AuthError> {
        let url = authorize_url(client_id)?;
        self.close_login_window();

        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(sender)));

        let navigation_slot = slot.clone();
        let window = WebviewWindowBuilder::new(&self.app, LOGIN_WINDOW, WebviewUrl::External(url))
            .title("Microsoft Authentication")
            .inner_size(430.0, 634.0)
            .resizable(false)
            .center()
            .on_navigation(move |target| match extract_authorization_code(target) {
                None => true,
                Some(outcome) => {
                    if let Some(sender) = take_sender(&navigation_slot) {
                        let _ = sender.send(outcome);
                    }
                    false
                }
            })
            .build()
            .map_err(|e| AuthError::Window(e.to_string()))?;

        let close_slot = slot.clone();
        window.on_window_event(move |event| {
            if let WindowEvent::Destroyed = event {
                if let Some(sender) = take_sender(&close_slot) {
                    let _ = sender.send(Err(AuthError::Cancelled));
                }
            }
        });

        let outcome = receiver.await.unwrap_or(Err(AuthError::Cancelled));
        self.close_login_window();
        outcome
    }
}

impl AuthProvider for MicrosoftLogin {
    fn authenticate<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<AuthProfile, AuthError>> {
        Box::pin(async move {
            info!("[AUTH] Starting Microsoft sign-in");
            let code = self.authorization_code(client_id).await?;
            self.exchange.exchange_code(client_id, &code).await
        })
    }
}

pub struct TauriProcess {
    app: AppHandle,
}

impl ProcessControl for TauriProcess {
    fn exit(&self, code: i32) {
        self.app.exit(code);
    }
}

/// Wires every host trait to the running Tauri application.
pub fn build_context(
    app: &AppHandle,
    config_manager: &ConfigManager,
    paths: AppPaths,
    dev_mode: bool,
) -> anyhow::Result<LauncherContext> {
    let config = config_manager.get_config();
    let auth = MicrosoftLogin::new(app.clone(), config_manager.get_auth_timeout())?;

    let hosts = LauncherHosts {
        windows: Arc::new(TauriWindowHost::new(
            app.clone(),
            config.application.windows.clone(),
            config.ui.theme_preference(),
        )),
        tray: Arc::new(TauriTrayHost::new(app.clone())),
        presence: Box::new(DiscordTransport::new(&config.presence.client_id)),
        updates: Arc::new(TauriUpdateBackend::new(app.clone())),
        auth: Arc::new(auth),
        theme: Arc::new(SystemTheme),
        process: Arc::new(TauriProcess { app: app.clone() }),
    };

    Ok(LauncherContext::new(hosts, paths, dev_mode, config.presence.enabled))
}

/// Close requests on launcher windows run the shutdown sequence instead of the
/// default close; runtime teardown of a window drops its registration.
pub fn handle_window_event(window: &tauri::Window, event: &WindowEvent) {
    let Some(kind) = WindowKind::from_label(window.label()) else {
        return;
    };
    let Some(ctx) = launcher(window.app_handle()) else {
        return;
    };

    match event {
        WindowEvent::CloseRequested { api, .. } => {
            api.prevent_close();
            ctx.handle_close_requested(kind);
        }
        WindowEvent::Destroyed => ctx.windows.forget(kind),
        _ => {}
    }
}
