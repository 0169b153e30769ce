use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tauri::{Manager, RunEvent, State};
use log::{info, error, debug, warn};

pub mod auth;
pub mod config;
pub mod context;
pub mod paths;
pub mod presence;
pub mod router;
pub mod shutdown;
pub mod status;
pub mod tray;
pub mod updater;
pub mod windows;
mod logger;
mod shell;

use config::{AppConfig, ConfigManager};
use context::LauncherContext;
use paths::AppPaths;
use presence::PresenceTemplate;
use router::{BridgeFailure, RouterReply, UiMessage};
use status::{MinecraftPing, StatusPoller};
use tray::TraySpec;

// Application state
pub struct AppState {
    config_manager: Mutex<ConfigManager>,
    log_dir: PathBuf,
}

fn reply_value(reply: RouterReply) -> serde_json::Value {
    serde_json::to_value(&reply).unwrap_or_else(|e| {
        error!("[BACKEND] Failed to serialize reply: {}", e);
        serde_json::to_value(BridgeFailure::new(e.to_string())).unwrap_or_default()
    })
}

// Tauri commands
#[tauri::command]
async fn ui_send(ctx: State<'_, Arc<LauncherContext>>, message: serde_json::Value) -> Result<(), String> {
    let message = UiMessage::parse(message).map_err(|e| {
        warn!("[BACKEND] {}", e);
        e.to_string()
    })?;
    let ctx = Arc::clone(&ctx);
    tauri::async_runtime::spawn(async move {
        let name = message.name();
        let reply = router::dispatch(&ctx, message).await;
        if let RouterReply::Failure(failure) = reply {
            warn!("[BACKEND] '{}' failed: {}", name, failure.message);
        }
    });
    Ok(())
}

#[tauri::command]
async fn ui_invoke(ctx: State<'_, Arc<LauncherContext>>, message: serde_json::Value) -> Result<serde_json::Value, String> {
    let reply = match UiMessage::parse(message) {
        Ok(message) => router::dispatch(&ctx, message).await,
        Err(e) => {
            warn!("[BACKEND] {}", e);
            RouterReply::Failure(e.into())
        }
    };
    Ok(reply_value(reply))
}

/// Entry point for the channel names the UI bundle uses.
#[tauri::command]
async fn ui_dispatch(
    ctx: State<'_, Arc<LauncherContext>>,
    channel: String,
    payload: Option<serde_json::Value>,
) -> Result<serde_json::Value, String> {
    let message = match UiMessage::from_channel(&channel, payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("[BACKEND] {}", e);
            return Ok(reply_value(RouterReply::Failure(e.into())));
        }
    };

    if message.expects_reply() {
        return Ok(reply_value(router::dispatch(&ctx, message).await));
    }

    let ctx = Arc::clone(&ctx);
    tauri::async_runtime::spawn(async move {
        if let RouterReply::Failure(failure) = router::dispatch(&ctx, message).await {
            warn!("[BACKEND] '{}' failed: {}", channel, failure.message);
        }
    });
    Ok(serde_json::Value::Null)
}

#[tauri::command]
async fn get_platform() -> Result<String, String> {
    Ok(std::env::consts::OS.to_string())
}

#[tauri::command]
async fn get_config(state: State<'_, AppState>) -> Result<AppConfig, String> {
    let config_manager = state.config_manager.lock().map_err(|e| {
        error!("[BACKEND] Failed to acquire config manager lock: {}", e);
        "Internal error: Failed to access configuration".to_string()
    })?;
    Ok(config_manager.get_config().clone())
}

/// Re-reads the configuration files. Running components keep the settings they started with.
#[tauri::command]
async fn reload_config(state: State<'_, AppState>) -> Result<AppConfig, String> {
    let mut config_manager = state.config_manager.lock().map_err(|e| {
        error!("[BACKEND] Failed to acquire config manager lock: {}", e);
        "Internal error: Failed to access configuration".to_string()
    })?;
    config_manager.reload().map_err(|e| {
        warn!("[BACKEND] Configuration reload failed: {:#}", e);
        format!("Failed to reload configuration: {}", e)
    })?;
    Ok(config_manager.get_config().clone())
}

fn start_launcher(
    app: &tauri::AppHandle,
    config_manager: &ConfigManager,
    paths: AppPaths,
    dev_mode: bool,
) -> anyhow::Result<()> {
    let config = config_manager.get_config();
    let ctx = Arc::new(shell::build_context(app, config_manager, paths, dev_mode)?);
    app.manage(ctx.clone());

    ctx.open_startup_window()?;

    if config_manager.is_tray_enabled() {
        let tray = &config.application.system_tray;
        let spec = TraySpec::new(
            &tray.tooltip,
            tray.icon_path.as_ref().map(PathBuf::from),
            &tray.open_label,
            &tray.close_label,
        );
        if let Err(e) = ctx.initialize_tray(spec) {
            error!("[BACKEND] Failed to create tray icon: {}", e);
        }
    }

    let template = PresenceTemplate::from_config(&config.presence);
    let poller = Arc::new(StatusPoller::new(
        Arc::new(MinecraftPing::from_config(&config.server)),
        ctx.presence.clone(),
        template.clone(),
        config_manager.get_poll_interval(),
    ));
    let presence = ctx.presence.clone();
    let starting = template.starting(poller.started_at());
    tauri::async_runtime::spawn_blocking(move || presence.update_presence(&starting));
    poller.spawn();

    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let config_manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("[BACKEND] Failed to load configuration, using built-in defaults: {}", e);
            let fallback_dir = std::env::temp_dir().join("blockhaven-launcher");
            match ConfigManager::new_with_paths(
                fallback_dir.clone(),
                fallback_dir.join("default.json"),
                fallback_dir.join("user.json"),
            ) {
                Ok(manager) => manager,
                Err(e) => panic!("Cannot start launcher without a configuration: {}", e),
            }
        }
    };
    let config = config_manager.get_config().clone();

    let dev_mode = paths::is_dev_mode();
    let paths = match AppPaths::resolve(&config.application.name, dev_mode) {
        Ok(paths) => paths,
        Err(e) => panic!("Cannot resolve launcher data directories: {}", e),
    };

    let log_dir = paths.log_dir(&config.logging.log_dir);
    if let Err(e) = logger::Logger::setup_logging(&config.logging, &log_dir) {
        eprintln!("[BACKEND] Failed to setup file logging: {}", e);
        env_logger::init();
        error!("[BACKEND] Falling back to basic logging due to setup error: {}", e);
    } else {
        info!("[BACKEND] File logging initialized successfully");
    }

    info!("[BACKEND] Starting {} (dev mode: {})", config.application.name, dev_mode);
    debug!("[BACKEND] Config directory: {:?}", config_manager.get_config_dir());

    let app_state = AppState {
        config_manager: Mutex::new(config_manager),
        log_dir,
    };

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, argv, _cwd| {
            info!("[BACKEND] Second instance started with {:?}, focusing launcher", argv);
            if let Some(ctx) = app.try_state::<Arc<LauncherContext>>() {
                ctx.focus_existing();
            }
        }))
        .plugin(tauri_plugin_updater::Builder::new().build())
        .plugin(tauri_plugin_process::init())
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            ui_send,
            ui_invoke,
            ui_dispatch,
            get_platform,
            get_config,
            reload_config,
            logger::log_frontend_debug,
            logger::log_frontend_info,
            logger::log_frontend_warn,
            logger::log_frontend_error,
            logger::get_log_files_list,
        ])
        .on_window_event(shell::handle_window_event)
        .setup(move |app| {
            info!("[BACKEND] Setting up launcher");
            let state = app.state::<AppState>();
            let config_manager = state
                .config_manager
                .lock()
                .map_err(|e| anyhow::anyhow!("config manager lock poisoned: {}", e))?;
            start_launcher(app.handle(), &config_manager, paths, dev_mode)?;
            info!("[BACKEND] Launcher setup completed");
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|_app, event| {
        // With every window gone the launcher lives on in the tray until an explicit quit
        if let RunEvent::ExitRequested { code: None, api, .. } = event {
            debug!("[BACKEND] Keeping the launcher alive in the tray");
            api.prevent_exit();
        }
    });
}
