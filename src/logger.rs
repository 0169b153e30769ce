use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use chrono::Utc;
use log::{debug, info, warn, error, LevelFilter};
use fern::Dispatch;
use tauri::State;

use crate::config::LoggingConfig;
use crate::AppState;

const LOG_FILE_PREFIX: &str = "launcher_";

pub struct Logger {
    log_dir: PathBuf,
    max_size_mb: u64,
}

fn is_launcher_log(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|s| s.to_str()) == Some("log")
        && path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .starts_with(LOG_FILE_PREFIX)
}

impl Logger {
    pub fn new(config: &LoggingConfig, log_dir: &Path) -> Result<Self> {
        if !log_dir.exists() {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;
        }

        let logger = Logger {
            log_dir: log_dir.to_path_buf(),
            max_size_mb: config.max_log_size_mb,
        };

        if config.file_rotation {
            logger.cleanup_old_logs()?;
        }

        Ok(logger)
    }

    /// Installs the global dispatcher. `log_dir` is the already-resolved log directory.
    pub fn setup_logging(config: &LoggingConfig, log_dir: &Path) -> Result<()> {
        let log_level = Self::parse_log_level(&config.level)?;

        let mut dispatch = Dispatch::new()
            .level(log_level)
            // Window/webview internals are noisy at debug
            .level_for("tao", LevelFilter::Warn)
            .level_for("wry", LevelFilter::Warn)
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] [{}] [{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    std::thread::current().name().unwrap_or("main"),
                    message
                ))
            });

        if config.console {
            dispatch = dispatch.chain(std::io::stdout());
        }

        let mut log_file_path = None;
        if config.file_rotation {
            let logger = Self::new(config, log_dir)?;
            let path = match &config.file_path {
                Some(file_path) => PathBuf::from(file_path),
                None => logger.create_log_file_path()?,
            };
            dispatch = dispatch.chain(
                fern::log_file(&path)
                    .with_context(|| format!("Failed to create log file: {:?}", path))?
            );
            log_file_path = Some(path);
        }

        dispatch.apply()
            .with_context(|| "Failed to initialize logger")?;

        info!("Logger initialized with level: {}", config.level);
        if let Some(path) = log_file_path {
            info!("Logging to file: {:?}", path);
        }
        Ok(())
    }

    fn parse_log_level(level: &str) -> Result<LevelFilter> {
        match level.to_lowercase().as_str() {
            "error" => Ok(LevelFilter::Error),
            "warn" | "warning" => Ok(LevelFilter::Warn),
            "info" => Ok(LevelFilter::Info),
            "debug" => Ok(LevelFilter::Debug),
            "trace" => Ok(LevelFilter::Trace),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", level)),
        }
    }

    fn create_log_file_path(&self) -> Result<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}{}.log", LOG_FILE_PREFIX, timestamp);

        if !self.log_dir.exists() {
            fs::create_dir_all(&self.log_dir)
                .with_context(|| format!("Failed to create log directory: {:?}", self.log_dir))?;
        }

        Ok(self.log_dir.join(filename))
    }

    /// Deletes the oldest log files until the directory fits in `max_log_size_mb`.
    pub fn cleanup_old_logs(&self) -> Result<()> {
        debug!("Cleaning up old log files in {:?}", self.log_dir);

        if !self.log_dir.exists() {
            return Ok(());
        }

        let mut log_files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let path = entry?.path();
            if is_launcher_log(&path) {
                let metadata = fs::metadata(&path)?;
                let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                log_files.push((path, metadata.len(), modified));
            }
        }

        // Newest first, so the most recent files survive
        log_files.sort_by(|a, b| b.2.cmp(&a.2));

        let max_size_bytes = self.max_size_mb * 1024 * 1024;
        let mut current_size: u64 = 0;

        for (path, size, _) in log_files {
            if current_size + size > max_size_bytes {
                match fs::remove_file(&path) {
                    Ok(_) => info!("Removed old log file: {:?}", path),
                    Err(e) => warn!("Failed to remove old log file {:?}: {}", path, e),
                }
            } else {
                current_size += size;
            }
        }

        if current_size > 0 {
            debug!("Log directory size after cleanup: {:.2} MB", current_size as f64 / (1024.0 * 1024.0));
        }

        Ok(())
    }

    /// File names of the launcher's log files, newest first.
    pub fn list_log_files(log_dir: &Path) -> Result<Vec<String>> {
        let mut log_files = Vec::new();

        if !log_dir.exists() {
            return Ok(log_files);
        }

        for entry in fs::read_dir(log_dir)
            .with_context(|| format!("Failed to read log directory {:?}", log_dir))?
        {
            let path = entry?.path();
            if is_launcher_log(&path) {
                if let Some(filename) = path.file_name().and_then(|s| s.to_str()) {
                    log_files.push(filename.to_string());
                }
            }
        }

        // Names embed the timestamp
        log_files.sort();
        log_files.reverse();

        Ok(log_files)
    }
}

// Tauri commands for frontend logging
#[tauri::command]
pub async fn log_frontend_debug(message: String) -> Result<(), String> {
    debug!("[FRONTEND] {}", message);
    Ok(())
}

#[tauri::command]
pub async fn log_frontend_info(message: String) -> Result<(), String> {
    info!("[FRONTEND] {}", message);
    Ok(())
}

#[tauri::command]
pub async fn log_frontend_warn(message: String) -> Result<(), String> {
    warn!("[FRONTEND] {}", message);
    Ok(())
}

#[tauri::command]
pub async fn log_frontend_error(message: String) -> Result<(), String> {
    error!("[FRONTEND] {}", message);
    Ok(())
}

#[tauri::command]
pub async fn get_log_files_list(state: State<'_, AppState>) -> Result<Vec<String>, String> {
    Logger::list_log_files(&state.log_dir).map_err(|e| format!("Failed to list log files: {}", e))
}
