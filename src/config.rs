use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, Context};
use log::{info, warn, debug, error};

use crate::context::ThemePreference;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: String,
    pub application: ApplicationConfig,
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub windows: WindowsConfig,
    pub system_tray: SystemTrayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    pub main: WindowConfig,
    pub update: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Relative app path (`launcher.html`) or an absolute http(s) URL.
    pub url: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub resizable: bool,
    pub decorations: bool,
    pub center: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTrayConfig {
    pub enabled: bool,
    pub tooltip: String,
    pub icon_path: Option<String>,
    #[serde(default = "default_open_label")]
    pub open_label: String,
    #[serde(default = "default_close_label")]
    pub close_label: String,
}

fn default_open_label() -> String {
    "Open Launcher".to_string()
}

fn default_close_label() -> String {
    "Close".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    pub poll_interval_seconds: u64,
    #[serde(default = "default_status_timeout")]
    pub timeout_seconds: u64,
}

fn default_protocol_version() -> i32 {
    767
}

fn default_status_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub enabled: bool,
    pub client_id: String,
    pub headline: String,
    pub large_image_key: String,
    pub large_image_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub console: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_max_log_size_mb")]
    pub max_log_size_mb: u64,
    #[serde(default = "default_file_rotation")]
    pub file_rotation: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_max_log_size_mb() -> u64 {
    10
}

fn default_file_rotation() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// `system`, `dark` or `light`.
    pub theme: String,
}

impl UiConfig {
    /// Theme forced by configuration; `None` follows the OS.
    pub fn theme_preference(&self) -> Option<ThemePreference> {
        ThemePreference::parse(&self.theme)
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
    config_dir: PathBuf,
    default_config_path: PathBuf,
    user_config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_directory()?;
        let default_config_path = config_dir.join("default.json");
        let user_config_path = config_dir.join("user.json");

        Self::new_with_paths(config_dir, default_config_path, user_config_path)
    }

    pub fn new_with_paths(config_dir: PathBuf, default_config_path: PathBuf, user_config_path: PathBuf) -> Result<Self> {
        debug!("Config directory: {:?}", config_dir);
        debug!("Default config path: {:?}", default_config_path);
        debug!("User config path: {:?}", user_config_path);

        let config = Self::load_merged_config(&default_config_path, &user_config_path)?;

        Ok(ConfigManager {
            config,
            config_dir,
            default_config_path,
            user_config_path,
        })
    }

    fn get_config_directory() -> Result<PathBuf> {
        let exe_dir = std::env::current_exe()?
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
            .to_path_buf();

        // Development builds run from target/<profile>, next to the project's config/
        let possible_paths = vec![
            exe_dir.join("config"),
            exe_dir.join("../config"),
            exe_dir.join("../../config"),
            exe_dir.join("../../../config"),
        ];

        for path in possible_paths {
            if path.exists() && path.is_dir() {
                debug!("Found config directory: {:?}", path);
                return Ok(path);
            }
        }

        let config_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine app data directory"))?
            .join("BlockHaven Launcher")
            .join("config");
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        info!("Created config directory: {:?}", config_dir);
        Ok(config_dir)
    }

    fn load_merged_config(default_path: &PathBuf, user_path: &PathBuf) -> Result<AppConfig> {
        let mut config: AppConfig = if default_path.exists() {
            match std::fs::read_to_string(default_path) {
                Ok(default_content) => {
                    match serde_json::from_str(&default_content) {
                        Ok(parsed_config) => {
                            info!("Loaded default configuration from {:?}", default_path);
                            parsed_config
                        }
                        Err(e) => {
                            error!("Failed to parse default configuration: {}", e);
                            return Err(anyhow::anyhow!("Failed to parse default configuration: {}", e));
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to read default config from {:?}: {}. Using built-in defaults.", default_path, e);
                    AppConfig::default()
                }
            }
        } else {
            info!("No default config found at {:?}, using built-in defaults", default_path);
            AppConfig::default()
        };

        if user_path.exists() {
            let user_content = std::fs::read_to_string(user_path)
                .with_context(|| format!("Failed to read user config from {:?}", user_path))?;

            let user_config: serde_json::Value = serde_json::from_str(&user_content)
                .with_context(|| "Failed to parse user configuration")?;

            let default_json = serde_json::to_value(&config)?;
            let merged_json = Self::merge_json_values(default_json, user_config);
            config = serde_json::from_value(merged_json)
                .with_context(|| "Failed to deserialize merged configuration")?;

            info!("Merged user configuration from {:?}", user_path);
        } else {
            info!("No user configuration found at {:?}", user_path);
        }

        Self::validate_config(&config)?;

        Ok(config)
    }

    fn merge_json_values(default: serde_json::Value, user: serde_json::Value) -> serde_json::Value {
        use serde_json::Value;

        match (default, user) {
            (Value::Object(mut default_map), Value::Object(user_map)) => {
                for (key, user_value) in user_map {
                    let merged_value = match default_map.get(&key) {
                        Some(default_value) => {
                            Self::merge_json_values(default_value.clone(), user_value)
                        }
                        None => user_value,
                    };
                    default_map.insert(key, merged_value);
                }
                Value::Object(default_map)
            }
            // Arrays and scalars from the user file replace the default outright
            (_, user_value) => user_value,
        }
    }

    fn validate_window(name: &str, window: &WindowConfig) -> Result<()> {
        if window.url.is_empty() {
            return Err(anyhow::anyhow!("Window URL cannot be empty for '{}'", name));
        }

        if window.url.contains("://") {
            let parsed = url::Url::parse(&window.url)
                .with_context(|| format!("Invalid URL for window '{}': {}", name, window.url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow::anyhow!("Invalid URL scheme for window '{}': {}", name, parsed.scheme()));
            }
        } else if window.url.starts_with('/') || window.url.contains(':') {
            return Err(anyhow::anyhow!("Invalid URL for window '{}': {}", name, window.url));
        }

        if window.width == 0 || window.height == 0 {
            return Err(anyhow::anyhow!("Window size must be positive for '{}'", name));
        }
        Ok(())
    }

    fn validate_config(config: &AppConfig) -> Result<()> {
        Self::validate_window("main", &config.application.windows.main)?;
        Self::validate_window("update", &config.application.windows.update)?;

        if config.server.host.trim().is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }
        if config.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if config.server.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Server poll interval must be at least 1 second"));
        }
        if config.server.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Server status timeout must be at least 1 second"));
        }

        if config.presence.enabled && config.presence.client_id.is_empty() {
            warn!("Presence is enabled but no client id is configured");
        }

        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {},
            _ => return Err(anyhow::anyhow!("Invalid logging level: {}", config.logging.level)),
        }

        match config.ui.theme.to_lowercase().as_str() {
            "system" | "light" | "dark" => {},
            _ => return Err(anyhow::anyhow!("Invalid UI theme: {}", config.ui.theme)),
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn reload(&mut self) -> Result<()> {
        info!("Reloading configuration");
        self.config = Self::load_merged_config(&self.default_config_path, &self.user_config_path)?;
        Ok(())
    }

    pub fn get_config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn get_poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.server.poll_interval_seconds)
    }

    pub fn get_auth_timeout(&self) -> Duration {
        Duration::from_secs(self.config.auth.timeout_seconds)
    }

    pub fn is_tray_enabled(&self) -> bool {
        self.config.application.system_tray.enabled
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            application: ApplicationConfig {
                name: "BlockHaven Launcher".to_string(),
                windows: WindowsConfig {
                    main: WindowConfig {
                        url: "launcher.html".to_string(),
                        title: "BlockHaven Launcher".to_string(),
                        width: 1280,
                        height: 795,
                        min_width: 980,
                        min_height: 552,
                        resizable: true,
                        decorations: false,
                        center: true,
                    },
                    update: WindowConfig {
                        url: "index.html".to_string(),
                        title: "BlockHaven Updater".to_string(),
                        width: 400,
                        height: 500,
                        min_width: 400,
                        min_height: 500,
                        resizable: false,
                        decorations: false,
                        center: true,
                    },
                },
                system_tray: SystemTrayConfig {
                    enabled: true,
                    tooltip: "BlockHaven".to_string(),
                    icon_path: None,
                    open_label: default_open_label(),
                    close_label: default_close_label(),
                },
            },
            server: ServerConfig {
                host: "play.blockhaven.net".to_string(),
                port: 25565,
                protocol_version: default_protocol_version(),
                poll_interval_seconds: 15,
                timeout_seconds: default_status_timeout(),
            },
            presence: PresenceConfig {
                enabled: true,
                client_id: "1410084470450684034".to_string(),
                headline: "Playing on BlockHaven".to_string(),
                large_image_key: "logo".to_string(),
                large_image_text: "BlockHaven".to_string(),
            },
            auth: AuthConfig {
                timeout_seconds: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                console: true,
                log_dir: default_log_dir(),
                max_log_size_mb: default_max_log_size_mb(),
                file_rotation: default_file_rotation(),
            },
            ui: UiConfig {
                theme: "system".to_string(),
            },
        }
    }
}
