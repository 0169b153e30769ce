// Data directory resolution
// Development runs keep user data inside the working directory; installed
// builds use the OS data directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

pub const DEV_MODE_ENV: &str = "LAUNCHER_ENV";

pub fn is_dev_mode() -> bool {
    std::env::var(DEV_MODE_ENV)
        .map(|value| value.eq_ignore_ascii_case("dev"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub user_data: PathBuf,
    pub app_data: PathBuf,
}

impl AppPaths {
    pub fn resolve(app_name: &str, dev_mode: bool) -> Result<Self> {
        let paths = if dev_mode {
            let root = std::env::current_dir().context("Cannot determine working directory")?;
            Self::development(&root)?
        } else {
            Self::standard(app_name)?
        };
        debug!("User data: {:?}, app data: {:?}", paths.user_data, paths.app_data);
        Ok(paths)
    }

    /// `<root>/data/Launcher` and `<root>/data`, created if missing.
    pub fn development(root: &Path) -> Result<Self> {
        let app_data = root.join("data");
        let user_data = app_data.join("Launcher");
        std::fs::create_dir_all(&user_data)
            .with_context(|| format!("Failed to create {:?}", user_data))?;
        Ok(AppPaths { user_data, app_data })
    }

    pub fn standard(app_name: &str) -> Result<Self> {
        let app_data = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine app data directory"))?;
        Ok(AppPaths {
            user_data: app_data.join(app_name),
            app_data,
        })
    }

    /// Forward slashes on every platform, matching what the UI bundle joins paths with.
    pub fn display(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    pub fn user_data_display(&self) -> String {
        Self::display(&self.user_data)
    }

    pub fn app_data_display(&self) -> String {
        Self::display(&self.app_data)
    }

    /// Relative log directories live under user data.
    pub fn log_dir(&self, configured: &str) -> PathBuf {
        let configured = Path::new(configured);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.user_data.join(configured)
        }
    }
}
