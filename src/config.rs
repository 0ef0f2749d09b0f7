use std::ffi::OsString;
use std::path::PathBuf;

use crate::errors::{ClipError, Result};

/// Overrides the data directory, mainly for tests and portable installs.
pub const HOME_ENV: &str = "CLIPSTACK_HOME";

const APP_DIR: &str = "clipstack";

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub history_file: PathBuf,
    pub settings_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub tui_log_file: PathBuf,
    pub models_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let base = resolve_base(std::env::var_os(HOME_ENV), dirs::data_dir())
            .or_else(|| dirs::home_dir().map(|h| h.join(format!(".{APP_DIR}"))))
            .ok_or_else(|| {
                ClipError::InvalidInput(format!(
                    "could not determine a data directory; set {HOME_ENV}"
                ))
            })?;
        Ok(Self::from_base(base))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            history_file: base.join("history.json"),
            settings_file: base.join("settings.json"),
            pid_file: base.join("watcher.pid"),
            log_file: base.join("watcher.log"),
            tui_log_file: base.join("tui.log"),
            models_dir: base.join("models"),
            base_dir: base,
        }
    }
}

fn resolve_base(env_override: Option<OsString>, data_dir: Option<PathBuf>) -> Option<PathBuf> {
    match env_override {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => data_dir.map(|d| d.join(APP_DIR)),
    }
}
