use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ClipError, Result};

pub const DEFAULT_RETENTION_LIMIT: u32 = 20;
pub const MIN_RETENTION_LIMIT: u32 = 1;
pub const MAX_RETENTION_LIMIT: u32 = 500;

pub fn clamp_retention_limit(requested: i64) -> u32 {
    requested.clamp(MIN_RETENTION_LIMIT as i64, MAX_RETENTION_LIMIT as i64) as u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retention_limit: u32,
    /// fastembed model name; only consulted with the `semantic` feature.
    pub embedding_model: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_limit: DEFAULT_RETENTION_LIMIT,
            embedding_model: None,
        }
    }
}

pub trait SettingsStore: Send {
    fn retention_limit(&self) -> u32;
    fn set_retention_limit(&self, limit: u32) -> Result<()>;
}

pub struct JsonSettings {
    path: PathBuf,
    current: Mutex<Settings>,
}

impl JsonSettings {
    /// Missing or corrupt files fall back to defaults.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring corrupt settings");
                Settings::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                Settings::default()
            }
        };
        Self {
            path,
            current: Mutex::new(current),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.current
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn write(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(settings)?)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettings {
    fn retention_limit(&self) -> u32 {
        clamp_retention_limit(self.snapshot().retention_limit as i64)
    }

    fn set_retention_limit(&self, limit: u32) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|e| ClipError::Worker(format!("settings lock poisoned: {e}")))?;
        current.retention_limit = limit;
        self.write(&current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clamp_retention_limit() {
        assert_eq!(clamp_retention_limit(0), 1);
        assert_eq!(clamp_retention_limit(-5), 1);
        assert_eq!(clamp_retention_limit(20), 20);
        assert_eq!(clamp_retention_limit(501), 500);
        assert_eq!(clamp_retention_limit(i64::MAX), 500);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = JsonSettings::open(dir.path().join("settings.json"));
        assert_eq!(settings.retention_limit(), DEFAULT_RETENTION_LIMIT);
        assert!(settings.snapshot().embedding_model.is_none());
    }

    #[test]
    fn test_limit_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        JsonSettings::open(&path).set_retention_limit(42).unwrap();
        assert_eq!(JsonSettings::open(&path).retention_limit(), 42);
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "][").unwrap();
        assert_eq!(JsonSettings::open(&path).retention_limit(), DEFAULT_RETENTION_LIMIT);
    }

    #[test]
    fn test_out_of_range_file_value_is_clamped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"retention_limit": 9000}"#).unwrap();
        assert_eq!(JsonSettings::open(&path).retention_limit(), MAX_RETENTION_LIMIT);
    }
}
