//! Runtime settings persisted as a JSON file.
//!
//! [`SettingsStore`] is constructed once at startup and shared. Reads are
//! lock-protected snapshots; writes go to a sibling temp file which is then
//! renamed over the previous file, so a crash never leaves a half-written file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::rate_limiter::{RateLimitConfig, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 500;
pub const MAX_RATE_LIMIT_WINDOW: u32 = 86_400;
pub const MAX_SITE_NAME_LEN: usize = 100;
pub const DEFAULT_SITE_NAME: &str = "Card Manager";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

impl From<SettingsError> for CoreError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid(msg) => CoreError::Validation(msg),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Operator-tunable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub per_page: u32,
    pub rate_limit_requests: u32,
    /// Window length in seconds.
    pub rate_limit_window: u32,
    pub site_name: String,
    /// When false the redemption endpoint answers "disabled" for every request.
    pub api_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            rate_limit_requests: DEFAULT_MAX_REQUESTS,
            rate_limit_window: DEFAULT_WINDOW_SECS,
            site_name: DEFAULT_SITE_NAME.to_string(),
            api_enabled: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=MAX_PER_PAGE).contains(&self.per_page) {
            return Err(SettingsError::Invalid(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        if self.rate_limit_requests == 0 {
            return Err(SettingsError::Invalid(
                "rate_limit_requests must be at least 1".into(),
            ));
        }
        if !(1..=MAX_RATE_LIMIT_WINDOW).contains(&self.rate_limit_window) {
            return Err(SettingsError::Invalid(format!(
                "rate_limit_window must be between 1 and {MAX_RATE_LIMIT_WINDOW} seconds"
            )));
        }
        let name = self.site_name.trim();
        if name.is_empty() || name.chars().count() > MAX_SITE_NAME_LEN {
            return Err(SettingsError::Invalid(format!(
                "site_name must be 1-{MAX_SITE_NAME_LEN} characters"
            )));
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.rate_limit_requests, self.rate_limit_window)
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsPatch {
    pub per_page: Option<u32>,
    pub rate_limit_requests: Option<u32>,
    pub rate_limit_window: Option<u32>,
    pub site_name: Option<String>,
    pub api_enabled: Option<bool>,
}

impl SettingsPatch {
    pub fn apply_to(self, settings: &Settings) -> Settings {
        Settings {
            per_page: self.per_page.unwrap_or(settings.per_page),
            rate_limit_requests: self
                .rate_limit_requests
                .unwrap_or(settings.rate_limit_requests),
            rate_limit_window: self.rate_limit_window.unwrap_or(settings.rate_limit_window),
            site_name: self
                .site_name
                .map(|name| name.trim().to_string())
                .unwrap_or_else(|| settings.site_name.clone()),
            api_enabled: self.api_enabled.unwrap_or(settings.api_enabled),
        }
    }
}

/// File-backed settings with an in-memory current value.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file yields defaults and is not
    /// created until the first update.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = read_file(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    /// A store holding `settings` that persists to `path` on update.
    pub fn with_settings(path: impl Into<PathBuf>, settings: Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            path: path.into(),
            current: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge, validate and persist a patch. On any error nothing changes.
    pub fn update(&self, patch: SettingsPatch) -> Result<Settings, SettingsError> {
        self.update_then(patch, |_| {})
    }

    /// [`update`](Self::update), then run `on_change` with the new settings
    /// before the write lock is released. Concurrent updates therefore apply
    /// their side effects in the same order as they swap the settings.
    pub fn update_then<F>(
        &self,
        patch: SettingsPatch,
        on_change: F,
    ) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&Settings),
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = patch.apply_to(&current);
        next.validate()?;
        write_atomically(&self.path, &next)?;
        *current = next.clone();
        tracing::info!(path = %self.path.display(), "Settings updated");
        on_change(&next);
        Ok(next)
    }

    /// Re-read the file. A failed reload keeps the current settings.
    pub fn reload(&self) -> Result<Settings, SettingsError> {
        self.reload_then(|_| {})
    }

    /// [`reload`](Self::reload) with the same ordering guarantee as
    /// [`update_then`](Self::update_then).
    pub fn reload_then<F>(&self, on_change: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&Settings),
    {
        let next = read_file(&self.path)?;
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = next.clone();
        tracing::info!(path = %self.path.display(), "Settings reloaded");
        on_change(&next);
        Ok(next)
    }
}

fn read_file(path: &Path) -> Result<Settings, SettingsError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let settings: Settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;
    Ok(settings)
}

fn write_atomically(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(io_err)
}
