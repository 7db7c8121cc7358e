//! Configuration for the update agent.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/zelly-updater/updater.toml`
//! - macOS: `~/Library/Application Support/uz.zelly.zelly-updater/updater.toml`
//! - Windows: `%APPDATA%\zelly\zelly-updater\config\updater.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Main updater configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Where staged artifacts, backups and lock files live
    #[serde(default)]
    pub paths: PathsConfig,

    /// Download behaviour
    #[serde(default)]
    pub download: DownloadConfig,

    /// How to wait for the host application to let go of its files
    #[serde(default)]
    pub app_exit: AppExitConfig,

    /// Installation behaviour
    #[serde(default)]
    pub install: InstallConfig,

    /// Version service used by `check`
    #[serde(default)]
    pub version: VersionConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or from the default location if one exists.
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, UpdateError> {
        match custom_path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform-specific default config file.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("uz", "zelly", "zelly-updater")
            .map(|dirs| dirs.config_dir().join("updater.toml"))
    }

    /// Reject values the agent cannot work with.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.download.timeout_secs == 0 {
            return Err(UpdateError::Config(
                "download.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.download.connect_timeout_secs == 0 {
            return Err(UpdateError::Config(
                "download.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.app_exit.poll_interval_ms == 0 {
            return Err(UpdateError::Config(
                "app_exit.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.install.executable.trim().is_empty() {
            return Err(UpdateError::Config(
                "install.executable must not be empty".to_string(),
            ));
        }
        if Path::new(&self.install.executable).is_absolute() {
            return Err(UpdateError::Config(
                "install.executable must be relative to the install path".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(UpdateError::Config(format!(
                "invalid log level '{}', valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if let Some(endpoint) = &self.version.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(UpdateError::Config(format!(
                    "invalid version endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        Ok(())
    }
}

/// CLI overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Executable override
    pub executable: Option<String>,
    /// Version endpoint override
    pub endpoint: Option<String>,
    /// Keep the backup after a successful install
    pub keep_backup: Option<bool>,
    /// Verbose flag override
    pub verbose: Option<bool>,
    /// Debug flag override
    pub debug: Option<bool>,
}

impl UpdaterConfig {
    /// Apply CLI overrides to configuration.
    ///
    /// CLI arguments take precedence over config file values.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref executable) = overrides.executable {
            self.install.executable = executable.clone();
        }
        if let Some(ref endpoint) = overrides.endpoint {
            self.version.endpoint = Some(endpoint.clone());
        }
        if let Some(keep) = overrides.keep_backup {
            self.install.keep_backup = keep;
        }
        if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        self
    }
}

/// Working directories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for downloaded artifacts (empty = temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Directory for install snapshots (empty = temp dir)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Directory for per-install lock files (empty = temp dir)
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| default_work_dir().join("staging"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| default_work_dir().join("backup"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| default_work_dir().join("locks"))
    }
}

/// Network configuration for downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-read timeout while streaming, in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Deadline for one complete download attempt, in seconds
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts after a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts, in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            timeout_secs: default_download_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Host-application exit wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppExitConfig {
    /// Fixed pause before probing, in milliseconds
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Give up after this many seconds of probing
    #[serde(default = "default_exit_timeout")]
    pub timeout_secs: u64,

    /// Delay between lock attempts, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// File inside the install path to poll (empty = the executable)
    #[serde(default)]
    pub marker: Option<String>,
}

impl Default for AppExitConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            timeout_secs: default_exit_timeout(),
            poll_interval_ms: default_poll_interval(),
            marker: None,
        }
    }
}

/// Installation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Application executable, relative to the install path
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Keep the backup after a successful install
    #[serde(default)]
    pub keep_backup: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            keep_backup: false,
        }
    }
}

/// Version service settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionConfig {
    /// Full URL of the version-check endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_download_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000
}

fn default_user_agent() -> String {
    format!("zelly-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_grace_period() -> u64 {
    3000
}

fn default_exit_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    250
}

fn default_executable() -> String {
    format!("tezzro{}", std::env::consts::EXE_SUFFIX)
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("zelly-updater")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_app_exit_section_keeps_grace_default() {
        let config: UpdaterConfig = toml::from_str("[app_exit]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(config.app_exit.timeout_secs, 5);
        assert_eq!(config.app_exit.grace_period_ms, 3000);
    }

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::default();
        assert_eq!(config.download.timeout_secs, 600);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.app_exit.timeout_secs, 30);
        assert_eq!(config.app_exit.grace_period_ms, 3000);
        assert!(config.app_exit.marker.is_none());
        assert!(!config.install.keep_backup);
        assert!(config.install.executable.starts_with("tezzro"));
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: UpdaterConfig = toml::from_str("").unwrap();
        assert_eq!(config, UpdaterConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config: UpdaterConfig = toml::from_str(
            r#"
            [download]
            max_retries = 0

            [install]
            executable = "pos/tezzro.exe"
            keep_backup = true
            "#,
        )
        .unwrap();

        assert_eq!(config.download.max_retries, 0);
        assert_eq!(config.download.timeout_secs, 600);
        assert_eq!(config.install.executable, "pos/tezzro.exe");
        assert!(config.install.keep_backup);
    }

    #[test]
    fn test_default_paths_under_temp() {
        let paths = PathsConfig::default();
        let root = std::env::temp_dir().join("zelly-updater");
        assert_eq!(paths.staging_dir(), root.join("staging"));
        assert_eq!(paths.backup_dir(), root.join("backup"));
        assert_eq!(paths.lock_dir(), root.join("locks"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = UpdaterConfig::default();
        config.download.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.install.executable = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.version.endpoint = Some("ftp://updates.example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.app_exit.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("updater.toml");

        let mut config = UpdaterConfig::default();
        config.paths.backup_dir = Some(temp.path().join("backups"));
        config.version.endpoint = Some("https://updates.example.com/check".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = UpdaterConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_cli_overrides() {
        let overrides = CliOverrides {
            executable: Some("bin/tezzro".to_string()),
            endpoint: Some("http://127.0.0.1:8000/check".to_string()),
            keep_backup: Some(true),
            verbose: Some(true),
            debug: Some(true),
        };

        let config = UpdaterConfig::default().with_overrides(&overrides);
        assert_eq!(config.install.executable, "bin/tezzro");
        assert_eq!(
            config.version.endpoint.as_deref(),
            Some("http://127.0.0.1:8000/check")
        );
        assert!(config.install.keep_backup);
        // Debug wins over verbose
        assert_eq!(config.logging.level, "debug");

        let untouched = UpdaterConfig::default().with_overrides(&CliOverrides::default());
        assert_eq!(untouched, UpdaterConfig::default());
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("updater.toml");
        std::fs::write(&path, "[download\nmax_retries = ").unwrap();

        let result = UpdaterConfig::load_from_file(&path);
        assert!(matches!(result, Err(UpdateError::Config(_))));
    }
}
