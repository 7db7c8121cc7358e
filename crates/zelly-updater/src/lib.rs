//! # zelly-updater
//!
//! Self-update agent for Zelly applications.
//!
//! The host application starts this agent with the install path, the
//! artifact URL and its own version, then exits. The agent:
//! - downloads the artifact to a staging file
//! - waits until the host has released its files
//! - snapshots the current installation
//! - swaps the new build into place, rolling back on failure
//! - relaunches the application
//!
//! Progress is published as [`StatusEvent`]s; the outcome of a run is an
//! [`UpdateReport`].

pub mod backup;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod install;
pub mod launch;
pub mod lock;
pub mod orchestrator;
pub mod paths;
#[cfg(test)]
mod proptests;
pub mod request;
pub mod session;
pub mod status;
pub mod tree;
pub mod version_client;

// Re-export main types for convenience
pub use backup::{BackupManager, BackupSnapshot};
pub use cli::Cli;
pub use config::{CliOverrides, UpdaterConfig};
pub use download::{DownloadProgress, Downloader, DownloaderConfig, ProgressCallback};
pub use error::UpdateError;
pub use install::{ArchiveInstaller, ArtifactKind, Installer};
pub use launch::{Launcher, ProcessHandle, ProcessLauncher};
pub use lock::{AppExitWatch, InstallLock};
pub use orchestrator::UpdateOrchestrator;
pub use paths::InstallKey;
pub use request::UpdateRequest;
pub use session::{
    Rollback, Stage, StageFailure, UpdateOutcome, UpdateReport, UpdateSession, UpdateState,
};
pub use status::{spawn_console_renderer, StatusEvent, StatusSink};
pub use version_client::VersionClient;

/// Exit codes for the agent process.
///
/// The host application reads these to decide what to tell the user:
/// - 0: Success - update installed and application relaunched
/// - 1: General error
/// - 2: Invalid input - bad arguments or request
/// - 3: Download failed - nothing was changed
/// - 4: Application still running - nothing was changed
/// - 5: Backup failed - nothing was changed
/// - 6: Install failed - previous installation restored where possible
/// - 7: Launch failed - new version installed but not started
/// - 8: Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Update installed and relaunched (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Invalid input provided (exit code 2)
    InvalidInput = 2,
    /// Artifact download failed (exit code 3)
    DownloadFailed = 3,
    /// Host application did not exit in time (exit code 4)
    AppStillRunning = 4,
    /// Backup of the installation failed (exit code 5)
    BackupFailed = 5,
    /// Installation failed (exit code 6)
    InstallFailed = 6,
    /// Relaunch failed after a successful install (exit code 7)
    LaunchFailed = 7,
    /// Cancelled by the caller (exit code 8)
    Cancelled = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::DownloadFailed => "DOWNLOAD_FAILED",
            ExitCode::AppStillRunning => "APP_STILL_RUNNING",
            ExitCode::BackupFailed => "BACKUP_FAILED",
            ExitCode::InstallFailed => "INSTALL_FAILED",
            ExitCode::LaunchFailed => "LAUNCH_FAILED",
            ExitCode::Cancelled => "CANCELLED",
        }
    }

    /// Get a human-readable description of the exit code
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Update installed and application restarted",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::InvalidInput => "Invalid arguments or update request",
            ExitCode::DownloadFailed => "The update could not be downloaded",
            ExitCode::AppStillRunning => "The application did not close in time",
            ExitCode::BackupFailed => "The current installation could not be backed up",
            ExitCode::InstallFailed => "The update could not be installed",
            ExitCode::LaunchFailed => "The update was installed but the application did not start",
            ExitCode::Cancelled => "The update was cancelled",
        }
    }
}
