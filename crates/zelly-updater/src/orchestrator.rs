//! Update orchestrator.
//!
//! Drives one [`UpdateRequest`] through the session state machine:
//!
//! ```text
//! Idle → Preparing → Downloading → AwaitingAppExit → [BackingUp] → Installing → Launching → Completed
//!   └──────────┴───────────┴───────────────┴──────────────┴─────────────┴───────────┴──→ Failed(stage)
//! ```
//!
//! Every error is turned into a [`StageFailure`] here; `run` itself never
//! fails. A failed install is rolled back from the snapshot taken in
//! `BackingUp` (or, for a fresh install, by removing the partial
//! directory). Rollback trouble is logged and recorded in the report but
//! the install error stays the reported cause.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupManager, BackupSnapshot};
use crate::config::UpdaterConfig;
use crate::download::{DownloadProgress, Downloader, DownloaderConfig, ProgressCallback};
use crate::error::UpdateError;
use crate::install::{ArchiveInstaller, Installer};
use crate::launch::{Launcher, ProcessHandle, ProcessLauncher};
use crate::lock::{AppExitWatch, InstallLock};
use crate::paths::InstallKey;
use crate::request::UpdateRequest;
use crate::session::{
    Rollback, Stage, StageFailure, UpdateOutcome, UpdateReport, UpdateSession, UpdateState,
};
use crate::status::{StatusEvent, StatusSink};
use crate::tree;

/// Runs update sessions.
pub struct UpdateOrchestrator {
    config: UpdaterConfig,
    downloader: Downloader,
    installer: Box<dyn Installer>,
    launcher: Box<dyn Launcher>,
    backups: BackupManager,
    exit_watch: AppExitWatch,
    status: StatusSink,
}

impl UpdateOrchestrator {
    /// Build an orchestrator with the default installer and launcher.
    pub fn new(config: UpdaterConfig) -> Result<Self, UpdateError> {
        config.validate()?;

        let downloader = Downloader::new(DownloaderConfig::from(&config.download))?;
        let installer = Box::new(ArchiveInstaller::new(config.install.executable.clone()));
        let backups = BackupManager::new(config.paths.backup_dir());
        let exit_watch = AppExitWatch::from(&config.app_exit);

        Ok(Self {
            downloader,
            installer,
            launcher: Box::new(ProcessLauncher::new()),
            backups,
            exit_watch,
            status: StatusSink::new(),
            config,
        })
    }

    /// Replace the installer.
    pub fn with_installer(mut self, installer: Box<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    /// Replace the launcher.
    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Receive status events for every subsequent run.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Executable that gets relaunched for `install_path`.
    pub fn executable_path(&self, install_path: &Path) -> PathBuf {
        install_path.join(&self.config.install.executable)
    }

    /// File polled while waiting for the host application to exit.
    pub fn exit_marker(&self, install_path: &Path) -> PathBuf {
        let marker = self
            .config
            .app_exit
            .marker
            .as_deref()
            .unwrap_or(&self.config.install.executable);
        install_path.join(marker)
    }

    /// Run one update session to a terminal state.
    pub async fn run(&self, request: UpdateRequest, cancel: CancellationToken) -> UpdateReport {
        let mut session = UpdateSession::new();

        if let Err(e) = request.validate() {
            warn!("Rejected update request: {}", e);
            return self.conclude(session, Err(StageFailure::new(Stage::Preparing, e)), &request);
        }

        self.enter(&mut session, UpdateState::Preparing);
        let install_path = request.install_path();
        let lock = match InstallLock::acquire(install_path, &self.config.paths.lock_dir()) {
            Ok(lock) => lock,
            Err(e) => {
                return self.conclude(session, Err(StageFailure::new(Stage::Preparing, e)), &request)
            }
        };

        let key = InstallKey::new(install_path);
        let staged = key.staging_file(&self.config.paths.staging_dir());
        info!(
            "Updating {:?} from {} (key {})",
            install_path,
            request.current_version(),
            key
        );

        let result = self.execute(&mut session, &request, &staged, &cancel).await;

        remove_staged(&staged).await;
        drop(lock);
        self.conclude(session, result, &request)
    }

    async fn execute(
        &self,
        session: &mut UpdateSession,
        request: &UpdateRequest,
        staged: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessHandle, StageFailure> {
        let install_path = request.install_path();

        if cancel.is_cancelled() {
            return Err(StageFailure::new(Stage::Preparing, UpdateError::Cancelled));
        }

        self.enter(session, UpdateState::Downloading);
        let bytes = self
            .download_with_retries(request.download_url(), staged, cancel)
            .await
            .map_err(|e| StageFailure::new(Stage::Downloading, e))?;
        debug!("Staged {} bytes at {:?}", bytes, staged);

        self.enter(session, UpdateState::AwaitingAppExit);
        self.exit_watch
            .wait_for_release(&self.exit_marker(install_path), cancel)
            .await
            .map_err(|e| StageFailure::new(Stage::AwaitingAppExit, e))?;

        // Last point at which cancelling is honoured.
        if cancel.is_cancelled() {
            return Err(StageFailure::new(Stage::AwaitingAppExit, UpdateError::Cancelled));
        }

        let existed = install_path.exists();
        if existed {
            self.enter(session, UpdateState::BackingUp);
            let snapshot = self
                .snapshot(install_path)
                .await
                .map_err(|e| StageFailure::new(Stage::BackingUp, e))?;
            info!("Backed up {} files", snapshot.file_count());
            session.backup = Some(snapshot);
        } else {
            info!("{:?} does not exist yet; skipping backup", install_path);
        }

        self.enter(session, UpdateState::Installing);
        if let Err(e) = self.installer.install(staged, install_path).await {
            error!("Install failed: {}", e);
            let rollback = self
                .roll_back(session.backup.as_ref(), install_path, existed)
                .await;
            return Err(StageFailure {
                stage: Stage::Installing,
                error: e,
                rollback,
            });
        }

        if !self.config.install.keep_backup {
            if let Some(snapshot) = session.backup.take() {
                if let Err(e) = self.backups.discard(&snapshot) {
                    warn!("Failed to discard backup {:?}: {}", snapshot.location, e);
                }
            }
        }

        self.enter(session, UpdateState::Launching);
        self.launcher
            .launch(&self.executable_path(install_path))
            .map_err(|e| StageFailure::new(Stage::Launching, e))
    }

    async fn download_with_retries(
        &self,
        url: &str,
        staged: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, UpdateError> {
        let sink = self.status.clone();
        let progress: ProgressCallback =
            Arc::new(move |p: DownloadProgress| sink.emit(StatusEvent::Progress(p)));

        let max_retries = self.config.download.max_retries;
        let backoff = self.config.download.retry_backoff();
        let mut attempt = 0u32;

        loop {
            match self
                .downloader
                .download_with(url, staged, cancel, Some(&progress))
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        "Download attempt {} of {} failed: {}",
                        attempt,
                        max_retries + 1,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn snapshot(&self, install_path: &Path) -> Result<BackupSnapshot, UpdateError> {
        let backups = self.backups.clone();
        let source = install_path.to_path_buf();
        tokio::task::spawn_blocking(move || backups.snapshot(&source)).await?
    }

    async fn roll_back(
        &self,
        snapshot: Option<&BackupSnapshot>,
        install_path: &Path,
        existed: bool,
    ) -> Rollback {
        let result = match snapshot {
            Some(snapshot) => {
                warn!("Restoring previous installation");
                let backups = self.backups.clone();
                let snapshot = snapshot.clone();
                match tokio::task::spawn_blocking(move || backups.restore(&snapshot)).await {
                    Ok(restored) => restored.map(|_| Rollback::Restored),
                    Err(join) => Err(join.into()),
                }
            }
            None if !existed => {
                warn!("Removing partial installation at {:?}", install_path);
                tree::remove_path(install_path).map(|_| Rollback::RemovedPartial)
            }
            None => Ok(Rollback::NotAttempted),
        };

        match result {
            Ok(rollback) => {
                info!("Rollback finished: {:?}", rollback);
                rollback
            }
            Err(e) => {
                error!("Rollback also failed: {}", e);
                Rollback::Failed(e.to_string())
            }
        }
    }

    /// Restore the retained backup of `install_path`.
    pub async fn rollback(&self, install_path: &Path) -> Result<BackupSnapshot, UpdateError> {
        info!("Manual rollback requested for {:?}", install_path);
        let _lock = InstallLock::acquire(install_path, &self.config.paths.lock_dir())?;

        let backups = self.backups.clone();
        let path = install_path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<BackupSnapshot, UpdateError> {
            let snapshot = backups
                .latest(&path)?
                .ok_or_else(|| UpdateError::NoBackup(path.clone()))?;
            backups.restore(&snapshot)?;
            Ok(snapshot)
        })
        .await?
    }

    fn enter(&self, session: &mut UpdateSession, state: UpdateState) {
        session.advance(state);
        self.status.emit(StatusEvent::entered(state));
    }

    fn conclude(
        &self,
        mut session: UpdateSession,
        result: Result<ProcessHandle, StageFailure>,
        request: &UpdateRequest,
    ) -> UpdateReport {
        match result {
            Ok(process) => {
                let version = request.display_version().to_string();
                session.advance(UpdateState::Completed);
                info!("Update to {} complete", version);
                self.status.emit(StatusEvent::completed(version.clone()));
                session.finish(UpdateOutcome::Completed { version, process })
            }
            Err(failure) => {
                session.advance(UpdateState::Failed(failure.stage));
                if failure.installation_updated() {
                    warn!("Installed, but relaunch failed: {}", failure.error);
                } else {
                    error!("Update {}", failure);
                }
                self.status
                    .emit(StatusEvent::failed(failure.stage, &failure.error));
                session.finish(UpdateOutcome::Failed(failure))
            }
        }
    }
}

/// Remove the staged artifact and its per-install directory.
async fn remove_staged(staged: &Path) {
    if let Err(e) = tokio::fs::remove_file(staged).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staged artifact {:?}: {}", staged, e);
        }
    }
    if let Some(dir) = staged.parent() {
        // Only succeeds when empty.
        let _ = tokio::fs::remove_dir(dir).await;
    }
}
