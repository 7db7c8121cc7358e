//! Install-path locking and the host-exit watch.
//!
//! [`InstallLock`] keeps two sessions from working on one installation:
//! an in-process registry catches callers sharing this process, and an
//! advisory lock file catches other agent processes. The lock file is
//! deleted again on release.
//!
//! [`AppExitWatch`] decides when the host application has let go of its
//! files by repeatedly trying to take an exclusive lock on a marker file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashSet;
use fs2::FileExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::AppExitConfig;
use crate::error::UpdateError;
use crate::paths::InstallKey;

fn active_sessions() -> &'static DashSet<PathBuf> {
    static ACTIVE: OnceLock<DashSet<PathBuf>> = OnceLock::new();
    ACTIVE.get_or_init(DashSet::new)
}

/// Exclusive claim on an install path, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    install_path: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
}

impl InstallLock {
    /// Claim `install_path`, failing with `SessionInProgress` if it is taken.
    pub fn acquire(install_path: &Path, lock_dir: &Path) -> Result<Self, UpdateError> {
        let key = InstallKey::new(install_path);
        let normalized = key.normalized().to_path_buf();

        if !active_sessions().insert(normalized.clone()) {
            return Err(UpdateError::SessionInProgress(install_path.to_path_buf()));
        }

        match Self::lock_file(&key, lock_dir) {
            Ok((file, lock_path)) => {
                debug!("Locked {:?} via {:?}", normalized, lock_path);
                Ok(Self {
                    install_path: normalized,
                    lock_path,
                    file: Some(file),
                })
            }
            Err(e) => {
                active_sessions().remove(&normalized);
                match e {
                    UpdateError::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock => {
                        Err(UpdateError::SessionInProgress(install_path.to_path_buf()))
                    }
                    other => Err(other),
                }
            }
        }
    }

    fn lock_file(key: &InstallKey, lock_dir: &Path) -> Result<(File, PathBuf), UpdateError> {
        std::fs::create_dir_all(lock_dir)?;
        let lock_path = key.lock_file(lock_dir);

        // A releasing holder deletes the file; locking the unlinked copy
        // would not exclude anyone, so reopen in that case.
        for _ in 0..3 {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;

            if file.try_lock_exclusive().is_err() {
                break;
            }
            if still_linked(&file, &lock_path) {
                return Ok((file, lock_path));
            }
            trace!("Lock file {:?} was removed while locking, retrying", lock_path);
        }

        Err(UpdateError::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "install path locked by another process",
        )))
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Whether `file` is still the file found at `path`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

fn remove_lock_file(path: &Path) {
    // Best effort; a leftover file is reused by the next session.
    let _ = std::fs::remove_file(path);
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Unix can unlink an open file, so delete while still holding it.
            #[cfg(unix)]
            remove_lock_file(&self.lock_path);

            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {:?}: {}", self.lock_path, e);
            }
            drop(file);

            #[cfg(not(unix))]
            remove_lock_file(&self.lock_path);
        }
        active_sessions().remove(&self.install_path);
        debug!("Released lock on {:?}", self.install_path);
    }
}

/// Waits until a marker file can be locked exclusively.
#[derive(Debug, Clone)]
pub struct AppExitWatch {
    grace_period: Duration,
    timeout: Duration,
    poll_interval: Duration,
}

impl From<&AppExitConfig> for AppExitWatch {
    fn from(config: &AppExitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.grace_period_ms),
            Duration::from_secs(config.timeout_secs),
            Duration::from_millis(config.poll_interval_ms),
        )
    }
}

impl AppExitWatch {
    pub fn new(grace_period: Duration, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            grace_period,
            timeout,
            poll_interval,
        }
    }

    /// Sleep the grace period, then poll `marker` until it is free.
    ///
    /// A missing marker counts as free. Fails with `AppStillRunning` once
    /// the timeout passes, or `Cancelled` if `cancel` fires first.
    pub async fn wait_for_release(
        &self,
        marker: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), UpdateError> {
        if !self.grace_period.is_zero() {
            debug!("Waiting {:?} before probing {:?}", self.grace_period, marker);
            tokio::select! {
                _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                _ = tokio::time::sleep(self.grace_period) => {}
            }
        }

        let started = Instant::now();
        loop {
            if is_released(marker) {
                debug!("{:?} released after {:?}", marker, started.elapsed());
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                return Err(UpdateError::AppStillRunning {
                    waited_secs: self.timeout.as_secs(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Whether nobody holds `marker` open for exclusive use.
///
/// Windows refuses a write open on a running executable; elsewhere this
/// only sees cooperating processes that hold an advisory lock.
fn is_released(marker: &Path) -> bool {
    let file = match OpenOptions::new().read(true).write(true).open(marker) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            match File::open(marker) {
                Ok(file) => file,
                Err(e) => {
                    trace!("Marker {:?} not readable: {}", marker, e);
                    return false;
                }
            }
        }
        Err(e) => {
            trace!("Marker {:?} busy: {}", marker, e);
            return false;
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            true
        }
        Err(_) => false,
    }
}
