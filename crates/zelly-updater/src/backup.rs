//! Installation snapshots.
//!
//! Before the installer touches an existing installation the whole tree is
//! copied aside. A snapshot records a manifest of every entry (file
//! digests, link targets, directories), and
//! [`BackupManager::restore`] refuses to put back a tree that no longer
//! matches it.
//!
//! # Backup Directory Structure
//!
//! ```text
//! backup_dir/
//! └── backup-<install-key>/
//!     ├── tree/            # copy of the install directory
//!     └── metadata.json    # source, timestamp and digest manifest
//! ```
//!
//! There is one backup location per install path; taking a new snapshot
//! replaces whatever was there.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::paths::InstallKey;
use crate::tree::{self, TreeDigest};

/// Metadata file name within backup directories.
const METADATA_FILE: &str = "metadata.json";
/// Subdirectory holding the copied tree.
const TREE_DIR: &str = "tree";

/// A retained copy of an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Install directory the snapshot was taken from
    pub source: PathBuf,
    /// Backup directory (holds `tree/` and `metadata.json`)
    pub location: PathBuf,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    /// Every entry of the tree
    pub manifest: TreeDigest,
}

impl BackupSnapshot {
    /// Directory containing the copied files.
    pub fn tree_path(&self) -> PathBuf {
        self.location.join(TREE_DIR)
    }

    /// Regular files in the snapshot.
    pub fn file_count(&self) -> usize {
        self.manifest.values().filter(|entry| entry.is_file()).count()
    }
}

/// Creates, restores and discards installation snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_root: PathBuf,
}

impl BackupManager {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Location used for snapshots of `install_path`.
    pub fn location_for(&self, install_path: &Path) -> PathBuf {
        InstallKey::new(install_path).backup_dir(&self.backup_root)
    }

    /// Copy `source_dir` into a fresh backup location.
    ///
    /// A partially written backup is left in place on failure; the caller
    /// aborts the update in that case.
    pub fn snapshot(&self, source_dir: &Path) -> Result<BackupSnapshot, UpdateError> {
        if !source_dir.is_dir() {
            return Err(UpdateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("install directory {} does not exist", source_dir.display()),
            )));
        }

        let location = self.location_for(source_dir);
        if location.exists() {
            debug!("Removing stale backup at {:?}", location);
            fs::remove_dir_all(&location)?;
        }
        fs::create_dir_all(&location)?;

        let tree_path = location.join(TREE_DIR);
        info!("Backing up {:?} to {:?}", source_dir, tree_path);
        let copied = tree::copy_tree(source_dir, &tree_path)?;

        let snapshot = BackupSnapshot {
            source: source_dir.to_path_buf(),
            location: location.clone(),
            created_at: Utc::now(),
            manifest: tree::digest_tree(&tree_path)?,
        };

        let metadata_json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(location.join(METADATA_FILE), metadata_json)?;

        debug!("Backup holds {} files and links", copied);
        Ok(snapshot)
    }

    /// Check that the backup tree still matches its manifest.
    pub fn verify(&self, snapshot: &BackupSnapshot) -> Result<(), UpdateError> {
        let tree_path = snapshot.tree_path();
        if !tree_path.is_dir() {
            return Err(UpdateError::BackupCorrupted(format!(
                "backup tree {} is missing",
                tree_path.display()
            )));
        }

        let actual = tree::digest_tree(&tree_path)?;
        if actual == snapshot.manifest {
            return Ok(());
        }

        let changed = snapshot
            .manifest
            .iter()
            .find(|(path, digest)| actual.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .or_else(|| {
                actual
                    .keys()
                    .find(|path| !snapshot.manifest.contains_key(*path))
                    .cloned()
            })
            .unwrap_or_default();

        Err(UpdateError::BackupCorrupted(format!(
            "{} no longer matches the recorded manifest",
            changed
        )))
    }

    /// Replace `snapshot.source` with the backed-up tree.
    pub fn restore(&self, snapshot: &BackupSnapshot) -> Result<(), UpdateError> {
        self.verify(snapshot)?;

        info!("Restoring {:?} from backup", snapshot.source);
        tree::remove_path(&snapshot.source)?;
        tree::copy_tree(&snapshot.tree_path(), &snapshot.source)?;

        info!("Restored {} files", snapshot.file_count());
        Ok(())
    }

    /// Delete a backup.
    pub fn discard(&self, snapshot: &BackupSnapshot) -> Result<(), UpdateError> {
        if snapshot.location.exists() {
            fs::remove_dir_all(&snapshot.location)?;
            debug!("Discarded backup {:?}", snapshot.location);
        }
        Ok(())
    }

    /// Load the retained backup for `install_path`, if any.
    pub fn latest(&self, install_path: &Path) -> Result<Option<BackupSnapshot>, UpdateError> {
        let location = self.location_for(install_path);
        let metadata_path = location.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&metadata_path)?;
        match serde_json::from_str::<BackupSnapshot>(&content) {
            Ok(mut snapshot) => {
                // Ensure location is correct (in case backup_dir was moved)
                snapshot.location = location;
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!("Failed to parse backup metadata at {:?}: {}", metadata_path, e);
                Err(UpdateError::BackupCorrupted(format!(
                    "unreadable metadata: {e}"
                )))
            }
        }
    }
}
