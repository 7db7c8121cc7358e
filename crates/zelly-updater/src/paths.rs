//! Per-install working locations.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Hex digits of the path digest kept in the key.
const KEY_LEN: usize = 16;

/// Short stable name for an install path.
///
/// Staging, backup and lock locations for one installation are all named
/// after this key, so two spellings of the same directory share them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstallKey {
    normalized: PathBuf,
    digest: String,
}

impl InstallKey {
    pub fn new(install_path: &Path) -> Self {
        let normalized = normalize(install_path);
        let mut hasher = Sha256::new();
        hasher.update(normalized.to_string_lossy().as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(KEY_LEN);
        Self { normalized, digest }
    }

    /// Absolute form of the install path.
    pub fn normalized(&self) -> &Path {
        &self.normalized
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// `<staging_dir>/<key>/update.artifact`
    pub fn staging_file(&self, staging_dir: &Path) -> PathBuf {
        staging_dir.join(&self.digest).join("update.artifact")
    }

    /// `<lock_dir>/<key>.lock`
    pub fn lock_file(&self, lock_dir: &Path) -> PathBuf {
        lock_dir.join(format!("{}.lock", self.digest))
    }

    /// `<backup_dir>/backup-<key>`
    pub fn backup_dir(&self, backup_root: &Path) -> PathBuf {
        backup_root.join(format!("backup-{}", self.digest))
    }
}

impl fmt::Display for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    // Drop trailing separators and `.` components.
    absolute.components().collect()
}
