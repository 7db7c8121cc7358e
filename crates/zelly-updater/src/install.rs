//! Installation of a staged artifact.
//!
//! The new tree is assembled next to the install directory and then
//! swapped in with two renames. If the second rename fails the previous
//! directory is put back, so a failed swap leaves the old installation in
//! place.
//!
//! Two artifact shapes are accepted:
//!
//! - a zip archive, whose contents become the complete new tree;
//! - anything else, treated as the application executable and laid over a
//!   copy of the current tree.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::tree;

/// Leading bytes of a zip local file header.
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Replaces the contents of an install directory.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install `artifact` into `install_path`.
    async fn install(&self, artifact: &Path, install_path: &Path) -> Result<(), UpdateError>;
}

/// What the staged file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Zip,
    Executable,
}

impl ArtifactKind {
    /// Sniff the artifact, rejecting missing or empty files.
    pub fn detect(artifact: &Path) -> Result<Self, UpdateError> {
        let meta = fs::metadata(artifact).map_err(|e| {
            UpdateError::Artifact(format!("staged artifact {} unavailable: {e}", artifact.display()))
        })?;
        if !meta.is_file() {
            return Err(UpdateError::Artifact(format!(
                "{} is not a file",
                artifact.display()
            )));
        }
        if meta.len() == 0 {
            return Err(UpdateError::Artifact("staged artifact is empty".to_string()));
        }

        let mut magic = [0u8; 4];
        let mut file = File::open(artifact)?;
        let read = file.read(&mut magic)?;
        if read == magic.len() && magic == ZIP_MAGIC {
            Ok(ArtifactKind::Zip)
        } else {
            Ok(ArtifactKind::Executable)
        }
    }
}

/// Default installer: zip archive or single executable, rename swap.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    /// Executable path relative to the install directory
    executable: String,
}

impl ArchiveInstaller {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }
}

#[async_trait]
impl Installer for ArchiveInstaller {
    async fn install(&self, artifact: &Path, install_path: &Path) -> Result<(), UpdateError> {
        let artifact = artifact.to_path_buf();
        let install_path = install_path.to_path_buf();
        let executable = self.executable.clone();

        tokio::task::spawn_blocking(move || install_blocking(&artifact, &install_path, &executable))
            .await?
    }
}

fn install_blocking(artifact: &Path, install_path: &Path, executable: &str) -> Result<(), UpdateError> {
    let kind = ArtifactKind::detect(artifact)?;
    let staging = sibling(install_path, "zelly-new")?;
    tree::remove_path(&staging)?;

    info!("Installing {:?} artifact into {:?}", kind, install_path);

    let built = match kind {
        ArtifactKind::Zip => extract_zip(artifact, &staging),
        ArtifactKind::Executable => overlay_executable(artifact, install_path, &staging, executable),
    };
    if let Err(e) = built {
        discard_staging(&staging);
        return Err(e);
    }

    if let Err(e) = swap_into_place(&staging, install_path) {
        discard_staging(&staging);
        return Err(e);
    }

    info!("Installation complete");
    Ok(())
}

/// `<parent>/.<name>.<suffix>` next to the install directory.
fn sibling(install_path: &Path, suffix: &str) -> Result<PathBuf, UpdateError> {
    let name = install_path.file_name().ok_or_else(|| {
        UpdateError::Validation(format!(
            "install path {} has no directory name",
            install_path.display()
        ))
    })?;
    let parent = install_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{}.{}", name.to_string_lossy(), suffix)))
}

fn discard_staging(staging: &Path) {
    if let Err(e) = tree::remove_path(staging) {
        warn!("Failed to remove staging directory {:?}: {}", staging, e);
    }
}

fn extract_zip(archive_path: &Path, destination: &Path) -> Result<(), UpdateError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    if archive.len() == 0 {
        return Err(UpdateError::Artifact("archive has no entries".to_string()));
    }

    fs::create_dir_all(destination)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            UpdateError::Artifact(format!("archive entry '{}' escapes the target", entry.name()))
        })?;
        let outpath = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    debug!("Extracted {} entries into {:?}", archive.len(), destination);
    Ok(())
}

fn overlay_executable(
    artifact: &Path,
    install_path: &Path,
    staging: &Path,
    executable: &str,
) -> Result<(), UpdateError> {
    if install_path.is_dir() {
        tree::copy_tree(install_path, staging)?;
    } else {
        fs::create_dir_all(staging)?;
    }

    let target = staging.join(executable);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // A linked executable is replaced, not written through.
    tree::remove_path(&target)?;
    fs::copy(artifact, &target)?;
    set_executable(&target)?;

    debug!("Placed new executable at {:?}", target);
    Ok(())
}

fn swap_into_place(staging: &Path, install_path: &Path) -> Result<(), UpdateError> {
    if !install_path.exists() {
        if let Some(parent) = install_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staging, install_path)?;
        return Ok(());
    }

    let old = sibling(install_path, "zelly-old")?;
    tree::remove_path(&old)?;
    fs::rename(install_path, &old)?;

    if let Err(e) = fs::rename(staging, install_path) {
        warn!("Swap failed, putting the previous installation back: {}", e);
        if let Err(restore) = fs::rename(&old, install_path) {
            warn!("Failed to put back {:?}: {}", install_path, restore);
        }
        return Err(e.into());
    }

    // The new tree is live at this point; a leftover old tree is only clutter.
    if let Err(e) = fs::remove_dir_all(&old) {
        warn!("Failed to remove previous installation {:?}: {}", old, e);
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn existing_install(root: &Path) -> PathBuf {
        let app = root.join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("tezzro.exe"), "v1").unwrap();
        fs::write(app.join("old.dll"), "stale").unwrap();
        app
    }

    #[test]
    fn test_detect_kind() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.zip");
        write_zip(&archive, &[("tezzro.exe", "v2")]);
        assert_eq!(ArtifactKind::detect(&archive).unwrap(), ArtifactKind::Zip);

        let exe = temp.path().join("a.exe");
        fs::write(&exe, b"MZ\x90\x00binary").unwrap();
        assert_eq!(ArtifactKind::detect(&exe).unwrap(), ArtifactKind::Executable);

        let empty = temp.path().join("empty");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(
            ArtifactKind::detect(&empty),
            Err(UpdateError::Artifact(_))
        ));
        assert!(matches!(
            ArtifactKind::detect(&temp.path().join("missing")),
            Err(UpdateError::Artifact(_))
        ));
    }

    #[tokio::test]
    async fn test_zip_replaces_tree() {
        let temp = TempDir::new().unwrap();
        let app = existing_install(temp.path());
        let archive = temp.path().join("update.artifact");
        write_zip(&archive, &[("tezzro.exe", "v2"), ("data/new.json", "{}")]);

        ArchiveInstaller::new("tezzro.exe")
            .install(&archive, &app)
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(app.join("tezzro.exe")).unwrap(), "v2");
        assert_eq!(fs::read_to_string(app.join("data/new.json")).unwrap(), "{}");
        assert!(!app.join("old.dll").exists());
        assert!(!temp.path().join(".app.zelly-new").exists());
        assert!(!temp.path().join(".app.zelly-old").exists());
    }

    #[tokio::test]
    async fn test_executable_overlays_current_tree() {
        let temp = TempDir::new().unwrap();
        let app = existing_install(temp.path());
        let artifact = temp.path().join("update.artifact");
        fs::write(&artifact, "v2-binary").unwrap();

        ArchiveInstaller::new("tezzro.exe")
            .install(&artifact, &app)
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(app.join("tezzro.exe")).unwrap(),
            "v2-binary"
        );
        assert_eq!(fs::read_to_string(app.join("old.dll")).unwrap(), "stale");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(app.join("tezzro.exe")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_overlay_keeps_links() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(temp.path().join("shared-libs")).unwrap();
        fs::write(temp.path().join("shared-libs/tezzro-real"), "v1").unwrap();
        symlink("../shared-libs", app.join("lib")).unwrap();
        symlink("../shared-libs/tezzro-real", app.join("tezzro")).unwrap();

        let artifact = temp.path().join("update.artifact");
        fs::write(&artifact, "v2-binary").unwrap();
        ArchiveInstaller::new("tezzro")
            .install(&artifact, &app)
            .await
            .unwrap();

        assert_eq!(fs::read_link(app.join("lib")).unwrap(), Path::new("../shared-libs"));
        // The link to the old binary is replaced and its target left alone.
        assert!(!fs::symlink_metadata(app.join("tezzro")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(app.join("tezzro")).unwrap(), "v2-binary");
        assert_eq!(
            fs::read_to_string(temp.path().join("shared-libs/tezzro-real")).unwrap(),
            "v1"
        );
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("programs").join("app");
        let archive = temp.path().join("update.artifact");
        write_zip(&archive, &[("tezzro.exe", "v1")]);

        ArchiveInstaller::new("tezzro.exe")
            .install(&archive, &app)
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(app.join("tezzro.exe")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_corrupt_zip_leaves_install_untouched() {
        let temp = TempDir::new().unwrap();
        let app = existing_install(temp.path());
        let artifact = temp.path().join("update.artifact");
        // Zip magic followed by garbage
        fs::write(&artifact, b"PK\x03\x04not really a zip archive").unwrap();

        let result = ArchiveInstaller::new("tezzro.exe").install(&artifact, &app).await;

        assert!(matches!(result, Err(UpdateError::Artifact(_))));
        assert_eq!(fs::read_to_string(app.join("tezzro.exe")).unwrap(), "v1");
        assert!(!temp.path().join(".app.zelly-new").exists());
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let app = existing_install(temp.path());

        let result = ArchiveInstaller::new("tezzro.exe")
            .install(&temp.path().join("nope"), &app)
            .await;
        assert!(matches!(result, Err(UpdateError::Artifact(_))));
    }
}
