//! Directory tree copy and digest helpers.
//!
//! Both walks use an explicit stack and stop at [`MAX_TREE_DEPTH`]. Inside
//! every directory the regular files are handled before any subdirectory
//! is entered.
//!
//! Symbolic links are never followed. A copy recreates each link with the
//! same target, whether it points at a file, a directory or nothing.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::UpdateError;

/// Deepest directory nesting the walkers will follow.
pub const MAX_TREE_DEPTH: usize = 64;

/// One entry of a [`TreeDigest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeEntry {
    /// Regular file, lowercase hex SHA-256 of its content
    File { sha256: String },
    /// Symbolic link and its (escaped) target
    Symlink { target: String },
    Dir,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        matches!(self, TreeEntry::File { .. })
    }
}

/// Escaped relative path → entry.
///
/// Path components are joined with `/`. A literal `%` is written as `%25`
/// and every byte that is not valid UTF-8 as `%XX`, so distinct names
/// never share a key.
pub type TreeDigest = BTreeMap<String, TreeEntry>;

struct Listing {
    files: Vec<PathBuf>,
    links: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Split a directory into files, links and subdirectories, each sorted by
/// name.
fn list_dir(dir: &Path) -> Result<Listing, UpdateError> {
    let mut files = Vec::new();
    let mut links = Vec::new();
    let mut dirs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            links.push(path);
        } else if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_file() {
            files.push(path);
        } else {
            return Err(UpdateError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("{} is neither a file, a directory nor a link", path.display()),
            )));
        }
    }

    files.sort();
    links.sort();
    dirs.sort();
    Ok(Listing { files, links, dirs })
}

fn depth_guard(depth: usize, dir: &Path) -> Result<(), UpdateError> {
    if depth > MAX_TREE_DEPTH {
        return Err(UpdateError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "directory nesting deeper than {} levels at {}",
                MAX_TREE_DEPTH,
                dir.display()
            ),
        )));
    }
    Ok(())
}

/// Recursively copy `src` into `dest`, creating `dest` as needed.
///
/// Returns the number of files and links copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64, UpdateError> {
    if !src.is_dir() {
        return Err(UpdateError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source directory {} does not exist", src.display()),
        )));
    }

    let mut copied = 0u64;
    let mut stack = vec![(src.to_path_buf(), dest.to_path_buf(), 0usize)];

    while let Some((from, to, depth)) = stack.pop() {
        depth_guard(depth, &from)?;
        fs::create_dir_all(&to)?;

        let listing = list_dir(&from)?;
        for file in &listing.files {
            let Some(name) = file.file_name() else { continue };
            fs::copy(file, to.join(name))?;
            copied += 1;
        }
        for link in &listing.links {
            let Some(name) = link.file_name() else { continue };
            copy_link(link, &to.join(name))?;
            copied += 1;
        }

        // Reversed so the first subdirectory is popped first.
        for dir in listing.dirs.into_iter().rev() {
            if let Some(name) = dir.file_name() {
                let target = to.join(name);
                stack.push((dir, target, depth + 1));
            }
        }
    }

    debug!("Copied {} entries from {:?} to {:?}", copied, src, dest);
    Ok(copied)
}

/// Recreate the link at `link` as `dest`, pointing at the same target.
#[cfg(unix)]
fn copy_link(link: &Path, dest: &Path) -> Result<(), UpdateError> {
    let target = fs::read_link(link)?;
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(windows)]
fn copy_link(link: &Path, dest: &Path) -> Result<(), UpdateError> {
    let target = fs::read_link(link)?;
    // Dangling links come back as file links.
    let to_dir = fs::metadata(link).map(|m| m.is_dir()).unwrap_or(false);
    if to_dir {
        std::os::windows::fs::symlink_dir(target, dest)?;
    } else {
        std::os::windows::fs::symlink_file(target, dest)?;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn copy_link(link: &Path, _dest: &Path) -> Result<(), UpdateError> {
    Err(UpdateError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot copy symbolic link {}", link.display()),
    )))
}

/// Describe every entry under `root`: file digests, link targets and
/// directories (including empty ones).
pub fn digest_tree(root: &Path) -> Result<TreeDigest, UpdateError> {
    let mut digests = TreeDigest::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        depth_guard(depth, &dir)?;
        let listing = list_dir(&dir)?;

        for file in &listing.files {
            digests.insert(
                relative_key(root, file),
                TreeEntry::File {
                    sha256: hash_file(file)?,
                },
            );
        }
        for link in &listing.links {
            let target = fs::read_link(link)?;
            digests.insert(
                relative_key(root, link),
                TreeEntry::Symlink {
                    target: escape_os_str(target.as_os_str()),
                },
            );
        }
        for sub in listing.dirs.into_iter().rev() {
            digests.insert(relative_key(root, &sub), TreeEntry::Dir);
            stack.push((sub, depth + 1));
        }
    }

    Ok(digests)
}

/// Compute the SHA-256 of a file as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String, UpdateError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Remove a file, link or directory tree if it exists.
pub fn remove_path(path: &Path) -> Result<(), UpdateError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Path of `entry` below `root` as a [`TreeDigest`] key.
pub fn relative_key(root: &Path, entry: &Path) -> String {
    let relative = entry.strip_prefix(root).unwrap_or(entry);
    relative
        .components()
        .map(|c| escape_os_str(c.as_os_str()))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn escape_os_str(name: &OsStr) -> String {
    use std::os::unix::ffi::OsStrExt;
    escape_bytes(name.as_bytes())
}

#[cfg(not(unix))]
fn escape_os_str(name: &OsStr) -> String {
    escape_bytes(name.to_string_lossy().as_bytes())
}

fn escape_bytes(mut rest: &[u8]) -> String {
    let mut out = String::with_capacity(rest.len());
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_escaped(&mut out, valid);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // Checked by from_utf8 above.
                push_escaped(&mut out, std::str::from_utf8(valid).unwrap_or_default());
                let bad = e.error_len().unwrap_or(after.len());
                for byte in &after[..bad] {
                    out.push_str(&format!("%{byte:02X}"));
                }
                rest = &after[bad..];
            }
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '%' {
            out.push_str("%25");
        } else {
            out.push(ch);
        }
    }
}
