//! Starting the updated application.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::UpdateError;

/// A started process. The agent never waits on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Starts an executable without waiting for it.
pub trait Launcher: Send + Sync {
    fn launch(&self, executable: &Path) -> Result<ProcessHandle, UpdateError>;
}

/// Spawns the executable with null stdio from its own directory.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments passed to the relaunched application.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, executable: &Path) -> Result<ProcessHandle, UpdateError> {
        if !executable.is_file() {
            return Err(UpdateError::NotFound(executable.to_path_buf()));
        }

        let mut command = Command::new(executable);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| UpdateError::Launch(format!("{}: {}", executable.display(), e)))?;

        let handle = ProcessHandle { pid: child.id() };
        info!("Started {:?} (pid {})", executable, handle.pid);
        // Dropping the Child does not kill or wait on the process.
        drop(child);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_missing_executable() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("tezzro.exe");
        let result = ProcessLauncher::new().launch(&exe);
        assert!(matches!(result, Err(UpdateError::NotFound(p)) if p == exe));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_fails_to_spawn() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("tezzro");
        std::fs::write(&exe, "not a program").unwrap();

        let result = ProcessLauncher::new().launch(&exe);
        assert!(matches!(result, Err(UpdateError::Launch(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_script() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let exe: PathBuf = temp.path().join("tezzro");
        std::fs::write(&exe, "#!/bin/sh\ntouch started\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let handle = ProcessLauncher::new().launch(&exe).unwrap();
        assert!(handle.pid > 0);

        // The script runs from its own directory.
        let marker = temp.path().join("started");
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        assert!(marker.exists());
    }
}
