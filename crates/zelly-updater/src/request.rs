//! Update request handed over by the host application.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::UpdateError;

/// Everything the host tells the agent about one update.
///
/// Immutable once built. [`UpdateRequest::validate`] runs before the
/// orchestrator leaves `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    install_path: PathBuf,
    download_url: String,
    current_version: String,
    target_version: Option<String>,
}

impl UpdateRequest {
    pub fn new(
        install_path: impl Into<PathBuf>,
        download_url: impl Into<String>,
        current_version: impl Into<String>,
        target_version: Option<String>,
    ) -> Self {
        Self {
            install_path: install_path.into(),
            download_url: download_url.into(),
            current_version: current_version.into(),
            target_version: target_version.filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn target_version(&self) -> Option<&str> {
        self.target_version.as_deref()
    }

    /// Version shown in the completion message.
    ///
    /// Falls back to "latest" when the host did not name a target.
    pub fn display_version(&self) -> &str {
        self.target_version().unwrap_or("latest")
    }

    /// Check the request before any work is started.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.install_path.as_os_str().is_empty() {
            return Err(UpdateError::Validation(
                "install path must not be empty".to_string(),
            ));
        }

        let url = self.download_url.trim();
        if url.is_empty() {
            return Err(UpdateError::Validation(
                "download URL must not be empty".to_string(),
            ));
        }

        let parsed = Url::parse(url)
            .map_err(|e| UpdateError::Validation(format!("invalid download URL '{url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(UpdateError::Validation(format!(
                "unsupported download URL scheme '{other}'"
            ))),
        }
    }
}
