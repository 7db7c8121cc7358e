//! Version-check wire format.
//!
//! A version query answers with one of two JSON shapes:
//!
//! ```json
//! { "version": "1.0.3", "build_number": "4", "download_url": "...",
//!   "release_notes": "...", "mandatory": true,
//!   "min_supported_version": "1.0.1", "release_date": "2026-03-01",
//!   "file_size": "16.1 MB" }
//! ```
//!
//! when a newer release exists, or
//!
//! ```json
//! { "version": "1.0.3", "update_available": false,
//!   "message": "Latest version installed" }
//! ```
//!
//! when the caller is already current.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::version::AppVersion;

/// Message sent with an up-to-date answer.
pub const UP_TO_DATE_MESSAGE: &str = "Latest version installed";

/// Metadata describing one published release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Release version
    pub version: AppVersion,
    /// Build counter as published (free-form, usually numeric)
    pub build_number: String,
    /// Where the release artifact can be fetched
    pub download_url: String,
    /// Human-readable release notes
    pub release_notes: String,
    /// Whether every client must install this release
    pub mandatory: bool,
    /// Oldest version that may keep running without this release
    pub min_supported_version: AppVersion,
    /// Publication date
    pub release_date: NaiveDate,
    /// Human-readable artifact size, e.g. "16.1 MB"
    pub file_size: String,
    /// Hex SHA-256 of the release artifact, when published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
    /// Where the full changelog for this release lives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog_url: Option<String>,
}

impl VersionInfo {
    /// Whether a client running `current` has to take this release.
    ///
    /// True for mandatory releases and for clients older than
    /// `min_supported_version`.
    pub fn requires_update_from(&self, current: &AppVersion) -> bool {
        self.version.is_newer_than(current)
            && (self.mandatory || current < &self.min_supported_version)
    }
}

/// Answer sent when the caller already runs the latest release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpToDate {
    /// The version the caller reported
    pub version: String,
    /// Always false on the wire
    pub update_available: bool,
    /// Explanation for humans
    pub message: String,
}

impl UpToDate {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            update_available: false,
            message: UP_TO_DATE_MESSAGE.to_string(),
        }
    }
}

/// Result of a version check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionCheck {
    // Listed first: only this shape carries `update_available`.
    UpToDate(UpToDate),
    Available(VersionInfo),
}

impl VersionCheck {
    /// Decode a response body.
    ///
    /// Rejects payloads matching neither shape, and up-to-date payloads
    /// that claim `update_available: true`.
    pub fn from_slice(body: &[u8]) -> Result<Self, String> {
        let check: VersionCheck = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if let VersionCheck::UpToDate(up_to_date) = &check {
            if up_to_date.update_available {
                return Err("response claims an update but carries no release metadata".to_string());
            }
        }
        Ok(check)
    }

    /// The release on offer, if any.
    pub fn available(&self) -> Option<&VersionInfo> {
        match self {
            VersionCheck::Available(info) => Some(info),
            VersionCheck::UpToDate(_) => None,
        }
    }

    pub fn is_update_available(&self) -> bool {
        self.available().is_some()
    }
}
