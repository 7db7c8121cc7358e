//! # zelly-core
//!
//! Types shared by the Zelly updater and the version service:
//! the numeric version ordering and the JSON shapes of a version check.

pub mod release;
pub mod version;
#[cfg(test)]
mod proptests;

pub use release::{UpToDate, VersionCheck, VersionInfo, UP_TO_DATE_MESSAGE};
pub use version::{AppVersion, VersionParseError};
