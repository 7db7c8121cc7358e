//! Release catalog.
//!
//! A JSON object mapping each version string to its release metadata.
//! The service ships with a built-in catalog; `catalog_path` replaces it.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{error, info};
use zelly_core::{AppVersion, UpToDate, VersionCheck, VersionInfo};

/// Catalog served when no catalog file is configured.
const BUILTIN_CATALOG: &str = include_str!("../catalog.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("catalog key '{key}' does not match release version '{version}'")]
    KeyMismatch { key: String, version: String },

    #[error("catalog lists version {0} twice")]
    Duplicate(String),
}

/// Published releases, ordered by version.
#[derive(Debug, Clone, Default)]
pub struct VersionCatalog {
    releases: BTreeMap<AppVersion, VersionInfo>,
}

impl VersionCatalog {
    pub fn new(releases: impl IntoIterator<Item = VersionInfo>) -> Self {
        Self {
            releases: releases
                .into_iter()
                .map(|info| (info.version.clone(), info))
                .collect(),
        }
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Self {
        match Self::from_json(BUILTIN_CATALOG) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Built-in catalog is invalid: {}", e);
                Self::default()
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, VersionInfo> = serde_json::from_str(json)?;
        let mut releases = BTreeMap::new();

        for (key, info) in raw {
            match AppVersion::parse(&key) {
                Ok(parsed) if parsed == info.version => {}
                _ => {
                    return Err(CatalogError::KeyMismatch {
                        key,
                        version: info.version.to_string(),
                    })
                }
            }
            let version = info.version.clone();
            if releases.insert(version, info).is_some() {
                return Err(CatalogError::Duplicate(key));
            }
        }

        Ok(Self { releases })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;
        info!("Loaded {} releases from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn get(&self, version: &AppVersion) -> Option<&VersionInfo> {
        self.releases.get(version)
    }

    /// Highest published version.
    pub fn latest(&self) -> Option<&VersionInfo> {
        self.releases.values().next_back()
    }

    /// Latest version string, `1.0.0` for an empty catalog.
    pub fn latest_version(&self) -> String {
        self.latest()
            .map(|info| info.version.to_string())
            .unwrap_or_else(|| "1.0.0".to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionInfo> {
        self.releases.values()
    }

    /// Answer a version check for a client running `current`.
    pub fn check(&self, current: &AppVersion) -> VersionCheck {
        match self.latest() {
            Some(latest) if latest.version.is_newer_than(current) => {
                VersionCheck::Available(latest.clone())
            }
            _ => VersionCheck::UpToDate(UpToDate::new(current.as_str())),
        }
    }
}
