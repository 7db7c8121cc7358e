//! Application version scheme.
//!
//! Versions are dot-separated runs of unsigned integers (`1.0.3`,
//! `2.1`, `10.0.0.7`). Comparison is numeric per component, and a
//! shorter version is padded with zeros, so `1.0` and `1.0.0` are equal.
//! This gives a total order over every parseable version string.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing an [`AppVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    /// The input was empty or whitespace.
    #[error("version string is empty")]
    Empty,

    /// A component was not an unsigned integer.
    #[error("invalid version component {component:?} in {input:?}")]
    InvalidComponent { input: String, component: String },
}

/// A numeric, dot-separated application version.
#[derive(Debug, Clone)]
pub struct AppVersion {
    parts: Vec<u64>,
    raw: String,
}

impl AppVersion {
    /// Parse a version string. A leading `v` is accepted.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let parts = body
            .split('.')
            .map(|component| {
                component
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        input: input.to_string(),
                        component: component.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            parts,
            raw: body.to_string(),
        })
    }

    /// Numeric components as written.
    pub fn components(&self) -> &[u64] {
        &self.parts
    }

    /// The version as it was written (without a leading `v`).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if `self` orders strictly after `other`.
    pub fn is_newer_than(&self, other: &AppVersion) -> bool {
        self > other
    }

    /// Pick the highest version out of an iterator.
    pub fn latest<'a, I>(versions: I) -> Option<&'a AppVersion>
    where
        I: IntoIterator<Item = &'a AppVersion>,
    {
        versions.into_iter().max()
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality must agree with the padded ordering, so `1.0 == 1.0.0`.
impl PartialEq for AppVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AppVersion {}

impl FromStr for AppVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for AppVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for AppVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AppVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}
