//! Client for the version-metadata service.

use std::time::Duration;

use tracing::{debug, info};
use url::Url;
use zelly_core::{AppVersion, VersionCheck};

use crate::config::DownloadConfig;
use crate::error::UpdateError;

/// Queries `GET <endpoint>?current=<version>`.
pub struct VersionClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl VersionClient {
    /// Create a client for `endpoint`, reusing the download timeouts.
    pub fn new(endpoint: &str, config: &DownloadConfig) -> Result<Self, UpdateError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| UpdateError::Config(format!("invalid version endpoint '{endpoint}': {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask the service whether something newer than `current` exists.
    pub async fn check_for_update(&self, current: &str) -> Result<VersionCheck, UpdateError> {
        let current = current.trim();
        AppVersion::parse(current)
            .map_err(|e| UpdateError::Validation(format!("current version: {e}")))?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("current", current);
        debug!("Checking for updates: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let check = VersionCheck::from_slice(&body).map_err(UpdateError::Protocol)?;

        match &check {
            VersionCheck::Available(info) => info!(
                "Update available: {} -> {} (mandatory: {})",
                current, info.version, info.mandatory
            ),
            VersionCheck::UpToDate(_) => info!("Version {} is up to date", current),
        }
        Ok(check)
    }
}
