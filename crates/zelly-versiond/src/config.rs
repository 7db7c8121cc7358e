use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    // Release catalog; the built-in one when unset
    pub catalog_path: Option<PathBuf>,

    // Audit log
    pub audit_log_path: Option<PathBuf>,
    pub audit_queue_capacity: usize,

    // Graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            catalog_path: None,
            audit_log_path: Some(PathBuf::from("update_logs.txt")),
            audit_queue_capacity: 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("ZELLY_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(path) = std::env::var("ZELLY_CATALOG_PATH") {
            config.catalog_path = Some(PathBuf::from(path));
        }

        // An empty value turns the file log off
        if let Ok(path) = std::env::var("ZELLY_AUDIT_LOG") {
            config.audit_log_path = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(capacity) = std::env::var("ZELLY_AUDIT_QUEUE") {
            config.audit_queue_capacity = capacity.parse()?;
        }

        if let Ok(secs) = std::env::var("ZELLY_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout_secs = secs.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.audit_queue_capacity == 0 {
            anyhow::bail!("audit_queue_capacity must be > 0");
        }

        if let Some(path) = &self.catalog_path {
            if !path.is_file() {
                anyhow::bail!("catalog_path {:?} is not a file", path);
            }
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
