use tracing_subscriber::EnvFilter;
use zelly_versiond::config::ServerConfig;
use zelly_versiond::VersionServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = if let Ok(path) = std::env::var("ZELLY_CONFIG_PATH") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    let server = VersionServer::new(config)?;
    server.start().await?;

    Ok(())
}
