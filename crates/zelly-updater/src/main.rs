//! Zelly updater entry point

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zelly_updater::{Cli, ExitCode, UpdaterConfig};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // A broken config file must not keep the host from being updated.
    let config = match UpdaterConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Config error: {e}");
            eprintln!("Using default configuration.");
            UpdaterConfig::default()
        }
    };
    let config = config.with_overrides(&cli.overrides());

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::GeneralError.to_exit_code()
        }
    }
}
