//! CLI command definitions and argument parsing.
//!
//! Without a subcommand the agent applies an update; this is the form the
//! host application uses:
//!
//! ```text
//! zelly-updater --app-path <dir> --update-url <url> --current-version <v> [--target-version <v>]
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CliOverrides, UpdaterConfig};
use crate::error::UpdateError;
use crate::orchestrator::UpdateOrchestrator;
use crate::request::UpdateRequest;
use crate::status::spawn_console_renderer;
use crate::version_client::VersionClient;
use crate::ExitCode;

/// Zelly updater - downloads, installs and relaunches a new application build
#[derive(Parser, Debug)]
#[command(name = "zelly-updater")]
#[command(version, about = "Zelly updater - installs a new application build and relaunches it")]
pub struct Cli {
    /// Command to execute (default: apply an update)
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub apply: ApplyArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Arguments of the default (apply) form.
#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    /// Installation directory of the application
    #[arg(long = "app-path")]
    pub app_path: Option<PathBuf>,

    /// URL of the release artifact
    #[arg(long = "update-url")]
    pub update_url: Option<String>,

    /// Version currently installed
    #[arg(long = "current-version")]
    pub current_version: Option<String>,

    /// Version being installed (used in the completion message)
    #[arg(long = "target-version")]
    pub target_version: Option<String>,

    /// Executable to relaunch, relative to the app path
    #[arg(long)]
    pub executable: Option<String>,

    /// Keep the backup after a successful install
    #[arg(long)]
    pub keep_backup: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the version service whether a newer release exists
    Check(CheckArgs),
    /// Restore the retained backup of an installation
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Version-check endpoint (default: `version.endpoint` from config)
    #[arg(long, env = "ZELLY_UPDATE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Version currently installed
    #[arg(long = "current-version")]
    pub current_version: String,

    /// Print the raw JSON answer
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Installation directory to restore
    #[arg(long = "app-path")]
    pub app_path: PathBuf,
}

impl Cli {
    /// Overrides derived from the command line.
    pub fn overrides(&self) -> CliOverrides {
        let endpoint = match &self.command {
            Some(Commands::Check(args)) => args.endpoint.clone(),
            _ => None,
        };
        CliOverrides {
            executable: self.apply.executable.clone(),
            endpoint,
            keep_backup: self.apply.keep_backup.then_some(true),
            verbose: Some(self.verbose),
            debug: Some(self.debug),
        }
    }

    /// Execute the CLI command with a pre-loaded configuration.
    pub async fn execute_with_config(self, config: UpdaterConfig) -> anyhow::Result<ExitCode> {
        match self.command {
            Some(Commands::Check(args)) => args.execute(&config).await,
            Some(Commands::Rollback(args)) => args.execute(config).await,
            None => self.apply.execute(config).await,
        }
    }
}

impl ApplyArgs {
    /// Build the update request. Missing flags become empty values and are
    /// rejected by request validation.
    pub fn to_request(&self) -> UpdateRequest {
        UpdateRequest::new(
            self.app_path.clone().unwrap_or_default(),
            self.update_url.clone().unwrap_or_default(),
            self.current_version.clone().unwrap_or_default(),
            self.target_version.clone(),
        )
    }

    async fn execute(self, config: UpdaterConfig) -> anyhow::Result<ExitCode> {
        let request = self.to_request();
        let orchestrator = UpdateOrchestrator::new(config)?;

        let renderer = spawn_console_renderer(orchestrator.subscribe());
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling update");
                on_signal.cancel();
            }
        });

        let report = orchestrator.run(request, cancel).await;
        signal_task.abort();
        drop(orchestrator);
        if let Err(e) = renderer.await {
            warn!("Status renderer stopped abnormally: {}", e);
        }

        info!("Session history: {:?}", report.history);
        if let Some(backup) = &report.retained_backup {
            eprintln!(
                "Previous installation kept at {} (restore with `zelly-updater rollback --app-path {}`)",
                backup.location.display(),
                backup.source.display()
            );
        }
        Ok(report.exit_code())
    }
}

impl CheckArgs {
    async fn execute(self, config: &UpdaterConfig) -> anyhow::Result<ExitCode> {
        let Some(endpoint) = self.endpoint.or_else(|| config.version.endpoint.clone()) else {
            eprintln!("No version endpoint given; pass --endpoint or set version.endpoint");
            return Ok(ExitCode::InvalidInput);
        };

        let client = VersionClient::new(&endpoint, &config.download)?;
        let check = match client.check_for_update(&self.current_version).await {
            Ok(check) => check,
            Err(UpdateError::Validation(msg)) => {
                eprintln!("Invalid input: {msg}");
                return Ok(ExitCode::InvalidInput);
            }
            Err(e) => {
                eprintln!("Version check failed: {e}");
                return Ok(ExitCode::GeneralError);
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&check)?);
            return Ok(ExitCode::Success);
        }

        match check.available() {
            Some(release) => {
                println!(
                    "Update available: {} (build {}, {}, released {})",
                    release.version, release.build_number, release.file_size, release.release_date
                );
                if let Ok(current) = self.current_version.parse() {
                    if release.requires_update_from(&current) {
                        println!("This update is required.");
                    }
                }
                if !release.release_notes.is_empty() {
                    println!("\n{}", release.release_notes);
                }
                println!("\nDownload: {}", release.download_url);
            }
            None => println!("{} ({})", zelly_core::UP_TO_DATE_MESSAGE, self.current_version),
        }
        Ok(ExitCode::Success)
    }
}

impl RollbackArgs {
    async fn execute(self, config: UpdaterConfig) -> anyhow::Result<ExitCode> {
        let orchestrator = UpdateOrchestrator::new(config)?;
        match orchestrator.rollback(&self.app_path).await {
            Ok(snapshot) => {
                println!(
                    "Restored {} from the backup taken {}",
                    self.app_path.display(),
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                Ok(ExitCode::Success)
            }
            Err(e @ UpdateError::NoBackup(_)) | Err(e @ UpdateError::BackupCorrupted(_)) => {
                eprintln!("Rollback failed: {e}");
                Ok(ExitCode::BackupFailed)
            }
            Err(e) => {
                eprintln!("Rollback failed: {e}");
                Ok(ExitCode::GeneralError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_invocation() {
        let cli = Cli::try_parse_from([
            "zelly-updater",
            "--app-path",
            "C:\\Program Files\\Tezzro",
            "--update-url",
            "https://updates.example.com/updater_v103.exe",
            "--current-version",
            "1.0.2",
            "--target-version",
            "1.0.3",
        ])
        .unwrap();

        assert!(cli.command.is_none());
        let request = cli.apply.to_request();
        assert_eq!(request.current_version(), "1.0.2");
        assert_eq!(request.target_version(), Some("1.0.3"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_flags_fail_validation() {
        let cli = Cli::try_parse_from(["zelly-updater", "--current-version", "1.0.2"]).unwrap();
        let request = cli.apply.to_request();
        assert!(matches!(request.validate(), Err(UpdateError::Validation(_))));
    }

    #[test]
    fn test_check_subcommand() {
        let cli = Cli::try_parse_from([
            "zelly-updater",
            "check",
            "--endpoint",
            "http://127.0.0.1:8000/check",
            "--current-version",
            "1.0.2",
            "--json",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug);
        match &cli.command {
            Some(Commands::Check(args)) => {
                assert_eq!(args.current_version, "1.0.2");
                assert!(args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(
            cli.overrides().endpoint.as_deref(),
            Some("http://127.0.0.1:8000/check")
        );
    }

    #[test]
    fn test_rollback_subcommand() {
        let cli =
            Cli::try_parse_from(["zelly-updater", "rollback", "--app-path", "/opt/tezzro"]).unwrap();
        match cli.command {
            Some(Commands::Rollback(args)) => assert_eq!(args.app_path, PathBuf::from("/opt/tezzro")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_overrides_from_flags() {
        let cli = Cli::try_parse_from([
            "zelly-updater",
            "--executable",
            "tezzro.exe",
            "--keep-backup",
            "-v",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.executable.as_deref(), Some("tezzro.exe"));
        assert_eq!(overrides.keep_backup, Some(true));
        assert_eq!(overrides.verbose, Some(true));
        assert_eq!(overrides.debug, Some(false));
    }
}
