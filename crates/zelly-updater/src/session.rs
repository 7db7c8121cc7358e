//! Update session state and outcomes.

use std::fmt;

use tracing::{debug, warn};

use crate::backup::BackupSnapshot;
use crate::error::UpdateError;
use crate::launch::ProcessHandle;
use crate::ExitCode;

/// Stage in which a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preparing,
    Downloading,
    AwaitingAppExit,
    BackingUp,
    Installing,
    Launching,
}

impl Stage {
    /// Lowercase phrase used in failure messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Downloading => "downloading",
            Stage::AwaitingAppExit => "waiting for the application to exit",
            Stage::BackingUp => "backing up",
            Stage::Installing => "installing",
            Stage::Launching => "launching",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Idle,
    Preparing,
    Downloading,
    AwaitingAppExit,
    BackingUp,
    Installing,
    Launching,
    Completed,
    Failed(Stage),
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Completed | UpdateState::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: UpdateState) -> bool {
        use UpdateState::*;
        matches!(
            (*self, next),
            (Idle, Preparing)
                | (Idle, Failed(Stage::Preparing))
                | (Preparing, Downloading)
                | (Preparing, Failed(Stage::Preparing))
                | (Downloading, AwaitingAppExit)
                | (Downloading, Failed(Stage::Downloading))
                | (AwaitingAppExit, BackingUp)
                | (AwaitingAppExit, Installing)
                | (AwaitingAppExit, Failed(Stage::AwaitingAppExit))
                | (BackingUp, Installing)
                | (BackingUp, Failed(Stage::BackingUp))
                | (Installing, Launching)
                | (Installing, Failed(Stage::Installing))
                | (Launching, Completed)
                | (Launching, Failed(Stage::Launching))
        )
    }
}

/// What happened to the install directory after a failed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Failure happened before anything was installed
    NotAttempted,
    /// Backup was put back in place
    Restored,
    /// Fresh install; the partial directory was removed
    RemovedPartial,
    /// Rollback itself failed; the install directory may be inconsistent
    Failed(String),
}

/// Failure of one session.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: UpdateError,
    pub rollback: Rollback,
}

impl StageFailure {
    pub fn new(stage: Stage, error: UpdateError) -> Self {
        Self {
            stage,
            error,
            rollback: Rollback::NotAttempted,
        }
    }

    /// The new version is on disk even though the run failed.
    pub fn installation_updated(&self) -> bool {
        self.stage == Stage::Launching
    }

    pub fn exit_code(&self) -> ExitCode {
        match (&self.error, self.stage) {
            (UpdateError::Cancelled, _) => ExitCode::Cancelled,
            (UpdateError::Validation(_), _) => ExitCode::InvalidInput,
            (_, Stage::Preparing) => ExitCode::GeneralError,
            (_, Stage::Downloading) => ExitCode::DownloadFailed,
            (UpdateError::AppStillRunning { .. }, Stage::AwaitingAppExit) => {
                ExitCode::AppStillRunning
            }
            (_, Stage::AwaitingAppExit) => ExitCode::GeneralError,
            (_, Stage::BackingUp) => ExitCode::BackupFailed,
            (_, Stage::Installing) => ExitCode::InstallFailed,
            (_, Stage::Launching) => ExitCode::LaunchFailed,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed while {}: {}", self.stage, self.error)?;
        match &self.rollback {
            Rollback::NotAttempted => Ok(()),
            Rollback::Restored => write!(f, " (previous installation restored)"),
            Rollback::RemovedPartial => write!(f, " (partial installation removed)"),
            Rollback::Failed(reason) => write!(f, " (rollback failed: {reason})"),
        }
    }
}

/// Terminal result of a session.
#[derive(Debug)]
pub enum UpdateOutcome {
    Completed {
        version: String,
        process: ProcessHandle,
    },
    Failed(StageFailure),
}

/// Outcome plus the states the session passed through.
#[derive(Debug)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    pub history: Vec<UpdateState>,
    /// Snapshot still on disk after the run, available to `rollback`
    pub retained_backup: Option<BackupSnapshot>,
}

impl UpdateReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UpdateOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.outcome {
            UpdateOutcome::Failed(failure) => Some(failure),
            UpdateOutcome::Completed { .. } => None,
        }
    }

    pub fn final_state(&self) -> UpdateState {
        self.history.last().copied().unwrap_or(UpdateState::Idle)
    }

    pub fn exit_code(&self) -> ExitCode {
        match &self.outcome {
            UpdateOutcome::Completed { .. } => ExitCode::Success,
            UpdateOutcome::Failed(failure) => failure.exit_code(),
        }
    }
}

/// Mutable state of one run. Single use.
#[derive(Debug)]
pub struct UpdateSession {
    state: UpdateState,
    pub backup: Option<BackupSnapshot>,
    history: Vec<UpdateState>,
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSession {
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            backup: None,
            history: vec![UpdateState::Idle],
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn history(&self) -> &[UpdateState] {
        &self.history
    }

    pub fn advance(&mut self, next: UpdateState) {
        let legal = self.state.can_advance_to(next);
        if !legal {
            warn!("Unexpected transition {:?} -> {:?}", self.state, next);
        }
        debug_assert!(legal, "illegal transition {:?} -> {:?}", self.state, next);
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Close the session with `outcome`. A backup still held by the
    /// session is handed to the report.
    pub fn finish(self, outcome: UpdateOutcome) -> UpdateReport {
        UpdateReport {
            outcome,
            history: self.history,
            retained_backup: self.backup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            UpdateState::Idle,
            UpdateState::Preparing,
            UpdateState::Downloading,
            UpdateState::AwaitingAppExit,
            UpdateState::BackingUp,
            UpdateState::Installing,
            UpdateState::Launching,
            UpdateState::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_backup_skip_allowed() {
        assert!(UpdateState::AwaitingAppExit.can_advance_to(UpdateState::Installing));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!UpdateState::Idle.can_advance_to(UpdateState::Downloading));
        assert!(!UpdateState::Downloading.can_advance_to(UpdateState::Failed(Stage::Installing)));
        assert!(!UpdateState::Completed.can_advance_to(UpdateState::Preparing));
        assert!(!UpdateState::Failed(Stage::Downloading).can_advance_to(UpdateState::Idle));
    }

    #[test]
    fn test_session_history() {
        let mut session = UpdateSession::new();
        session.advance(UpdateState::Failed(Stage::Preparing));
        assert!(session.state().is_terminal());
        assert_eq!(
            session.history(),
            &[UpdateState::Idle, UpdateState::Failed(Stage::Preparing)]
        );
    }

    #[test]
    fn test_failure_exit_codes() {
        let cases = [
            (Stage::Preparing, UpdateError::Validation("x".into()), ExitCode::InvalidInput),
            (
                Stage::Preparing,
                UpdateError::SessionInProgress(std::path::PathBuf::from("/a")),
                ExitCode::GeneralError,
            ),
            (Stage::Downloading, UpdateError::Http { status: 404 }, ExitCode::DownloadFailed),
            (Stage::Downloading, UpdateError::Cancelled, ExitCode::Cancelled),
            (
                Stage::AwaitingAppExit,
                UpdateError::AppStillRunning { waited_secs: 30 },
                ExitCode::AppStillRunning,
            ),
            (Stage::BackingUp, UpdateError::Artifact("x".into()), ExitCode::BackupFailed),
            (Stage::Installing, UpdateError::Artifact("x".into()), ExitCode::InstallFailed),
            (Stage::Launching, UpdateError::Launch("x".into()), ExitCode::LaunchFailed),
        ];
        for (stage, error, expected) in cases {
            assert_eq!(StageFailure::new(stage, error).exit_code(), expected);
        }
    }

    #[test]
    fn test_launch_failure_is_degraded_success() {
        let failure = StageFailure::new(Stage::Launching, UpdateError::Launch("denied".into()));
        assert!(failure.installation_updated());
        let failure = StageFailure::new(Stage::Installing, UpdateError::Artifact("bad".into()));
        assert!(!failure.installation_updated());
    }

    #[test]
    fn test_failure_display_mentions_rollback() {
        let mut failure = StageFailure::new(Stage::Installing, UpdateError::Artifact("bad".into()));
        failure.rollback = Rollback::Restored;
        assert_eq!(
            failure.to_string(),
            "failed while installing: invalid update artifact: bad (previous installation restored)"
        );
    }
}
