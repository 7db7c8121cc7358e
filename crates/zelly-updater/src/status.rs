//! Status events and the console renderer.
//!
//! The orchestrator publishes typed [`StatusEvent`]s on a broadcast
//! channel. Publishing never blocks: with no subscribers the event is
//! dropped, and a slow subscriber sees `Lagged` instead of stalling the
//! update.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::download::DownloadProgress;
use crate::session::{Stage, UpdateState};

/// Channel capacity; progress events dominate the traffic.
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// One observable step of an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A new state was entered
    Stage { state: UpdateState, message: String },
    /// Download progress
    Progress(DownloadProgress),
    /// Terminal success, possibly degraded by a launch failure
    Completed { version: String },
    /// Terminal failure
    Failed { stage: Stage, message: String },
}

impl StatusEvent {
    /// Entering `state`, with its standard message.
    pub fn entered(state: UpdateState) -> Self {
        Self::Stage {
            message: stage_message(state).to_string(),
            state,
        }
    }

    pub fn completed(version: impl Into<String>) -> Self {
        Self::Completed {
            version: version.into(),
        }
    }

    pub fn failed(stage: Stage, cause: impl std::fmt::Display) -> Self {
        Self::Failed {
            stage,
            message: format!("Update failed while {}: {}", stage.describe(), cause),
        }
    }

    /// Human-readable line for this event.
    pub fn message(&self) -> String {
        match self {
            StatusEvent::Stage { message, .. } => message.clone(),
            StatusEvent::Progress(progress) => match progress.percent() {
                Some(percent) => format!("Downloaded {percent}%"),
                None => format!("Downloaded {} KB", progress.downloaded / 1024),
            },
            StatusEvent::Completed { version } => {
                format!("Application updated to version {version}")
            }
            StatusEvent::Failed { message, .. } => message.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusEvent::Completed { .. } | StatusEvent::Failed { .. })
    }
}

fn stage_message(state: UpdateState) -> &'static str {
    match state {
        UpdateState::Idle => "Idle",
        UpdateState::Preparing => "Preparing update...",
        UpdateState::Downloading => "Downloading new version...",
        UpdateState::AwaitingAppExit => "Waiting for the application to close...",
        UpdateState::BackingUp => "Backing up current installation...",
        UpdateState::Installing => "Replacing files...",
        UpdateState::Launching => "Restarting the application...",
        UpdateState::Completed => "Update complete",
        UpdateState::Failed(_) => "Update failed",
    }
}

/// Publishing side of the status channel.
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        if self.tx.send(event).is_err() {
            debug!("No status subscribers");
        }
    }
}

/// Print status lines to stdout until the channel closes.
///
/// Progress is shown in 10% steps; everything else is printed as it
/// arrives.
pub fn spawn_console_renderer(mut rx: broadcast::Receiver<StatusEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_decile: Option<u8> = None;
        loop {
            match rx.recv().await {
                Ok(StatusEvent::Progress(progress)) => {
                    let Some(percent) = progress.percent() else { continue };
                    let decile = percent / 10;
                    if last_decile != Some(decile) {
                        last_decile = Some(decile);
                        println!("{}", StatusEvent::Progress(progress).message());
                    }
                }
                Ok(event) => {
                    let terminal = event.is_terminal();
                    match &event {
                        StatusEvent::Failed { .. } => eprintln!("{}", event.message()),
                        _ => println!("{}", event.message()),
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Status renderer skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            StatusEvent::entered(UpdateState::Installing).message(),
            "Replacing files..."
        );
        assert_eq!(
            StatusEvent::completed("1.0.3").message(),
            "Application updated to version 1.0.3"
        );
        let failed = StatusEvent::failed(Stage::Downloading, "server returned HTTP 404");
        assert_eq!(
            failed.message(),
            "Update failed while downloading: server returned HTTP 404"
        );
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_progress_message() {
        let event = StatusEvent::Progress(DownloadProgress {
            downloaded: 512,
            total: Some(1024),
        });
        assert_eq!(event.message(), "Downloaded 50%");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let sink = StatusSink::new();
        for _ in 0..(STATUS_CHANNEL_CAPACITY * 2) {
            sink.emit(StatusEvent::entered(UpdateState::Preparing));
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_order() {
        let sink = StatusSink::new();
        let mut rx = sink.subscribe();

        sink.emit(StatusEvent::entered(UpdateState::Preparing));
        sink.emit(StatusEvent::entered(UpdateState::Downloading));
        sink.emit(StatusEvent::completed("1.0.3"));

        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::entered(UpdateState::Preparing)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::entered(UpdateState::Downloading)
        );
        assert!(rx.recv().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_renderer_stops_on_terminal_event() {
        let sink = StatusSink::new();
        let handle = spawn_console_renderer(sink.subscribe());
        sink.emit(StatusEvent::entered(UpdateState::Preparing));
        sink.emit(StatusEvent::failed(Stage::Preparing, "invalid request"));
        handle.await.unwrap();
    }
}
