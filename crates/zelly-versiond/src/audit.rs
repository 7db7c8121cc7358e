//! Request audit log.
//!
//! Request handlers hand entries to a background writer through a bounded
//! channel. A full channel drops the entry; a request is never delayed by
//! the log.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, NaiveDateTime};
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHECK_MARKER: &str = " - Version check from ";
const CHECK_FIELD: &str = " - Current: ";
const DOWNLOAD_MARKER: &str = " - Download request from ";
const DOWNLOAD_FIELD: &str = " - Version: ";

/// What a client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Check { current: String },
    Download { version: String },
}

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub at: DateTime<Local>,
    pub client: String,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn check(client: impl Into<String>, current: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            client: client.into(),
            event: AuditEvent::Check {
                current: current.into(),
            },
        }
    }

    pub fn download(client: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            client: client.into(),
            event: AuditEvent::Download {
                version: version.into(),
            },
        }
    }

    /// `YYYY-MM-DD HH:MM:SS - Version check from <ip> - Current: <version>`
    /// or `YYYY-MM-DD HH:MM:SS - Download request from <ip> - Version: <version>`
    pub fn line(&self) -> String {
        let (marker, field, value) = match &self.event {
            AuditEvent::Check { current } => (CHECK_MARKER, CHECK_FIELD, current),
            AuditEvent::Download { version } => (DOWNLOAD_MARKER, DOWNLOAD_FIELD, version),
        };
        format!(
            "{}{}{}{}{}",
            self.at.format(STAMP_FORMAT),
            marker,
            self.client,
            field,
            value
        )
    }

    /// Inverse of [`AuditEntry::line`]. Lines in any other shape give `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let stamp = line.get(..19)?;
        let rest = line.get(19..)?;
        let at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
            .ok()?
            .and_local_timezone(Local)
            .earliest()?;

        if let Some(rest) = rest.strip_prefix(CHECK_MARKER) {
            let (client, current) = rest.split_once(CHECK_FIELD)?;
            return Some(Self {
                at,
                client: client.to_string(),
                event: AuditEvent::Check {
                    current: current.to_string(),
                },
            });
        }

        let rest = rest.strip_prefix(DOWNLOAD_MARKER)?;
        let (client, version) = rest.split_once(DOWNLOAD_FIELD)?;
        Some(Self {
            at,
            client: client.to_string(),
            event: AuditEvent::Download {
                version: version.to_string(),
            },
        })
    }
}

/// Counters rebuilt from the log on startup and kept current afterwards.
#[derive(Debug, Default)]
struct Tally {
    checks: AtomicU64,
    /// Check times newer than the recent window, oldest first.
    recent: Mutex<VecDeque<DateTime<Local>>>,
    downloads: DashMap<String, u64>,
}

impl Tally {
    fn count(&self, entry: &AuditEntry) {
        match &entry.event {
            AuditEvent::Check { .. } => {
                self.checks.fetch_add(1, Ordering::Relaxed);
                let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
                recent.push_back(entry.at);
            }
            AuditEvent::Download { version } => {
                *self.downloads.entry(version.clone()).or_insert(0) += 1;
            }
        }
    }

    fn recent_checks(&self, now: DateTime<Local>) -> u64 {
        let cutoff = now - Duration::hours(24);
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        while recent.front().is_some_and(|at| *at <= cutoff) {
            recent.pop_front();
        }
        recent.len() as u64
    }
}

/// Handle used by request handlers.
#[derive(Debug, Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEntry>,
    tally: Arc<Tally>,
}

impl AuditLog {
    /// Start the writer task.
    ///
    /// With a path, entries are appended to that file and the counters
    /// start from the entries already in it. Without one, entries only go
    /// to the tracing output.
    pub async fn spawn(path: Option<PathBuf>, capacity: usize) -> (Self, JoinHandle<()>) {
        let tally = Tally::default();
        if let Some(path) = &path {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    let mut skipped = 0;
                    for line in content.lines().filter(|l| !l.trim().is_empty()) {
                        match AuditEntry::parse_line(line) {
                            Some(entry) => tally.count(&entry),
                            None => skipped += 1,
                        }
                    }
                    if skipped > 0 {
                        warn!("Ignored {} unrecognised lines in audit log {:?}", skipped, path);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not read audit log {:?}: {}", path, e),
            }
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_entries(path, rx));

        (
            Self {
                tx,
                tally: Arc::new(tally),
            },
            writer,
        )
    }

    /// Queue an entry without waiting.
    pub fn record(&self, entry: AuditEntry) {
        let counted = entry.clone();
        match self.tx.try_send(entry) {
            Ok(()) => self.tally.count(&counted),
            Err(mpsc::error::TrySendError::Full(entry)) => {
                warn!("Audit queue full, dropping entry: {}", entry.line());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit writer stopped, dropping entry");
            }
        }
    }

    /// Checks recorded so far, including those from earlier runs.
    pub fn total_checks(&self) -> u64 {
        self.tally.checks.load(Ordering::Relaxed)
    }

    /// Checks recorded during the 24 hours before `now`.
    pub fn recent_checks(&self, now: DateTime<Local>) -> u64 {
        self.tally.recent_checks(now)
    }

    /// Download requests recorded for `version`.
    pub fn downloads(&self, version: &str) -> u64 {
        self.tally
            .downloads
            .get(version)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

async fn write_entries(path: Option<PathBuf>, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut file = match &path {
        Some(path) => match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Could not open audit log {:?}: {}", path, e);
                None
            }
        },
        None => None,
    };

    while let Some(entry) = rx.recv().await {
        let line = entry.line();
        info!(target: "audit", "{}", line);

        if let Some(out) = file.as_mut() {
            let written = async {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!("Failed to append to audit log: {}", e);
            }
        }
    }
}
