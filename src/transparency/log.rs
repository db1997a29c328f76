//! Cumulative record of what has been collected.
//!
//! Counts only: no key values or field contents are kept here.

use crate::scheduler::machine::SchedulerEvent;
use crate::session::SessionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// File name of the persisted counters under the data directory.
pub const STATS_FILE: &str = "transparency.json";

#[derive(Debug)]
pub struct TransparencyLog {
    sessions_started: AtomicU64,
    key_events: AtomicU64,
    challenges_issued: AtomicU64,
    challenges_completed: AtomicU64,
    challenges_timed_out: AtomicU64,
    exports_written: AtomicU64,
    records_saved: AtomicU64,
    /// When this process started counting
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            key_events: AtomicU64::new(0),
            challenges_issued: AtomicU64::new(0),
            challenges_completed: AtomicU64::new(0),
            challenges_timed_out: AtomicU64::new(0),
            exports_written: AtomicU64::new(0),
            records_saved: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from counters saved at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!("could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_event(&self) {
        self.key_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_written(&self) {
        self.exports_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records_saved(&self, count: u64) {
        self.records_saved.fetch_add(count, Ordering::Relaxed);
    }

    /// Count challenge outcomes reported by a session tick.
    pub fn observe(&self, event: &SessionEvent) {
        let counter = match event {
            SessionEvent::Scheduler(SchedulerEvent::ChallengeIssued(_)) => &self.challenges_issued,
            SessionEvent::Scheduler(SchedulerEvent::ChallengeTimedOut { .. }) => {
                &self.challenges_timed_out
            }
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Completions come from answers rather than ticks.
    pub fn record_challenge_completed(&self) {
        self.challenges_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            key_events: self.key_events.load(Ordering::Relaxed),
            challenges_issued: self.challenges_issued.load(Ordering::Relaxed),
            challenges_completed: self.challenges_completed.load(Ordering::Relaxed),
            challenges_timed_out: self.challenges_timed_out.load(Ordering::Relaxed),
            exports_written: self.exports_written.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Collection Statistics:\n\
             - Test sessions started: {}\n\
             - Key events recorded: {}\n\
             - Challenges issued: {} (completed {}, timed out {})\n\
             - Exports written: {}\n\
             - Records saved: {}\n\
             \n\
             What is recorded:\n\
             - Key values and physical codes with millisecond timestamps\n\
             - The focused form field and any active challenge\n\
             - Host name, OS and architecture",
            stats.sessions_started,
            stats.key_events,
            stats.challenges_issued,
            stats.challenges_completed,
            stats.challenges_timed_out,
            stats.exports_written,
            stats.records_saved,
        )
    }

    /// Save counters to disk, if this log has a path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                sessions_started: stats.sessions_started,
                key_events: stats.key_events,
                challenges_issued: stats.challenges_issued,
                challenges_completed: stats.challenges_completed,
                challenges_timed_out: stats.challenges_timed_out,
                exports_written: stats.exports_written,
                records_saved: stats.records_saved,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let p: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.sessions_started.store(p.sessions_started, Ordering::Relaxed);
                self.key_events.store(p.key_events, Ordering::Relaxed);
                self.challenges_issued.store(p.challenges_issued, Ordering::Relaxed);
                self.challenges_completed
                    .store(p.challenges_completed, Ordering::Relaxed);
                self.challenges_timed_out
                    .store(p.challenges_timed_out, Ordering::Relaxed);
                self.exports_written.store(p.exports_written, Ordering::Relaxed);
                self.records_saved.store(p.records_saved, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub sessions_started: u64,
    pub key_events: u64,
    pub challenges_issued: u64,
    pub challenges_completed: u64,
    pub challenges_timed_out: u64,
    pub exports_written: u64,
    pub records_saved: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedStats {
    sessions_started: u64,
    key_events: u64,
    challenges_issued: u64,
    challenges_completed: u64,
    challenges_timed_out: u64,
    exports_written: u64,
    records_saved: u64,
    last_updated: DateTime<Utc>,
}

/// Transparency log shared between the input thread and the main loop.
pub type SharedTransparencyLog = Arc<TransparencyLog>;
