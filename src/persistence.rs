//! Saving keystroke records to a record store.
//!
//! Records are shaped from a log snapshot and handed to a [`RecordSink`] in
//! batches. Saving only reads the snapshot, so a failed save can simply be
//! retried.

use crate::capture::types::KeyEvent;
use crate::config::MAX_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// One keystroke as stored by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeRecord {
    pub key: String,
    /// RFC 3339, millisecond precision, UTC
    pub pressed_at: String,
    /// Gap from the previous event in the same session
    pub latency_ms: Option<i64>,
    pub meta: BTreeMap<String, Value>,
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Record store network error: {0}")]
    Network(String),

    #[error("Record store error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record store config error: {0}")]
    Config(String),
}

/// Anything that accepts batches of records.
pub trait RecordSink {
    /// Store one batch, returning how many records were accepted.
    fn insert_batch(&mut self, records: &[KeystrokeRecord]) -> Result<usize, PersistError>;
}

/// Shape a log snapshot into records tagged with the test type.
pub fn build_records(
    events: &[KeyEvent],
    test_type: &str,
    instruction: Option<&str>,
) -> Vec<KeystrokeRecord> {
    let mut previous: Option<&KeyEvent> = None;
    events
        .iter()
        .map(|event| {
            let latency_ms = previous
                .filter(|p| p.session_id == event.session_id)
                .map(|p| event.timestamp_ms() - p.timestamp_ms());
            previous = Some(event);

            let mut meta = BTreeMap::new();
            meta.insert("code".to_string(), Value::from(event.code.as_str()));
            meta.insert("event_type".to_string(), Value::from(event.event_type.as_str()));
            meta.insert("session_id".to_string(), Value::from(event.session_id.as_str()));
            meta.insert("field_name".to_string(), Value::from(event.field_name.clone()));
            meta.insert("challenge_id".to_string(), Value::from(event.challenge_id.clone()));
            meta.insert("elapsed_ms".to_string(), Value::from(event.elapsed_since_start));
            meta.insert("device_info".to_string(), Value::from(event.device_info.as_str()));
            meta.insert("test_type".to_string(), Value::from(test_type));
            if let Some(instruction) = instruction {
                meta.insert("instruction".to_string(), Value::from(instruction));
            }

            KeystrokeRecord {
                key: event.key.clone(),
                pressed_at: event
                    .timestamp
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                latency_ms,
                meta,
            }
        })
        .collect()
}

/// Save records in batches of at most `batch_size` (capped at 500).
///
/// Returns the total accepted count, or the first error. Batches already
/// accepted before the error stay accepted.
pub fn save_records<S: RecordSink + ?Sized>(
    sink: &mut S,
    records: &[KeystrokeRecord],
    batch_size: usize,
) -> Result<usize, PersistError> {
    let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut saved = 0;
    for (i, batch) in records.chunks(batch_size).enumerate() {
        match sink.insert_batch(batch) {
            Ok(count) => {
                saved += count;
                debug!(batch = i, count, "batch saved");
            }
            Err(e) => {
                warn!(batch = i, saved, "batch failed: {e}");
                return Err(e);
            }
        }
    }
    Ok(saved)
}

/// Appends records to a JSON Lines file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlSink {
    fn insert_batch(&mut self, records: &[KeystrokeRecord]) -> Result<usize, PersistError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        Ok(records.len())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<KeystrokeRecord>,
    /// Batch sizes in call order
    pub batches: Vec<usize>,
    /// Fail the call with this index (0-based)
    pub fail_on_batch: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `n`th call fails with a server error.
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_batch: Some(n),
            ..Self::default()
        }
    }
}

impl RecordSink for MemorySink {
    fn insert_batch(&mut self, records: &[KeystrokeRecord]) -> Result<usize, PersistError> {
        if self.fail_on_batch == Some(self.batches.len()) {
            self.batches.push(records.len());
            return Err(PersistError::Server {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.batches.push(records.len());
        self.records.extend_from_slice(records);
        Ok(records.len())
    }
}

#[cfg(feature = "remote")]
pub use remote::RestSink;

#[cfg(feature = "remote")]
mod remote {
    use super::{KeystrokeRecord, PersistError, RecordSink};
    use crate::config::RemoteConfig;

    /// Posts record batches to a REST table endpoint.
    pub struct RestSink {
        config: RemoteConfig,
        client: reqwest::Client,
        runtime: tokio::runtime::Runtime,
    }

    impl RestSink {
        pub fn new(config: RemoteConfig) -> Result<Self, PersistError> {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .map_err(|e| PersistError::Config(format!("Failed to create HTTP client: {e}")))?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| PersistError::Config(format!("Failed to create runtime: {e}")))?;

            Ok(Self {
                config,
                client,
                runtime,
            })
        }

        /// Table endpoint URL.
        pub fn table_url(&self) -> String {
            table_url(&self.config)
        }

        async fn post(&self, records: &[KeystrokeRecord]) -> Result<usize, PersistError> {
            let response = self
                .client
                .post(self.table_url())
                .header("apikey", &self.config.api_key)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("Content-Type", "application/json")
                .header("Prefer", "return=minimal")
                .json(records)
                .send()
                .await
                .map_err(|e| PersistError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(PersistError::Server {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(records.len())
        }
    }

    impl RecordSink for RestSink {
        fn insert_batch(&mut self, records: &[KeystrokeRecord]) -> Result<usize, PersistError> {
            self.runtime.block_on(self.post(records))
        }
    }

    pub(super) fn table_url(config: &RemoteConfig) -> String {
        format!(
            "{}/rest/v1/{}",
            config.base_url.trim_end_matches('/'),
            config.table
        )
    }

}
