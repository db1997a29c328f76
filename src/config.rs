//! Configuration for keystroke-lab.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Largest batch the record store accepts in one call.
pub const MAX_BATCH_SIZE: usize = 500;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interruption scheduling for the multitasking mode
    pub scheduler: SchedulerConfig,

    /// Countdown for the timed mode
    #[serde(with = "duration_ms")]
    pub timed_duration: Duration,

    /// Directory for JSON/CSV exports
    pub export_path: PathBuf,

    /// Directory for saved records and the transparency log
    pub data_path: PathBuf,

    /// Records per call to the record store
    pub batch_size: usize,

    /// Remote record store, when one is configured
    pub remote: Option<RemoteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keystroke-lab");

        Self {
            scheduler: SchedulerConfig::default(),
            timed_duration: Duration::from_secs(60),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            batch_size: MAX_BATCH_SIZE,
            remote: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults when it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keystroke-lab")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Batch size clamped to `1..=MAX_BATCH_SIZE`.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    fn normalize(&mut self) {
        self.scheduler = self.scheduler.clone().normalized();
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            warn!(batch_size = self.batch_size, "batch size out of range, clamping");
            self.batch_size = self.effective_batch_size();
        }
    }
}

/// Timing for interruption challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shortest gap before the next challenge
    #[serde(with = "duration_ms")]
    pub min_delay: Duration,
    /// Longest gap before the next challenge
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Time allowed to answer one challenge
    #[serde(with = "duration_ms")]
    pub time_limit: Duration,
    /// Completed challenges after which no more are scheduled
    pub max_challenges: u32,
    /// How long the timeout notice stays up before input comes back
    #[serde(with = "duration_ms")]
    pub timeout_display: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15),
            time_limit: Duration::from_secs(10),
            max_challenges: 5,
            timeout_display: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    /// Fix up inconsistent values instead of rejecting them.
    pub fn normalized(mut self) -> Self {
        if self.min_delay > self.max_delay {
            warn!(
                min_ms = self.min_delay.as_millis() as u64,
                max_ms = self.max_delay.as_millis() as u64,
                "min_delay above max_delay, swapping"
            );
            std::mem::swap(&mut self.min_delay, &mut self.max_delay);
        }
        if self.time_limit.is_zero() {
            warn!("time_limit of zero, using 1ms");
            self.time_limit = Duration::from_millis(1);
        }
        self
    }
}

/// Remote record store (a REST table endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub table: String,
    pub api_key: String,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timed_duration, Duration::from_secs(60));
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.scheduler.max_challenges, 5);
        assert!(config.scheduler.min_delay <= config.scheduler.max_delay);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(SchedulerConfig::default()).unwrap();
        assert_eq!(json["min_delay"], 5000);
        assert_eq!(json["time_limit"], 10000);
    }

    #[test]
    fn test_partial_file_uses_defaults_and_normalizes() {
        let dir = std::env::temp_dir().join(format!("keystroke-lab-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            &path,
            r#"{"scheduler": {"min_delay": 9000, "max_delay": 3000, "time_limit": 0}, "batch_size": 10000}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.scheduler.min_delay, Duration::from_millis(3000));
        assert_eq!(config.scheduler.max_delay, Duration::from_millis(9000));
        assert_eq!(config.scheduler.time_limit, Duration::from_millis(1));
        assert_eq!(config.scheduler.max_challenges, 5);
        assert_eq!(config.batch_size, 500);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("keystroke-lab-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");

        let mut config = Config::default();
        config.scheduler.max_challenges = 3;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler, config.scheduler);

        std::fs::remove_dir_all(&dir).ok();
    }
}
