//! Pure computations over event snapshots.
//!
//! - Session analytics and pairing helpers
//! - Typing-stress metrics (hold times, intervals, pauses, corrections)
//! - Cohort summaries across sessions
//! - Structured and tabular export

pub mod analytics;
pub mod export;
pub mod metrics;
pub mod summary;

pub use analytics::{analyze, inter_key_delays, key_press_durations, AnalyticsSnapshot};
pub use export::{from_csv, to_csv, to_json, ExportError, StructuredExport, CSV_HEADER};
pub use metrics::{
    challenge_activity, field_metrics, typing_metrics, ChallengeActivity, FieldMetrics,
    TypingMetrics,
};
pub use summary::{pearson, summarize, MetricRow, MetricSummary};
