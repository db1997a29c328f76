//! Typing-stress metrics: hold durations, inter-key intervals, pauses and
//! corrections, overall and broken down per form field and per challenge.

use crate::capture::types::{KeyEvent, KeyEventType};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Hold durations outside `(0, MAX_HOLD_MS)` are discarded as noise.
pub const MAX_HOLD_MS: i64 = 2_000;

/// Inter-key intervals outside `(0, MAX_INTERVAL_MS)` are discarded as breaks.
pub const MAX_INTERVAL_MS: i64 = 5_000;

pub const SHORT_PAUSE_MS: i64 = 200;
pub const LONG_PAUSE_MS: i64 = 500;

const BACKSPACE: &str = "Backspace";

/// Metrics for a group of events (a whole session, one field, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypingMetrics {
    pub n_events: usize,
    pub n_keydowns: usize,
    pub duration_sec: f64,
    pub mean_khd_ms: Option<f64>,
    pub sd_khd_ms: Option<f64>,
    pub cv_khd: Option<f64>,
    pub mean_iki_ms: Option<f64>,
    pub sd_iki_ms: Option<f64>,
    pub cv_iki: Option<f64>,
    pub pause_count_200ms: usize,
    pub pause_count_500ms: usize,
    pub backspace_count: usize,
    pub backspace_rate: f64,
    /// Characters per minute, backspaces excluded
    pub cpm: Option<f64>,
}

/// Metrics for the keys typed into one form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetrics {
    pub field_name: String,
    #[serde(flatten)]
    pub metrics: TypingMetrics,
    /// Delay between the first event of the log and the first event in this field
    pub first_key_latency_ms: i64,
}

/// Keys typed while one challenge was on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeActivity {
    pub challenge_id: String,
    pub n_events: usize,
    pub n_keydowns: usize,
}

/// Key hold durations, pairing by logical key.
///
/// The forward scan from a KeyDown stops at the first KeyUp of the same key, or
/// gives up at the next KeyDown of that key, so held-key repeats never share a
/// release.
pub fn hold_durations(events: &[KeyEvent]) -> Vec<i64> {
    let mut holds = Vec::new();
    for (i, down) in events.iter().enumerate() {
        if down.event_type != KeyEventType::KeyDown {
            continue;
        }
        for next in &events[i + 1..] {
            if next.key != down.key {
                continue;
            }
            if next.event_type == KeyEventType::KeyUp {
                let hold = (next.timestamp - down.timestamp).num_milliseconds();
                if 0 < hold && hold < MAX_HOLD_MS {
                    holds.push(hold);
                }
            }
            break;
        }
    }
    holds
}

/// Release-to-press intervals: from a KeyUp to the next KeyDown.
///
/// Each KeyUp is used at most once.
pub fn inter_key_intervals(events: &[KeyEvent]) -> Vec<i64> {
    let mut intervals = Vec::new();
    let mut last_release = None;
    for event in events {
        match event.event_type {
            KeyEventType::KeyUp => last_release = Some(event.timestamp),
            KeyEventType::KeyDown => {
                if let Some(released) = last_release.take() {
                    let gap = (event.timestamp - released).num_milliseconds();
                    if 0 < gap && gap < MAX_INTERVAL_MS {
                        intervals.push(gap);
                    }
                }
            }
        }
    }
    intervals
}

/// Which standard deviation a metric set reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spread {
    /// `n - 1` denominator, undefined for a single value
    Sample,
    /// `n` denominator
    Population,
}

/// Compute the full metric set for a group of events.
///
/// Standard deviations use the sample estimator.
pub fn typing_metrics(events: &[KeyEvent]) -> TypingMetrics {
    metrics_with(events, Spread::Sample)
}

fn metrics_with(events: &[KeyEvent], spread: Spread) -> TypingMetrics {
    let n_keydowns = events.iter().filter(|e| e.is_key_down()).count();
    let backspace_count = events
        .iter()
        .filter(|e| e.is_key_down() && e.key == BACKSPACE)
        .count();

    let duration_ms = span_ms(events);
    let khd = to_f64(&hold_durations(events));
    let iki_raw = inter_key_intervals(events);
    let iki = to_f64(&iki_raw);

    let (mean_khd_ms, sd_khd_ms, cv_khd) = describe(&khd, spread);
    let (mean_iki_ms, sd_iki_ms, cv_iki) = describe(&iki, spread);

    TypingMetrics {
        n_events: events.len(),
        n_keydowns,
        duration_sec: duration_ms as f64 / 1000.0,
        mean_khd_ms,
        sd_khd_ms,
        cv_khd,
        mean_iki_ms,
        sd_iki_ms,
        cv_iki,
        pause_count_200ms: iki_raw.iter().filter(|&&i| i > SHORT_PAUSE_MS).count(),
        pause_count_500ms: iki_raw.iter().filter(|&&i| i > LONG_PAUSE_MS).count(),
        backspace_count,
        backspace_rate: if n_keydowns > 0 {
            backspace_count as f64 / n_keydowns as f64
        } else {
            0.0
        },
        cpm: if duration_ms > 0 {
            Some((n_keydowns - backspace_count) as f64 / (duration_ms as f64 / 60_000.0))
        } else {
            None
        },
    }
}

/// Metrics per named form field, in order of first appearance.
///
/// Field groups are small, so standard deviations use the population
/// estimator and a single value has a spread of zero.
pub fn field_metrics(events: &[KeyEvent]) -> Vec<FieldMetrics> {
    let log_start = match events.first() {
        Some(first) => first.timestamp,
        None => return Vec::new(),
    };

    let mut order: Vec<&str> = Vec::new();
    let mut groups: BTreeMap<&str, Vec<KeyEvent>> = BTreeMap::new();
    for event in events {
        let Some(field) = event.field_name.as_deref().filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        groups
            .entry(field)
            .or_insert_with(|| {
                order.push(field);
                Vec::new()
            })
            .push(event.clone());
    }

    order
        .into_iter()
        .filter_map(|field| {
            let group = groups.remove(field)?;
            let first = group.first()?.timestamp;
            Some(FieldMetrics {
                field_name: field.to_string(),
                metrics: metrics_with(&group, Spread::Population),
                first_key_latency_ms: (first - log_start).num_milliseconds(),
            })
        })
        .collect()
}

/// Event counts per challenge id, in order of first appearance.
pub fn challenge_activity(events: &[KeyEvent]) -> Vec<ChallengeActivity> {
    let mut activity: Vec<ChallengeActivity> = Vec::new();
    for event in events {
        let Some(id) = event.challenge_id.as_deref() else {
            continue;
        };
        let pos = match activity.iter().position(|a| a.challenge_id == id) {
            Some(pos) => pos,
            None => {
                activity.push(ChallengeActivity {
                    challenge_id: id.to_string(),
                    n_events: 0,
                    n_keydowns: 0,
                });
                activity.len() - 1
            }
        };
        let entry = &mut activity[pos];
        entry.n_events += 1;
        if event.is_key_down() {
            entry.n_keydowns += 1;
        }
    }
    activity
}

fn span_ms(events: &[KeyEvent]) -> i64 {
    if events.len() < 2 {
        return 0;
    }
    let min = events.iter().map(|e| e.timestamp).min();
    let max = events.iter().map(|e| e.timestamp).max();
    match (min, max) {
        (Some(min), Some(max)) => (max - min).num_milliseconds(),
        _ => 0,
    }
}

fn to_f64(values: &[i64]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}

/// Mean, standard deviation and coefficient of variation.
fn describe(values: &[f64], spread: Spread) -> (Option<f64>, Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None, None);
    }
    let mean = values.iter().mean();
    let sd = match spread {
        Spread::Population => Some(values.iter().population_std_dev()),
        Spread::Sample if values.len() > 1 => Some(values.iter().std_dev()),
        Spread::Sample => None,
    };
    let cv = match sd {
        Some(sd) if mean > 0.0 => Some(sd / mean),
        _ => None,
    };
    (Some(mean), sd, cv)
}
