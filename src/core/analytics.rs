//! Summary statistics and per-key timing over a log snapshot.
//!
//! Everything here is a pure function of the events passed in: the live log is
//! never touched, and an empty slice yields zeros or empty sequences.

use crate::capture::types::{KeyEvent, KeyEventType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Aggregate counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_events: usize,
    pub keydown_count: usize,
    pub keyup_count: usize,
    /// Milliseconds from the first to the last event
    pub duration: i64,
    /// Key presses per minute over `duration`
    pub average_speed: f64,
    /// Distinct logical key values
    pub unique_keys: usize,
}

/// Compute the summary snapshot for a sequence of events.
pub fn analyze(events: &[KeyEvent]) -> AnalyticsSnapshot {
    let (first, last) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return AnalyticsSnapshot::default(),
    };

    let keydown_count = events.iter().filter(|e| e.is_key_down()).count();
    let keyup_count = events.len() - keydown_count;
    let duration = (last.timestamp - first.timestamp).num_milliseconds().max(0);

    let average_speed = if duration > 0 {
        keydown_count as f64 / (duration as f64 / 60_000.0)
    } else {
        0.0
    };

    let unique_keys = events
        .iter()
        .map(|e| e.key.as_str())
        .collect::<HashSet<_>>()
        .len();

    AnalyticsSnapshot {
        total_events: events.len(),
        keydown_count,
        keyup_count,
        duration,
        average_speed,
        unique_keys,
    }
}

/// Hold durations for one physical key code.
///
/// Each KeyDown of `code` pairs with the first KeyUp of `code` found after it.
/// A KeyUp is not consumed, so two KeyDowns before one KeyUp both pair with it.
/// KeyDowns with no later KeyUp contribute nothing.
pub fn key_press_durations(events: &[KeyEvent], code: &str) -> Vec<i64> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_type == KeyEventType::KeyDown && e.code == code)
        .filter_map(|(i, down)| {
            events[i + 1..]
                .iter()
                .find(|e| e.event_type == KeyEventType::KeyUp && e.code == code)
                .map(|up| (up.timestamp - down.timestamp).num_milliseconds())
        })
        .collect()
}

/// Gaps between successive KeyDown events, in log order.
pub fn inter_key_delays(events: &[KeyEvent]) -> Vec<i64> {
    let downs: Vec<&KeyEvent> = events.iter().filter(|e| e.is_key_down()).collect();
    downs
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds())
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::types::DeviceInfo;
    use chrono::DateTime;

    pub(crate) fn make_event(key: &str, event_type: KeyEventType, at_ms: i64) -> KeyEvent {
        KeyEvent {
            key: key.to_string(),
            code: key.to_string(),
            event_type,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000 + at_ms).unwrap(),
            session_id: "session".to_string(),
            field_name: None,
            challenge_id: None,
            elapsed_since_start: at_ms,
            device_info: DeviceInfo::from("test"),
        }
    }

    use KeyEventType::{KeyDown, KeyUp};

    #[test]
    fn test_analyze_empty() {
        let snapshot = analyze(&[]);
        assert_eq!(snapshot, AnalyticsSnapshot::default());
        assert_eq!(snapshot.average_speed, 0.0);
    }

    #[test]
    fn test_analyze_counts_and_speed() {
        let events = vec![
            make_event("a", KeyDown, 0),
            make_event("a", KeyUp, 100),
            make_event("b", KeyDown, 30_000),
            make_event("b", KeyUp, 60_000),
        ];

        let snapshot = analyze(&events);
        assert_eq!(snapshot.total_events, 4);
        assert_eq!(snapshot.keydown_count, 2);
        assert_eq!(snapshot.keyup_count, 2);
        assert_eq!(snapshot.duration, 60_000);
        assert!((snapshot.average_speed - 2.0).abs() < 1e-9);
        assert_eq!(snapshot.unique_keys, 2);
    }

    #[test]
    fn test_single_event_has_zero_speed() {
        let snapshot = analyze(&[make_event("a", KeyDown, 0)]);
        assert_eq!(snapshot.duration, 0);
        assert_eq!(snapshot.average_speed, 0.0);
    }

    #[test]
    fn test_key_press_durations() {
        let events = vec![
            make_event("a", KeyDown, 0),
            make_event("a", KeyUp, 100),
            make_event("a", KeyDown, 200),
            make_event("a", KeyUp, 250),
        ];
        assert_eq!(key_press_durations(&events, "a"), vec![100, 50]);
        assert!(key_press_durations(&events, "b").is_empty());
    }

    #[test]
    fn test_key_press_durations_repeat_shares_keyup() {
        let events = vec![
            make_event("a", KeyDown, 0),
            make_event("a", KeyDown, 30),
            make_event("a", KeyUp, 100),
        ];
        assert_eq!(key_press_durations(&events, "a"), vec![100, 70]);
    }

    #[test]
    fn test_unmatched_keydown_contributes_nothing() {
        let events = vec![
            make_event("a", KeyUp, 0),
            make_event("a", KeyDown, 10),
        ];
        assert!(key_press_durations(&events, "a").is_empty());
    }

    #[test]
    fn test_inter_key_delays_ignores_keyups() {
        let events = vec![
            make_event("a", KeyDown, 0),
            make_event("a", KeyUp, 80),
            make_event("b", KeyDown, 300),
            make_event("b", KeyUp, 400),
            make_event("c", KeyDown, 900),
        ];
        assert_eq!(inter_key_delays(&events), vec![300, 600]);
        assert!(inter_key_delays(&[]).is_empty());
    }
}
