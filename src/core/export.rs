//! Structured (JSON) and tabular (CSV) renderings of a log snapshot.
//!
//! Both renderings are pure: they take a snapshot and analytics and return text.
//! Writing the text somewhere is left to the caller.

use crate::capture::types::{DeviceInfo, KeyEvent, KeyEventType};
use crate::core::analytics::AnalyticsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order of the tabular export.
pub const CSV_HEADER: [&str; 10] = [
    "index",
    "eventType",
    "key",
    "code",
    "timestamp",
    "sessionId",
    "fieldName",
    "challengeId",
    "elapsedSinceStart",
    "deviceInfo",
];

/// Errors raised while rendering or reading back an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed row {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Missing or unexpected header")]
    BadHeader,
}

/// The structured export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredExport {
    pub events: Vec<KeyEvent>,
    pub analytics: AnalyticsSnapshot,
    pub exported_at: DateTime<Utc>,
}

impl StructuredExport {
    pub fn new(events: Vec<KeyEvent>, analytics: AnalyticsSnapshot, exported_at: DateTime<Utc>) -> Self {
        Self {
            events,
            analytics,
            exported_at,
        }
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Render the structured export as pretty JSON.
pub fn to_json(
    events: &[KeyEvent],
    analytics: &AnalyticsSnapshot,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    StructuredExport::new(events.to_vec(), analytics.clone(), exported_at).to_json()
}

/// Render the tabular export: one header row, then one row per event.
///
/// Commas in `deviceInfo` become semicolons. Other cells that contain a comma,
/// quote or line break are quoted, so keys such as `,` survive a round trip.
pub fn to_csv(events: &[KeyEvent]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');

    for (index, event) in events.iter().enumerate() {
        let cells = [
            index.to_string(),
            event.event_type.to_string(),
            quote(&event.key),
            quote(&event.code),
            event.timestamp_ms().to_string(),
            quote(&event.session_id),
            quote(event.field_name.as_deref().unwrap_or("")),
            quote(event.challenge_id.as_deref().unwrap_or("")),
            event.elapsed_since_start.to_string(),
            quote(&event.device_info.as_str().replace(',', ";")),
        ];
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Read a tabular export back into events.
///
/// Empty `fieldName`/`challengeId` cells become `None`. Device info keeps its
/// semicolons, the comma escape is not reversible.
pub fn from_csv(text: &str) -> Result<Vec<KeyEvent>, ExportError> {
    let mut records = split_records(text)?.into_iter();

    let header = match records.next() {
        Some((_, cells)) => cells,
        None => return Ok(Vec::new()),
    };
    if header.iter().map(String::as_str).ne(CSV_HEADER.iter().copied()) {
        return Err(ExportError::BadHeader);
    }

    let mut events = Vec::new();
    for (line_no, cells) in records {
        let malformed = |message: String| ExportError::Malformed {
            line: line_no,
            message,
        };

        if cells.len() != CSV_HEADER.len() {
            return Err(malformed(format!(
                "expected {} columns, found {}",
                CSV_HEADER.len(),
                cells.len()
            )));
        }

        let event_type: KeyEventType = cells[1].parse().map_err(malformed)?;
        let timestamp_ms: i64 = cells[4]
            .parse()
            .map_err(|e| malformed(format!("bad timestamp '{}': {e}", cells[4])))?;
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or_else(|| malformed(format!("timestamp out of range: {timestamp_ms}")))?;
        let elapsed_since_start: i64 = cells[8]
            .parse()
            .map_err(|e| malformed(format!("bad elapsedSinceStart '{}': {e}", cells[8])))?;

        events.push(KeyEvent {
            key: cells[2].clone(),
            code: cells[3].clone(),
            event_type,
            timestamp,
            session_id: cells[5].clone(),
            field_name: non_empty(&cells[6]),
            challenge_id: non_empty(&cells[7]),
            elapsed_since_start,
            device_info: DeviceInfo(cells[9].clone()),
        });
    }
    Ok(events)
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn non_empty(cell: &str) -> Option<String> {
    if cell.is_empty() {
        None
    } else {
        Some(cell.to_string())
    }
}

/// Split CSV text into records tagged with the line each one starts on.
///
/// Quoted cells may span line breaks. Blank lines between records are skipped.
fn split_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, ExportError> {
    let mut records = Vec::new();
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = text.chars().peekable();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut line = 1;
    let mut start_line = 1;

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.is_empty() => {
                in_quotes = true;
                quoted = true;
            }
            (',', false) => cells.push(std::mem::take(&mut cell)),
            ('\r', false) if chars.peek() == Some(&'\n') => {}
            ('\n', false) => {
                cells.push(std::mem::take(&mut cell));
                let record = std::mem::take(&mut cells);
                if quoted || !is_blank(&record) {
                    records.push((start_line, record));
                }
                quoted = false;
                line += 1;
                start_line = line;
            }
            (c, _) => {
                if c == '\n' {
                    line += 1;
                }
                cell.push(c);
            }
        }
    }
    if in_quotes {
        return Err(ExportError::Malformed {
            line: start_line,
            message: "unterminated quoted cell".to_string(),
        });
    }
    cells.push(cell);
    if quoted || !is_blank(&cells) {
        records.push((start_line, cells));
    }
    Ok(records)
}

fn is_blank(record: &[String]) -> bool {
    matches!(record, [only] if only.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analytics::{analyze, tests::make_event};
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<KeyEvent> {
        let mut comma = make_event(",", KeyEventType::KeyDown, 150);
        comma.code = "Comma".to_string();
        comma.field_name = Some("address".to_string());
        comma.challenge_id = Some("c-1".to_string());
        comma.device_info = DeviceInfo::from("host, linux, x86_64");
        vec![
            make_event("a", KeyEventType::KeyDown, 0),
            make_event("a", KeyEventType::KeyUp, 90),
            comma,
        ]
    }

    #[test]
    fn test_csv_header_and_rows() {
        let csv = to_csv(&sample());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "index,eventType,key,code,timestamp,sessionId,fieldName,challengeId,elapsedSinceStart,deviceInfo"
        );
        assert_eq!(lines[1], "0,keydown,a,a,1700000000000,session,,,0,test");
        assert!(lines[3].starts_with("2,keydown,\",\",Comma,"));
        assert!(lines[3].ends_with(",150,host; linux; x86_64"));
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_csv_round_trip() {
        let events = sample();
        let parsed = from_csv(&to_csv(&events)).unwrap();

        assert_eq!(parsed.len(), events.len());
        for (original, back) in events.iter().zip(&parsed) {
            assert_eq!(back.key, original.key);
            assert_eq!(back.code, original.code);
            assert_eq!(back.timestamp_ms(), original.timestamp_ms());
            assert_eq!(back.field_name, original.field_name);
            assert_eq!(back.challenge_id, original.challenge_id);
        }
        assert_eq!(parsed[2].device_info.as_str(), "host; linux; x86_64");
    }

    #[test]
    fn test_csv_empty_log_is_header_only() {
        let csv = to_csv(&[]);
        assert_eq!(csv.lines().count(), 1);
        assert!(from_csv(&csv).unwrap().is_empty());
    }

    #[test]
    fn test_from_csv_rejects_bad_rows() {
        assert!(matches!(from_csv("a,b\n"), Err(ExportError::BadHeader)));

        let mut csv = CSV_HEADER.join(",");
        csv.push_str("\n0,keypress,a,KeyA,0,s,,,0,dev\n");
        assert!(matches!(
            from_csv(&csv),
            Err(ExportError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_csv_round_trip_keeps_line_breaks_in_cells() {
        let mut events = sample();
        events[0].field_name = Some("street\naddress".to_string());
        events[1].key = "\r\n".to_string();

        let parsed = from_csv(&to_csv(&events)).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].field_name.as_deref(), Some("street\naddress"));
        assert_eq!(parsed[1].key, "\r\n");
        assert_eq!(parsed[2].key, ",");
    }

    #[test]
    fn test_from_csv_reports_starting_line() {
        let mut csv = CSV_HEADER.join(",");
        csv.push_str("\n0,keydown,a,KeyA,0,s,\"two\nlines\",,0,dev\n\n");
        csv.push_str("1,keydown,b,KeyB,oops,s,,,0,dev\n");
        assert!(matches!(
            from_csv(&csv),
            Err(ExportError::Malformed { line: 5, .. })
        ));

        let mut open = CSV_HEADER.join(",");
        open.push_str("\n0,keydown,\"a,KeyA,0,s,,,0,dev\n");
        assert!(matches!(
            from_csv(&open),
            Err(ExportError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_structured_export_contains_everything() {
        let events = sample();
        let analytics = analyze(&events);
        let exported_at = DateTime::from_timestamp_millis(1_700_000_100_000).unwrap();

        let json = to_json(&events, &analytics, exported_at).unwrap();
        let back = StructuredExport::from_json(&json).unwrap();

        assert_eq!(back.events, events);
        assert_eq!(back.analytics, analytics);
        assert_eq!(back.exported_at, exported_at);
    }
}
