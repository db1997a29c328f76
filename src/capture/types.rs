//! Keystroke event types for the capture engine.
//!
//! Unlike passive timing sensors, form-filling studies need the logical key and
//! the physical code, so both are retained alongside the timing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a key went down or came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
}

impl KeyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyEventType::KeyDown => "keydown",
            KeyEventType::KeyUp => "keyup",
        }
    }

    pub fn is_key_down(&self) -> bool {
        matches!(self, KeyEventType::KeyDown)
    }
}

impl fmt::Display for KeyEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keydown" => Ok(KeyEventType::KeyDown),
            "keyup" => Ok(KeyEventType::KeyUp),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// A physical key action as delivered by the input widget, before tagging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKeyEvent {
    /// Logical key value (printable character or named key such as `Backspace`)
    pub key: String,
    /// Physical key code, independent of layout and shift state
    pub code: String,
    pub event_type: KeyEventType,
}

impl RawKeyEvent {
    pub fn new(key: impl Into<String>, code: impl Into<String>, event_type: KeyEventType) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            event_type,
        }
    }

    pub fn key_down(key: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(key, code, KeyEventType::KeyDown)
    }

    pub fn key_up(key: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(key, code, KeyEventType::KeyUp)
    }

    /// Build a raw event for a typed character, deriving a DOM-style code.
    pub fn for_char(c: char, event_type: KeyEventType) -> Self {
        Self::new(c.to_string(), code_for_char(c), event_type)
    }
}

/// Best-effort physical code for a character typed on a US layout.
pub fn code_for_char(c: char) -> String {
    match c {
        'a'..='z' | 'A'..='Z' => format!("Key{}", c.to_ascii_uppercase()),
        '0'..='9' => format!("Digit{c}"),
        ' ' => "Space".to_string(),
        '.' => "Period".to_string(),
        ',' => "Comma".to_string(),
        '-' => "Minus".to_string(),
        '@' => "Digit2".to_string(),
        '/' => "Slash".to_string(),
        _ => "Unidentified".to_string(),
    }
}

/// Static descriptor of the capturing device, constant for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo(pub String);

impl DeviceInfo {
    /// Describe the current host: hostname, OS and architecture.
    pub fn detect() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self(format!(
            "{hostname}, {}, {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceInfo {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One fully tagged keystroke record.
///
/// Context fields are copied in at capture time and never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub key: String,
    pub code: String,
    pub event_type: KeyEventType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub field_name: Option<String>,
    pub challenge_id: Option<String>,
    /// Milliseconds since the first event of the session
    pub elapsed_since_start: i64,
    pub device_info: DeviceInfo,
}

impl KeyEvent {
    pub fn is_key_down(&self) -> bool {
        self.event_type.is_key_down()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
