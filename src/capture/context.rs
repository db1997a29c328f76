//! The "current context" consulted when tagging new key events.
//!
//! The tracker keeps no history, only the latest values. Readers take a
//! [`CaptureContext`] copy so one event is always tagged from a single,
//! consistent view.

use crate::capture::types::DeviceInfo;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable copy of the context at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureContext {
    pub session_id: String,
    pub field_name: Option<String>,
    pub challenge_id: Option<String>,
    pub device_info: DeviceInfo,
}

/// Mutable current context: active field, active challenge, session and device.
#[derive(Debug, Clone)]
pub struct ContextTracker {
    session_id: String,
    field_name: Option<String>,
    challenge_id: Option<String>,
    device_info: DeviceInfo,
}

impl ContextTracker {
    /// Create a tracker with a fresh session id for the given device.
    pub fn new(device_info: DeviceInfo) -> Self {
        Self {
            session_id: new_session_id(),
            field_name: None,
            challenge_id: None,
            device_info,
        }
    }

    pub fn set_field_name(&mut self, name: Option<String>) {
        self.field_name = name.filter(|n| !n.trim().is_empty());
    }

    pub fn set_active_challenge(&mut self, id: Option<String>) {
        self.challenge_id = id;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn active_challenge(&self) -> Option<&str> {
        self.challenge_id.as_deref()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Copy all four values at once.
    pub fn snapshot(&self) -> CaptureContext {
        CaptureContext {
            session_id: self.session_id.clone(),
            field_name: self.field_name.clone(),
            challenge_id: self.challenge_id.clone(),
            device_info: self.device_info.clone(),
        }
    }

    /// Replace the session id wholesale and drop any active challenge.
    ///
    /// The focused field survives: the widget still has focus after a reset.
    pub(crate) fn begin_new_session(&mut self) -> &str {
        self.session_id = new_session_id();
        self.challenge_id = None;
        &self.session_id
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_detached() {
        let mut tracker = ContextTracker::new(DeviceInfo::from("test"));
        tracker.set_field_name(Some("email".to_string()));
        let before = tracker.snapshot();

        tracker.set_field_name(Some("age".to_string()));
        tracker.set_active_challenge(Some("c-1".to_string()));

        assert_eq!(before.field_name.as_deref(), Some("email"));
        assert_eq!(before.challenge_id, None);
        assert_eq!(tracker.snapshot().challenge_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_blank_field_name_is_absent() {
        let mut tracker = ContextTracker::new(DeviceInfo::from("test"));
        tracker.set_field_name(Some("  ".to_string()));
        assert_eq!(tracker.field_name(), None);
    }

    #[test]
    fn test_new_session_clears_challenge() {
        let mut tracker = ContextTracker::new(DeviceInfo::from("test"));
        let first = tracker.session_id().to_string();
        tracker.set_active_challenge(Some("c-1".to_string()));
        tracker.set_field_name(Some("name".to_string()));

        tracker.begin_new_session();

        assert_ne!(tracker.session_id(), first);
        assert_eq!(tracker.active_challenge(), None);
        assert_eq!(tracker.field_name(), Some("name"));
    }
}
