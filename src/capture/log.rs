//! Append-only keystroke log and the recorder that feeds it.

use crate::capture::clock::SharedClock;
use crate::capture::context::{CaptureContext, ContextTracker};
use crate::capture::types::{DeviceInfo, KeyEvent, RawKeyEvent};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Ordered keystroke records for the current session.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<KeyEvent>,
    session_start: Option<DateTime<Utc>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a raw event with the given context and append it.
    ///
    /// The first append of a session fixes `session_start`. Timestamps earlier
    /// than the previous event are clamped so the log never goes backwards.
    pub fn append(
        &mut self,
        raw: RawKeyEvent,
        at: DateTime<Utc>,
        context: &CaptureContext,
    ) -> KeyEvent {
        let timestamp = match self.events.last() {
            Some(last) if at < last.timestamp => last.timestamp,
            _ => at,
        };
        let session_start = *self.session_start.get_or_insert(timestamp);

        let event = KeyEvent {
            key: raw.key,
            code: raw.code,
            event_type: raw.event_type,
            timestamp,
            session_id: context.session_id.clone(),
            field_name: context.field_name.clone(),
            challenge_id: context.challenge_id.clone(),
            elapsed_since_start: (timestamp - session_start).num_milliseconds(),
            device_info: context.device_info.clone(),
        };
        self.events.push(event.clone());
        event
    }

    /// Independent copy of the log as it is now.
    pub fn snapshot(&self) -> Vec<KeyEvent> {
        self.events.clone()
    }

    /// Borrow the live events without copying.
    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    /// Start a new session: drop all events, forget the start instant, rotate the
    /// session id and abandon any active challenge.
    pub fn reset(&mut self, context: &mut ContextTracker) {
        let dropped = self.events.len();
        self.events.clear();
        self.session_start = None;
        let session_id = context.begin_new_session();
        debug!(dropped, session_id, "event log reset");
    }
}

/// The capture engine: owns the log and the context, stamps events from a clock.
pub struct KeystrokeRecorder {
    log: EventLog,
    context: ContextTracker,
    clock: SharedClock,
}

impl KeystrokeRecorder {
    pub fn new(device_info: DeviceInfo, clock: SharedClock) -> Self {
        Self {
            log: EventLog::new(),
            context: ContextTracker::new(device_info),
            clock,
        }
    }

    /// Tag a raw event with the current context and append it.
    pub fn record(&mut self, raw: RawKeyEvent) -> KeyEvent {
        let context = self.context.snapshot();
        self.log.append(raw, self.clock.now(), &context)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn context(&self) -> &ContextTracker {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextTracker {
        &mut self.context
    }

    pub fn snapshot(&self) -> Vec<KeyEvent> {
        self.log.snapshot()
    }

    pub fn count(&self) -> usize {
        self.log.count()
    }

    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn reset(&mut self) {
        self.log.reset(&mut self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::clock::ManualClock;
    use crate::capture::types::KeyEventType;

    fn recorder(clock: &ManualClock) -> KeystrokeRecorder {
        KeystrokeRecorder::new(DeviceInfo::from("test-device"), clock.shared())
    }

    #[test]
    fn test_snapshot_preserves_call_order() {
        let clock = ManualClock::at_millis(10_000);
        let mut rec = recorder(&clock);

        for c in "hello".chars() {
            rec.record(RawKeyEvent::for_char(c, KeyEventType::KeyDown));
            clock.advance_ms(40);
            rec.record(RawKeyEvent::for_char(c, KeyEventType::KeyUp));
            clock.advance_ms(60);
        }

        let events = rec.snapshot();
        assert_eq!(events.len(), rec.count());
        let keys: String = events
            .iter()
            .filter(|e| e.is_key_down())
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(keys, "hello");
    }

    #[test]
    fn test_first_event_elapsed_is_zero_and_monotone() {
        let clock = ManualClock::at_millis(5_000);
        let mut rec = recorder(&clock);

        let first = rec.record(RawKeyEvent::key_down("a", "KeyA"));
        assert_eq!(first.elapsed_since_start, 0);

        clock.advance_ms(120);
        rec.record(RawKeyEvent::key_up("a", "KeyA"));
        clock.advance_ms(30);
        rec.record(RawKeyEvent::key_down("b", "KeyB"));

        let elapsed: Vec<i64> = rec.snapshot().iter().map(|e| e.elapsed_since_start).collect();
        assert_eq!(elapsed, vec![0, 120, 150]);
    }

    #[test]
    fn test_clock_stepping_back_is_clamped() {
        let clock = ManualClock::at_millis(5_000);
        let mut rec = recorder(&clock);

        rec.record(RawKeyEvent::key_down("a", "KeyA"));
        clock.advance_ms(-500);
        let second = rec.record(RawKeyEvent::key_up("a", "KeyA"));

        assert_eq!(second.timestamp_ms(), 5_000);
        assert_eq!(second.elapsed_since_start, 0);
    }

    #[test]
    fn test_snapshot_is_independent_of_live_log() {
        let clock = ManualClock::at_millis(0);
        let mut rec = recorder(&clock);
        rec.record(RawKeyEvent::key_down("a", "KeyA"));

        let snap = rec.snapshot();
        rec.record(RawKeyEvent::key_up("a", "KeyA"));

        assert_eq!(snap.len(), 1);
        assert_eq!(rec.count(), 2);
    }

    #[test]
    fn test_context_is_captured_not_retroactive() {
        let clock = ManualClock::at_millis(0);
        let mut rec = recorder(&clock);

        rec.context_mut().set_field_name(Some("name".to_string()));
        rec.record(RawKeyEvent::key_down("a", "KeyA"));
        rec.context_mut().set_field_name(Some("email".to_string()));
        rec.context_mut().set_active_challenge(Some("c-9".to_string()));
        rec.record(RawKeyEvent::key_up("a", "KeyA"));

        let events = rec.snapshot();
        assert_eq!(events[0].field_name.as_deref(), Some("name"));
        assert_eq!(events[0].challenge_id, None);
        assert_eq!(events[1].field_name.as_deref(), Some("email"));
        assert_eq!(events[1].challenge_id.as_deref(), Some("c-9"));
    }

    #[test]
    fn test_reset_starts_new_session() {
        let clock = ManualClock::at_millis(0);
        let mut rec = recorder(&clock);
        rec.record(RawKeyEvent::key_down("a", "KeyA"));
        let old_session = rec.session_id().to_string();
        rec.context_mut().set_active_challenge(Some("c-1".to_string()));

        clock.advance_ms(1_000);
        rec.reset();
        rec.reset();

        assert_eq!(rec.count(), 0);
        assert_eq!(rec.log().session_start(), None);
        assert_eq!(rec.context().active_challenge(), None);

        clock.advance_ms(500);
        let first = rec.record(RawKeyEvent::key_down("b", "KeyB"));
        assert_ne!(first.session_id, old_session);
        assert_eq!(first.elapsed_since_start, 0);
        assert_eq!(first.challenge_id, None);
    }
}
