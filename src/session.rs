//! One test run: a recorder plus the policy of the selected test mode.
//!
//! A [`TestSession`] is built when a mode starts and dropped (or torn down)
//! when it ends. Switching modes means building a new session.

use crate::capture::clock::{Clock, SharedClock};
use crate::capture::log::KeystrokeRecorder;
use crate::capture::types::{DeviceInfo, KeyEvent, KeyEventType, RawKeyEvent};
use crate::config::Config;
use crate::core::analytics::{analyze, AnalyticsSnapshot};
use crate::core::export::{self, ExportError};
use crate::persistence::{build_records, KeystrokeRecord};
use crate::scheduler::machine::{AnswerOutcome, InterruptionScheduler, SchedulerEvent};
use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Experimental condition the form is filled in under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Plain typing, no pressure
    Free,
    /// A session-wide countdown
    Timed,
    /// Random interruption challenges
    Multitasking,
    /// The participant is asked to answer untruthfully
    Lying,
}

impl TestMode {
    pub const ALL: [TestMode; 4] = [
        TestMode::Free,
        TestMode::Timed,
        TestMode::Multitasking,
        TestMode::Lying,
    ];

    /// Tag stored with persisted records.
    pub fn test_type(&self) -> &'static str {
        match self {
            TestMode::Free => "free",
            TestMode::Timed => "timed",
            TestMode::Multitasking => "multitasking",
            TestMode::Lying => "lying",
        }
    }

    /// Extra instruction attached to persisted records, if any.
    pub fn instruction(&self) -> Option<&'static str> {
        match self {
            TestMode::Lying => Some("deceptive"),
            _ => None,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.test_type())
    }
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        TestMode::ALL
            .into_iter()
            .find(|mode| mode.test_type() == wanted)
            .ok_or_else(|| format!("unknown test mode: {s}"))
    }
}

/// Something the host UI should react to after a [`TestSession::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Scheduler(SchedulerEvent),
    /// The timed mode's countdown ran out
    TimeUp,
}

/// Session-wide countdown for the timed mode.
#[derive(Debug, Clone)]
struct Countdown {
    duration: Duration,
    ends_at: Option<DateTime<Utc>>,
    time_up: bool,
}

impl Countdown {
    fn new(duration: Duration) -> Self {
        Self {
            duration,
            ends_at: None,
            time_up: false,
        }
    }

    fn start(&mut self, now: DateTime<Utc>) {
        if self.ends_at.is_none() && !self.time_up {
            self.ends_at = Some(now + self.duration);
        }
    }

    fn tick(&mut self, now: DateTime<Utc>) -> bool {
        match self.ends_at {
            Some(ends_at) if ends_at <= now => {
                self.ends_at = None;
                self.time_up = true;
                true
            }
            _ => false,
        }
    }

    fn clear(&mut self) {
        self.ends_at = None;
        self.time_up = false;
    }
}

enum ModePolicy<R: Rng> {
    Free,
    Timed(Countdown),
    Multitasking(InterruptionScheduler<R>),
    Lying,
}

/// A single test run in one mode.
pub struct TestSession<R: Rng = StdRng> {
    mode: TestMode,
    recorder: KeystrokeRecorder,
    policy: ModePolicy<R>,
}

impl TestSession<StdRng> {
    /// Start a session on this machine with an OS-seeded random source.
    pub fn new(mode: TestMode, config: &Config, clock: SharedClock) -> Self {
        Self::with_parts(mode, config, DeviceInfo::detect(), clock, StdRng::from_entropy())
    }
}

impl<R: Rng> TestSession<R> {
    /// Start a session from explicit parts, for replay and tests.
    pub fn with_parts(
        mode: TestMode,
        config: &Config,
        device_info: DeviceInfo,
        clock: SharedClock,
        rng: R,
    ) -> Self {
        let policy = match mode {
            TestMode::Free => ModePolicy::Free,
            TestMode::Timed => {
                let ms = config.timed_duration.as_millis() as i64;
                ModePolicy::Timed(Countdown::new(Duration::milliseconds(ms)))
            }
            TestMode::Multitasking => ModePolicy::Multitasking(InterruptionScheduler::with_rng(
                config.scheduler.clone(),
                rng,
            )),
            TestMode::Lying => ModePolicy::Lying,
        };
        let recorder = KeystrokeRecorder::new(device_info, clock);
        info!(mode = %mode, session_id = recorder.session_id(), "test session started");

        Self {
            mode,
            recorder,
            policy,
        }
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    pub fn recorder(&self) -> &KeystrokeRecorder {
        &self.recorder
    }

    pub fn session_id(&self) -> &str {
        self.recorder.session_id()
    }

    /// The interruption scheduler, in multitasking mode.
    pub fn scheduler(&self) -> Option<&InterruptionScheduler<R>> {
        match &self.policy {
            ModePolicy::Multitasking(scheduler) => Some(scheduler),
            _ => None,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.recorder.clock().now()
    }

    /// Record a physical key event. Events are kept even while input is disabled.
    pub fn key_event(&mut self, raw: RawKeyEvent) -> KeyEvent {
        self.recorder.record(raw)
    }

    /// A form field gained focus.
    pub fn focus(&mut self, field_name: &str) {
        self.recorder
            .context_mut()
            .set_field_name(Some(field_name.to_string()));
    }

    /// The focused form field lost focus.
    pub fn blur(&mut self) {
        self.recorder.context_mut().set_field_name(None);
    }

    /// A form value changed. The first call starts the mode's clock.
    pub fn form_input(&mut self) {
        let now = self.now();
        match &mut self.policy {
            ModePolicy::Timed(countdown) => countdown.start(now),
            ModePolicy::Multitasking(scheduler) => scheduler.on_form_input(now),
            ModePolicy::Free | ModePolicy::Lying => {}
        }
    }

    /// Advance timers to the clock's current time.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        let now = self.now();
        match &mut self.policy {
            ModePolicy::Timed(countdown) => {
                if countdown.tick(now) {
                    info!(session_id = self.recorder.session_id(), "time is up");
                    vec![SessionEvent::TimeUp]
                } else {
                    Vec::new()
                }
            }
            ModePolicy::Multitasking(scheduler) => scheduler
                .tick(now, self.recorder.context_mut())
                .into_iter()
                .map(SessionEvent::Scheduler)
                .collect(),
            ModePolicy::Free | ModePolicy::Lying => Vec::new(),
        }
    }

    /// Answer the active challenge (multitasking mode only).
    pub fn submit_answer(&mut self, answer: &str) -> AnswerOutcome {
        let now = self.now();
        match &mut self.policy {
            ModePolicy::Multitasking(scheduler) => {
                scheduler.submit_answer(answer, now, self.recorder.context_mut())
            }
            _ => AnswerOutcome::NoActiveChallenge,
        }
    }

    /// Type `answer` into the challenge box, then submit it.
    ///
    /// Each character is recorded as a key press and release. These keys do not
    /// count as form input, so they never arm the scheduler or start a countdown.
    pub fn type_answer(&mut self, answer: &str) -> AnswerOutcome {
        for c in answer.chars() {
            self.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyDown));
            self.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyUp));
        }
        self.submit_answer(answer)
    }

    /// Whether the form accepts input right now.
    pub fn input_enabled(&self) -> bool {
        match &self.policy {
            ModePolicy::Timed(countdown) => !countdown.time_up,
            ModePolicy::Multitasking(scheduler) => scheduler.input_enabled(),
            ModePolicy::Free | ModePolicy::Lying => true,
        }
    }

    /// Whether the timed mode's countdown has run out.
    pub fn time_up(&self) -> bool {
        matches!(&self.policy, ModePolicy::Timed(c) if c.time_up)
    }

    /// Milliseconds left on whichever countdown is running.
    pub fn remaining_ms(&self) -> Option<i64> {
        let now = self.now();
        match &self.policy {
            ModePolicy::Timed(countdown) => countdown
                .ends_at
                .map(|ends_at| (ends_at - now).num_milliseconds().max(0)),
            ModePolicy::Multitasking(scheduler) => scheduler.remaining_ms(now),
            ModePolicy::Free | ModePolicy::Lying => None,
        }
    }

    /// Clear the log and start a fresh recording session. Pending timers are
    /// cancelled first so nothing fires into the new session.
    pub fn reset(&mut self) {
        match &mut self.policy {
            ModePolicy::Timed(countdown) => countdown.clear(),
            ModePolicy::Multitasking(scheduler) => scheduler.cancel(self.recorder.context_mut()),
            ModePolicy::Free | ModePolicy::Lying => {}
        }
        self.recorder.reset();
        debug!(session_id = self.recorder.session_id(), "session reset");
    }

    /// End the session, cancelling timers, and hand back the final log.
    pub fn teardown(mut self) -> Vec<KeyEvent> {
        match &mut self.policy {
            ModePolicy::Timed(countdown) => countdown.clear(),
            ModePolicy::Multitasking(scheduler) => scheduler.cancel(self.recorder.context_mut()),
            ModePolicy::Free | ModePolicy::Lying => {}
        }
        info!(
            mode = %self.mode,
            events = self.recorder.count(),
            "test session ended"
        );
        self.recorder.snapshot()
    }

    pub fn snapshot(&self) -> Vec<KeyEvent> {
        self.recorder.snapshot()
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        analyze(self.recorder.log().events())
    }

    /// Structured export stamped with the session clock.
    pub fn export_json(&self) -> Result<String, ExportError> {
        let events = self.recorder.log().events();
        export::to_json(events, &analyze(events), self.now())
    }

    pub fn export_csv(&self) -> String {
        export::to_csv(self.recorder.log().events())
    }

    /// Records for the persistence boundary, tagged with this mode.
    pub fn persistence_records(&self) -> Vec<KeystrokeRecord> {
        build_records(
            self.recorder.log().events(),
            self.mode.test_type(),
            self.mode.instruction(),
        )
    }
}
