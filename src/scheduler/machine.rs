//! The interruption scheduler state machine.
//!
//! The machine owns no timers of its own. It records when its next deadline is
//! due and the host calls [`InterruptionScheduler::tick`] from its event loop;
//! every due deadline fires in order during that call. Tests drive it with a
//! manual clock.
//!
//! ```text
//!  Idle ──first input──▶ Armed ──delay elapses──▶ ChallengeActive
//!                          ▲                         │   │
//!                          └──── correct answer ─────┘   │
//!                          └──── deadline (+notice) ─────┘
//!  Armed ──completed == max──▶ Exhausted
//! ```

use crate::capture::context::ContextTracker;
use crate::config::SchedulerConfig;
use crate::scheduler::challenge::Challenge;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No input yet
    Idle,
    /// Waiting for the next challenge (or for the timeout notice to clear)
    Armed,
    /// A challenge is on screen and its deadline is counting down
    ChallengeActive,
    /// The configured number of challenges has been completed
    Exhausted,
}

/// Something the host should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    ChallengeIssued(Challenge),
    ChallengeTimedOut { challenge_id: String },
    InputEnabled,
    Exhausted,
}

/// Result of submitting an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Answer matched; the completion counter now holds `completed`
    Correct { completed: u32 },
    /// Answer did not match; the challenge stays up
    Incorrect,
    /// There was nothing to answer
    NoActiveChallenge,
}

/// Schedules timed interruptions over free-running form input.
pub struct InterruptionScheduler<R: Rng = StdRng> {
    config: SchedulerConfig,
    rng: R,
    state: SchedulerState,
    active: Option<Challenge>,
    next_challenge_at: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    resume_at: Option<DateTime<Utc>>,
    input_enabled: bool,
    show_error: bool,
    issued: u32,
    completed: u32,
    timed_out: u32,
    /// Events raised outside `tick`, handed out by the next `tick`
    pending: Vec<SchedulerEvent>,
}

impl InterruptionScheduler<StdRng> {
    /// Create a scheduler seeded from the OS.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> InterruptionScheduler<R> {
    /// Create a scheduler with a caller-supplied random source.
    pub fn with_rng(config: SchedulerConfig, rng: R) -> Self {
        Self {
            config: config.normalized(),
            rng,
            state: SchedulerState::Idle,
            active: None,
            next_challenge_at: None,
            deadline: None,
            resume_at: None,
            input_enabled: true,
            show_error: false,
            issued: 0,
            completed: 0,
            timed_out: 0,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn active_challenge(&self) -> Option<&Challenge> {
        self.active.as_ref()
    }

    /// Whether the form should accept input right now.
    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    /// Whether the last submitted answer was wrong.
    pub fn show_error(&self) -> bool {
        self.show_error
    }

    /// Whether the timeout notice is on screen.
    pub fn show_timeout(&self) -> bool {
        self.resume_at.is_some()
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn timed_out(&self) -> u32 {
        self.timed_out
    }

    pub fn next_challenge_at(&self) -> Option<DateTime<Utc>> {
        self.next_challenge_at
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Milliseconds left on the active challenge, for a countdown display.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.deadline
            .map(|deadline| (deadline - now).num_milliseconds().max(0))
    }

    /// Arm the scheduler on the first form input; later calls do nothing.
    pub fn on_form_input(&mut self, now: DateTime<Utc>) {
        if self.state != SchedulerState::Idle {
            return;
        }
        self.state = SchedulerState::Armed;
        self.schedule_next(now);
    }

    /// Fire every deadline that is due at `now`, in order.
    pub fn tick(&mut self, now: DateTime<Utc>, context: &mut ContextTracker) -> Vec<SchedulerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        loop {
            match self.state {
                SchedulerState::Armed => {
                    if let Some(resume_at) = self.resume_at.filter(|&at| at <= now) {
                        self.resume_at = None;
                        self.input_enabled = true;
                        events.push(SchedulerEvent::InputEnabled);
                        self.schedule_next(resume_at);
                    } else if let Some(due) = self.next_challenge_at.filter(|&at| at <= now) {
                        self.next_challenge_at = None;
                        events.push(self.issue(due, context));
                    } else {
                        break;
                    }
                }
                SchedulerState::ChallengeActive => match self.deadline {
                    Some(deadline) if deadline <= now => {
                        events.push(self.expire(deadline, context));
                    }
                    _ => break,
                },
                SchedulerState::Idle | SchedulerState::Exhausted => break,
            }
        }
        events.append(&mut self.pending);
        events
    }

    /// Check an answer against the active challenge.
    pub fn submit_answer(
        &mut self,
        answer: &str,
        now: DateTime<Utc>,
        context: &mut ContextTracker,
    ) -> AnswerOutcome {
        let Some(challenge) = self.active.as_ref() else {
            return AnswerOutcome::NoActiveChallenge;
        };
        if !challenge.is_correct(answer) {
            debug!(challenge_id = %challenge.id, "answer rejected");
            self.show_error = true;
            return AnswerOutcome::Incorrect;
        }

        let challenge_id = challenge.id.clone();
        self.active = None;
        self.deadline = None;
        self.show_error = false;
        self.completed += 1;
        self.input_enabled = true;
        context.set_active_challenge(None);
        info!(%challenge_id, completed = self.completed, "challenge completed");

        self.state = SchedulerState::Armed;
        self.schedule_next(now);
        AnswerOutcome::Correct {
            completed: self.completed,
        }
    }

    /// Drop every pending deadline and the active challenge, returning to `Idle`
    /// with fresh counters.
    pub fn cancel(&mut self, context: &mut ContextTracker) {
        if self.active.take().is_some() {
            context.set_active_challenge(None);
        }
        self.state = SchedulerState::Idle;
        self.next_challenge_at = None;
        self.deadline = None;
        self.resume_at = None;
        self.input_enabled = true;
        self.show_error = false;
        self.issued = 0;
        self.completed = 0;
        self.timed_out = 0;
        self.pending.clear();
        debug!("scheduler cancelled");
    }

    /// Schedule the next challenge from `from`, or stop once enough are done.
    ///
    /// Reaching the limit queues [`SchedulerEvent::Exhausted`] for the next tick.
    fn schedule_next(&mut self, from: DateTime<Utc>) {
        if self.completed >= self.config.max_challenges {
            self.state = SchedulerState::Exhausted;
            self.next_challenge_at = None;
            self.pending.push(SchedulerEvent::Exhausted);
            info!(completed = self.completed, "challenge budget exhausted");
            return;
        }
        let min = self.config.min_delay.as_millis() as i64;
        let max = self.config.max_delay.as_millis() as i64;
        let delay = self.rng.gen_range(min..=max);
        let due = from + Duration::milliseconds(delay);
        self.next_challenge_at = Some(due);
        debug!(delay_ms = delay, due = %due, "next challenge scheduled");
    }

    fn issue(&mut self, at: DateTime<Utc>, context: &mut ContextTracker) -> SchedulerEvent {
        let challenge = Challenge::generate(&mut self.rng);
        let time_limit = Duration::milliseconds(self.config.time_limit.as_millis() as i64);

        self.issued += 1;
        self.deadline = Some(at + time_limit);
        self.input_enabled = false;
        self.show_error = false;
        self.state = SchedulerState::ChallengeActive;
        context.set_active_challenge(Some(challenge.id.clone()));
        info!(challenge_id = %challenge.id, kind = ?challenge.kind, "challenge issued");

        self.active = Some(challenge.clone());
        SchedulerEvent::ChallengeIssued(challenge)
    }

    fn expire(&mut self, at: DateTime<Utc>, context: &mut ContextTracker) -> SchedulerEvent {
        let challenge_id = self
            .active
            .take()
            .map(|c| c.id)
            .unwrap_or_default();
        let display = Duration::milliseconds(self.config.timeout_display.as_millis() as i64);

        self.deadline = None;
        self.show_error = false;
        self.timed_out += 1;
        self.resume_at = Some(at + display);
        self.state = SchedulerState::Armed;
        context.set_active_challenge(None);
        info!(%challenge_id, "challenge timed out");

        SchedulerEvent::ChallengeTimedOut { challenge_id }
    }
}
