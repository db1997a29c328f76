//! Interruption scheduling for the multitasking test.

pub mod challenge;
pub mod machine;

pub use challenge::{Challenge, ChallengeKind};
pub use machine::{AnswerOutcome, InterruptionScheduler, SchedulerEvent, SchedulerState};
