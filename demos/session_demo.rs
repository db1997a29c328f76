//! Walk through a multitasking session on a manual clock.
//!
//! This example shows how to:
//! 1. Build a session with a deterministic clock and random source
//! 2. Type into form fields and let the scheduler interrupt
//! 3. Answer a challenge
//! 4. Inspect analytics and the tabular export
//!
//! Run with: cargo run --example session_demo

use keystroke_lab::capture::DeviceInfo;
use keystroke_lab::core::typing_metrics;
use keystroke_lab::scheduler::SchedulerEvent;
use keystroke_lab::{
    Config, KeyEventType, ManualClock, RawKeyEvent, SessionEvent, TestMode, TestSession,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn type_text(session: &mut TestSession, clock: &ManualClock, text: &str) {
    for c in text.chars() {
        session.form_input();
        session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyDown));
        clock.advance_ms(70);
        session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyUp));
        clock.advance_ms(110);
        for event in session.tick() {
            if let SessionEvent::Scheduler(SchedulerEvent::ChallengeIssued(challenge)) = &event {
                println!("Interrupted: {}", challenge.prompt);
                clock.advance_ms(1_500);
                let outcome = session.submit_answer(&challenge.correct_answer);
                println!("Answered: {outcome:?}");
            }
        }
    }
}

fn main() {
    println!("keystroke-lab - Session Demo");
    println!("============================");
    println!();

    let clock = ManualClock::at_millis(1_700_000_000_000);
    let session_config = Config::default();
    let mut session = TestSession::with_parts(
        TestMode::Multitasking,
        &session_config,
        DeviceInfo::from("demo"),
        clock.shared(),
        StdRng::seed_from_u64(2024),
    );

    for (field, value) in [
        ("fullName", "Jordan Example"),
        ("email", "jordan@example.org"),
        ("address", "12 Sample Road, Springfield"),
        ("occupation", "Research participant"),
    ] {
        session.focus(field);
        type_text(&mut session, &clock, value);
        session.blur();
    }

    let events = session.snapshot();
    println!();
    println!("Analytics: {:?}", session.analytics());
    println!("Typing metrics: {:?}", typing_metrics(&events));
    if let Some(scheduler) = session.scheduler() {
        println!(
            "Challenges: {} issued, {} completed, {} timed out",
            scheduler.issued(),
            scheduler.completed(),
            scheduler.timed_out()
        );
    }

    println!();
    println!("First rows of the tabular export:");
    for line in session.export_csv().lines().take(5) {
        println!("  {line}");
    }
}
