//! Integration tests driving whole test sessions on a manual clock.

use keystroke_lab::capture::DeviceInfo;
use keystroke_lab::core::{from_csv, StructuredExport};
use keystroke_lab::persistence::{save_records, MemorySink};
use keystroke_lab::scheduler::{SchedulerEvent, SchedulerState};
use keystroke_lab::{
    AnswerOutcome, Clock, Config, KeyEventType, ManualClock, RawKeyEvent, SchedulerConfig, SessionEvent,
    TestMode, TestSession,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn config() -> Config {
    Config {
        scheduler: SchedulerConfig {
            min_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(4_000),
            time_limit: Duration::from_millis(3_000),
            max_challenges: 2,
            timeout_display: Duration::from_millis(1_000),
        },
        timed_duration: Duration::from_millis(5_000),
        ..Config::default()
    }
}

fn start(mode: TestMode, seed: u64) -> (TestSession, ManualClock) {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let session = TestSession::with_parts(
        mode,
        &config(),
        DeviceInfo::from("integration, linux, x86_64"),
        clock.shared(),
        StdRng::seed_from_u64(seed),
    );
    (session, clock)
}

fn type_char(session: &mut TestSession, clock: &ManualClock, c: char) {
    session.form_input();
    session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyDown));
    clock.advance_ms(60);
    session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyUp));
    clock.advance_ms(90);
}

/// Advance in 100 ms steps until a challenge is issued.
fn wait_for_challenge(session: &mut TestSession, clock: &ManualClock) -> keystroke_lab::Challenge {
    for _ in 0..100 {
        clock.advance_ms(100);
        for event in session.tick() {
            if let SessionEvent::Scheduler(SchedulerEvent::ChallengeIssued(c)) = event {
                return c;
            }
        }
    }
    panic!("no challenge issued");
}

#[test]
fn free_session_records_fields_in_order() {
    let (mut session, clock) = start(TestMode::Free, 1);

    session.focus("fullName");
    for c in "Al".chars() {
        type_char(&mut session, &clock, c);
    }
    session.focus("email");
    type_char(&mut session, &clock, '@');
    session.blur();

    let events = session.snapshot();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0].elapsed_since_start, 0);
    assert!(events.windows(2).all(|w| w[0].elapsed_since_start <= w[1].elapsed_since_start));
    assert_eq!(events[3].field_name.as_deref(), Some("fullName"));
    assert_eq!(events[4].field_name.as_deref(), Some("email"));

    let analytics = session.analytics();
    assert_eq!(analytics.keydown_count, 3);
    assert_eq!(analytics.keyup_count, 3);
    assert_eq!(analytics.unique_keys, 3);
    assert_eq!(analytics.duration, 360);
}

#[test]
fn multitasking_challenge_tags_events_and_completes() {
    let (mut session, clock) = start(TestMode::Multitasking, 7);

    session.focus("address");
    type_char(&mut session, &clock, 'x');
    let challenge = wait_for_challenge(&mut session, &clock);
    assert!(!session.input_enabled());

    // keys pressed while the challenge is up carry its id
    let during = session.key_event(RawKeyEvent::for_char('1', KeyEventType::KeyDown));
    assert_eq!(during.challenge_id.as_deref(), Some(challenge.id.as_str()));

    assert_eq!(session.submit_answer("not it"), AnswerOutcome::Incorrect);
    assert_eq!(
        session.scheduler().map(|s| s.state()),
        Some(SchedulerState::ChallengeActive)
    );

    let outcome = session.submit_answer(&format!(" {} ", challenge.correct_answer.to_uppercase()));
    assert_eq!(outcome, AnswerOutcome::Correct { completed: 1 });
    assert!(session.input_enabled());

    let after = session.key_event(RawKeyEvent::for_char('y', KeyEventType::KeyDown));
    assert_eq!(after.challenge_id, None);
    assert_eq!(after.field_name.as_deref(), Some("address"));
}

#[test]
fn multitasking_timeout_resumes_scheduling() {
    let (mut session, clock) = start(TestMode::Multitasking, 11);
    type_char(&mut session, &clock, 'a');
    let challenge = wait_for_challenge(&mut session, &clock);

    clock.advance_ms(3_000);
    let events = session.tick();
    assert_eq!(
        events,
        vec![SessionEvent::Scheduler(SchedulerEvent::ChallengeTimedOut {
            challenge_id: challenge.id.clone()
        })]
    );
    let scheduler = session.scheduler().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Armed);
    assert_eq!(scheduler.completed(), 0);
    assert!(!session.input_enabled());

    clock.advance_ms(1_000);
    assert_eq!(
        session.tick(),
        vec![SessionEvent::Scheduler(SchedulerEvent::InputEnabled)]
    );
    assert!(session.input_enabled());

    let next = wait_for_challenge(&mut session, &clock);
    assert_ne!(next.id, challenge.id);
}

#[test]
fn multitasking_exhausts_after_max_completions() {
    let (mut session, clock) = start(TestMode::Multitasking, 3);
    type_char(&mut session, &clock, 'a');

    for _ in 0..2 {
        let challenge = wait_for_challenge(&mut session, &clock);
        session.submit_answer(&challenge.correct_answer);
    }

    let scheduler = session.scheduler().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Exhausted);
    assert_eq!(scheduler.completed(), 2);

    clock.advance_ms(100);
    assert_eq!(
        session.tick(),
        vec![SessionEvent::Scheduler(SchedulerEvent::Exhausted)]
    );
    clock.advance_ms(60_000);
    assert!(session.tick().is_empty());
}

#[test]
fn reset_mid_challenge_starts_clean_session() {
    let (mut session, clock) = start(TestMode::Multitasking, 5);
    type_char(&mut session, &clock, 'a');
    wait_for_challenge(&mut session, &clock);
    let old_id = session.session_id().to_string();

    session.reset();
    assert!(session.snapshot().is_empty());
    assert_eq!(
        session.scheduler().map(|s| s.state()),
        Some(SchedulerState::Idle)
    );

    clock.advance_ms(30_000);
    assert!(session.tick().is_empty());

    let first = session.key_event(RawKeyEvent::for_char('b', KeyEventType::KeyDown));
    assert_ne!(first.session_id, old_id);
    assert_eq!(first.elapsed_since_start, 0);
    assert_eq!(first.challenge_id, None);
}

#[test]
fn timed_session_keeps_recording_after_time_up() {
    let (mut session, clock) = start(TestMode::Timed, 1);
    type_char(&mut session, &clock, 'a');

    clock.advance_ms(5_000);
    assert_eq!(session.tick(), vec![SessionEvent::TimeUp]);
    assert!(!session.input_enabled());

    type_char(&mut session, &clock, 'b');
    assert_eq!(session.analytics().total_events, 4);
}

#[test]
fn exports_round_trip() {
    let (mut session, clock) = start(TestMode::Free, 1);
    session.focus("address");
    for c in "1, Main St".chars() {
        type_char(&mut session, &clock, c);
    }

    let events = session.snapshot();
    let parsed = from_csv(&session.export_csv()).unwrap();
    assert_eq!(parsed.len(), events.len());
    for (back, original) in parsed.iter().zip(&events) {
        assert_eq!(back.key, original.key);
        assert_eq!(back.code, original.code);
        assert_eq!(back.timestamp, original.timestamp);
    }
    assert_eq!(parsed[0].device_info.as_str(), "integration; linux; x86_64");

    let structured = StructuredExport::from_json(&session.export_json().unwrap()).unwrap();
    assert_eq!(structured.events, events);
    assert_eq!(structured.analytics, session.analytics());
    assert_eq!(structured.exported_at, clock.now());
}

#[test]
fn saving_leaves_log_untouched() {
    let (mut session, clock) = start(TestMode::Lying, 1);
    for c in "no".chars() {
        type_char(&mut session, &clock, c);
    }
    let before = session.snapshot();

    let records = session.persistence_records();
    let mut failing = MemorySink::failing_on(0);
    assert!(save_records(&mut failing, &records, 500).is_err());
    assert_eq!(session.snapshot(), before);

    let mut sink = MemorySink::new();
    assert_eq!(save_records(&mut sink, &records, 500).unwrap(), 4);
    assert_eq!(sink.records[0].meta["test_type"], "lying");
    assert_eq!(sink.records[1].latency_ms, Some(60));
}
