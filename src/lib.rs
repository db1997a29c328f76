//! keystroke-lab - keystroke timing capture for typing-under-stress studies.
//!
//! A participant fills in a short form under one of several test modes while
//! every key press and release is recorded with millisecond timestamps, the
//! focused field and any interruption challenge that was on screen.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TestSession                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │  Recorder   │──▶│  EventLog   │──▶│  Analytics  │         │
//! │  │ (+ context) │   │ (snapshot)  │   │  / Metrics  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │         ▲                 │                                  │
//! │         │ challenge id    ├──────────▶ Export (JSON / CSV)   │
//! │  ┌─────────────┐          └──────────▶ Persistence (batches) │
//! │  │  Scheduler  │  (multitasking mode)                        │
//! │  └─────────────┘                                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use keystroke_lab::{Config, ManualClock, RawKeyEvent, TestMode, TestSession};
//!
//! let clock = ManualClock::at_millis(0);
//! let mut session = TestSession::new(TestMode::Free, &Config::default(), clock.shared());
//!
//! session.focus("name");
//! session.key_event(RawKeyEvent::key_down("a", "KeyA"));
//! clock.advance_ms(80);
//! session.key_event(RawKeyEvent::key_up("a", "KeyA"));
//!
//! assert_eq!(session.analytics().total_events, 2);
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod persistence;
pub mod scheduler;
pub mod session;
pub mod transparency;

pub use capture::{
    Clock, KeyEvent, KeyEventType, KeystrokeRecorder, ManualClock, RawKeyEvent, SharedClock,
    SystemClock,
};
pub use config::{Config, ConfigError, RemoteConfig, SchedulerConfig};
pub use self::core::{analyze, AnalyticsSnapshot, ExportError, TypingMetrics};
pub use persistence::{save_records, KeystrokeRecord, PersistError, RecordSink};
pub use scheduler::{AnswerOutcome, Challenge, InterruptionScheduler, SchedulerState};
pub use session::{SessionEvent, TestMode, TestSession};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to participants before recording starts.
pub const DATA_COLLECTION_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              KEYSTROKE LAB - DATA COLLECTION NOTICE              ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This tool records how you type while filling in a form.         ║
║                                                                  ║
║  ✓ WHAT WE RECORD:                                               ║
║    • Each key you press and release, with its timestamp          ║
║    • Which form field was focused at the time                    ║
║    • Which interruption challenge, if any, was on screen         ║
║    • Host name, operating system and architecture                ║
║                                                                  ║
║  ✗ WHAT WE DO NOT RECORD:                                        ║
║    • Anything typed outside this tool                            ║
║    • Mouse movement or screen content                            ║
║                                                                  ║
║  Please use made-up details: the form is not checked and your    ║
║  keystrokes, including letters, are stored for analysis.         ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    keystroke-lab status                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
