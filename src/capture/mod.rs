//! Keystroke capture for the form-filling study.
//!
//! Raw key actions from the input widgets are tagged with the current context
//! (session, focused field, active challenge) and appended to the event log.

pub mod clock;
pub mod context;
pub mod log;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use context::{CaptureContext, ContextTracker};
pub use log::{EventLog, KeystrokeRecorder};
pub use types::{DeviceInfo, KeyEvent, KeyEventType, RawKeyEvent};
