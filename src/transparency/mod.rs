//! Tracking what keystroke-lab has collected, so participants and operators
//! can audit it.

pub mod log;

pub use log::{SharedTransparencyLog, TransparencyLog, TransparencyStats, STATS_FILE};
