//! # Error Types
//!
//! This module defines all error types for keystrike.
//!
//! Errors raised while playing carry the note and motion phase they happened in, so a
//! stalled arm can be traced back to the exact move that never finished.
//!
//! ## Error Types
//! - `CalibrationFailed` - home pose or reference posture could not be established (fatal)
//! - `ActuationTimeout` - motion-done was never observed within the configured bound
//! - `InvalidNoteIndex` - a note index outside 0..=11 reached the geometry model
//! - `ContextRestoreFailed` - the controller context could not be restored on release
//! - `Cancelled` - a cooperative stop interrupted an in-flight phase
//! - `SequencerFaulted` - `step()` was called on a sequencer left in its faulted state
//! - `Device` - the actuation backend rejected a command
//! - `ConfigError` / `SongError` - invalid YAML configuration or song input
//!
//! ## Usage
//! ```rust
//! use keystrike::{MotionPhase, NoteIndex, StrikeError};
//! use std::time::Duration;
//!
//! let err = StrikeError::ActuationTimeout {
//!     note: NoteIndex::A,
//!     phase: MotionPhase::Press,
//!     waited: Duration::from_secs(5),
//! };
//! assert_eq!(err.to_string(), "Actuation timeout while pressing A after 5.000s");
//! assert!(err.is_recoverable());
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::geometry::NoteIndex;
use crate::resolver::MotionPhase;

pub type Result<T> = std::result::Result<T, StrikeError>;

#[derive(Error, Debug)]
pub enum StrikeError {
    /// The home pose (Cartesian) or reference posture (joint) could not be established.
    ///
    /// Fatal: no resolver can be built, so the sequencer never becomes startable.
    #[error("Calibration failed: {reason}")]
    CalibrationFailed { reason: String },

    /// Motion completion was not observed within the configured bound.
    ///
    /// The arm is left at its last commanded target.
    #[error("Actuation timeout while {} {note} after {:.3}s", .phase.verb(), .waited.as_secs_f64())]
    ActuationTimeout {
        note: NoteIndex,
        phase: MotionPhase,
        waited: Duration,
    },

    /// A note index outside the single-octave range reached the geometry model.
    ///
    /// # Example
    /// ```
    /// # use keystrike::StrikeError;
    /// let err = StrikeError::InvalidNoteIndex(14);
    /// assert_eq!(err.to_string(), "Invalid note index 14: expected 0..=11");
    /// ```
    #[error("Invalid note index {0}: expected 0..=11")]
    InvalidNoteIndex(i64),

    #[error("Failed to restore controller context {context}: {message}")]
    ContextRestoreFailed { context: i32, message: String },

    #[error("Stopped while {} {note}", .phase.verb())]
    Cancelled { note: NoteIndex, phase: MotionPhase },

    #[error("Sequencer is faulted at {phase:?} of {note}; retry or abort the cycle first")]
    SequencerFaulted { note: NoteIndex, phase: MotionPhase },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid song at position {position}: {message}")]
    SongError { position: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StrikeError {
    /// Whether playback can continue from here by retrying or aborting the current cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StrikeError::ActuationTimeout { .. } | StrikeError::Device(_)
        )
    }
}
