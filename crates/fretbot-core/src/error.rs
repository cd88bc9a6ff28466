//! # Error Types
//!
//! Errors raised while loading calibration, parsing songs and resolving
//! commands. All of them are fatal for the pass that raised them: a failed
//! resolve aborts the whole flatten/stream pass, a failed calibration load
//! prevents any session from starting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The event names a command that is neither in the catalog nor a section.
    ///
    /// ```
    /// # use fretbot_core::CoreError;
    /// let err = CoreError::UnknownCommand { name: "Chord_X".to_string(), beat: 4.0 };
    /// assert_eq!(err.to_string(), "Unknown command 'Chord_X' at beat 4");
    /// ```
    #[error("Unknown command '{name}' at beat {beat}")]
    UnknownCommand { name: String, beat: f64 },

    /// A catalog entry resolved to something that cannot be scheduled
    /// (a failing factory, an empty aggregate, an unknown actuator).
    #[error("Command '{name}' has an invalid shape: {reason}")]
    InvalidCommandShape { name: String, reason: String },

    /// A required calibration key is absent.
    ///
    /// ```
    /// # use fretbot_core::CoreError;
    /// let err = CoreError::CalibrationMissing("fretting.A.frets.3".to_string());
    /// assert_eq!(err.to_string(), "Calibration is missing fretting.A.frets.3");
    /// ```
    #[error("Calibration is missing {0}")]
    CalibrationMissing(String),

    /// A calibration key is present but its value is unusable.
    #[error("Invalid calibration value at {key}: {reason}")]
    InvalidCalibration { key: String, reason: String },

    /// A calibrated servo angle lies outside 0..=180 degrees.
    #[error("Calibration angle {angle} at {key} is outside 0-180")]
    InvalidAngle { key: String, angle: i64 },

    /// A tempo that cannot be converted to milliseconds.
    ///
    /// ```
    /// # use fretbot_core::CoreError;
    /// let err = CoreError::InvalidTempo(0.0);
    /// assert_eq!(err.to_string(), "Tempo must be a positive BPM, got 0");
    /// ```
    #[error("Tempo must be a positive BPM, got {0}")]
    InvalidTempo(f64),

    /// The song document is structurally valid JSON but not a playable song.
    #[error("Invalid song: {0}")]
    InvalidSong(String),

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
