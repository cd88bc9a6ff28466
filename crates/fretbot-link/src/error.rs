//! Serial link errors

use thiserror::Error;

/// Failures talking to the servo controller
///
/// Any of these ends the session that hit it; nothing is retried.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The controller stayed silent for too many consecutive reads.
    #[error("No {expected} reply after {attempts} silent reads")]
    ReplyTimeout { expected: &'static str, attempts: u32 },

    /// A COMMAND packet would carry an angle the controller cannot reach.
    ///
    /// ```
    /// # use fretbot_link::LinkError;
    /// let err = LinkError::AngleOutOfRange { actuator: 4, angle: 200 };
    /// assert_eq!(err.to_string(), "Angle 200 for actuator 4 is outside 0-180");
    /// ```
    #[error("Angle {angle} for actuator {actuator} is outside 0-180")]
    AngleOutOfRange { actuator: u8, angle: u8 },

    #[error("Controller disconnected")]
    Disconnected,

    #[error("Serial link lock poisoned")]
    Poisoned,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
