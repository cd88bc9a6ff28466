//! Musical time to controller milliseconds

use crate::error::{CoreError, Result};

/// Tempo used when neither the song nor the config names one
pub const DEFAULT_BPM: f64 = 120.0;

/// Hold time of a pressed fret when neither the event nor the calibration gives one
pub const DEFAULT_RELEASE_BEATS: f64 = 1.0;

/// Delay before a strum's first stroke, letting co-timed fret presses land first
pub const DEFAULT_STRUM_LEAD_IN_MS: u32 = 50;

/// Gap between consecutive strings of one strum
pub const DEFAULT_STRUM_STAGGER_MS: u32 = 10;

/// Tempo and strum constants shared by scheduling and duration computation
///
/// Both the pre-flight estimate and the in-session end time read the same
/// `Timing`, so they cannot disagree on the strum stagger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub bpm: f64,
    pub strum_lead_in_ms: u32,
    pub strum_stagger_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl Timing {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            strum_lead_in_ms: DEFAULT_STRUM_LEAD_IN_MS,
            strum_stagger_ms: DEFAULT_STRUM_STAGGER_MS,
        }
    }

    /// Same strum constants, different tempo
    pub fn with_bpm(self, bpm: f64) -> Self {
        Self { bpm, ..self }
    }

    /// Reject a tempo that is zero, negative or not a number
    pub fn validate(&self) -> Result<()> {
        if self.bpm.is_finite() && self.bpm > 0.0 {
            Ok(())
        } else {
            Err(CoreError::InvalidTempo(self.bpm))
        }
    }

    /// `60000 / BPM`
    pub fn ms_per_beat(&self) -> f64 {
        60_000.0 / self.bpm
    }

    /// Convert a beat count to whole milliseconds, truncating toward zero
    pub fn beats_to_ms(&self, beats: f64) -> u32 {
        let ms = beats * self.ms_per_beat();
        if ms.is_finite() && ms > 0.0 {
            ms as u32
        } else {
            0
        }
    }
}
