//! Actuator addressing
//!
//! The controller numbers its servos with small stable integers:
//!
//! ```text
//!  0..=5    picking servos, one per string (e A D G B E)
//!  6..=11   lower fret range (frets 1-2), one per string
//! 12..=17   upper fret range (frets 3-4), one per string
//! ```

/// Calibration keys of the six strings, in picking-actuator order.
pub const STRING_KEYS: [&str; STRING_COUNT] = ["e", "A", "D", "G", "B", "E"];

pub const STRING_COUNT: usize = 6;

/// Total number of servos addressed by a RESET packet.
pub const ACTUATOR_COUNT: usize = 18;

/// First actuator of the lower fret range.
pub const LOWER_FRET_BASE: u8 = 6;

/// First actuator of the upper fret range.
pub const UPPER_FRET_BASE: u8 = 12;

/// Highest fret served by the lower range; frets above it use the upper range.
pub const LOWER_RANGE_LAST_FRET: u8 = 2;

/// Highest fret the mechanism can press.
pub const MAX_FRET: u8 = 4;

/// Servo angles are degrees in 0..=180.
pub const MAX_ANGLE: u8 = 180;

/// Picking actuator for a string index.
pub fn pick_actuator(string: usize) -> u8 {
    string as u8
}

/// Fretting actuator that presses `fret` (1..=4) on a string.
pub fn fret_actuator(string: usize, fret: u8) -> u8 {
    if fret <= LOWER_RANGE_LAST_FRET {
        LOWER_FRET_BASE + string as u8
    } else {
        UPPER_FRET_BASE + string as u8
    }
}

/// String index driven by a picking actuator, if it is one.
pub fn string_of_pick(actuator: u8) -> Option<usize> {
    let idx = actuator as usize;
    (idx < STRING_COUNT).then_some(idx)
}

/// Index of a string by its calibration key (`"e"`, `"A"`, ...).
pub fn string_index(key: &str) -> Option<usize> {
    STRING_KEYS.iter().position(|k| *k == key)
}
