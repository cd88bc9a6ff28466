//! Atomic servo actions and the per-session alternation state
//!
//! An [`Action`] is one actuator instruction inside a command, positioned
//! relative to the command's start by an [`Offset`]. Scheduling an action
//! yields [`ServoMove`]s carrying absolute controller times.

use crate::timing::Timing;
use std::collections::HashMap;

/// Position of an action relative to its command's base time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub beats: f64,
    pub ms: u32,
}

impl Offset {
    pub fn ms(ms: u32) -> Self {
        Self { beats: 0.0, ms }
    }

    pub fn beats(beats: f64) -> Self {
        Self { beats, ms: 0 }
    }

    /// Offset from the command start in whole milliseconds
    pub fn relative_ms(&self, timing: &Timing) -> u32 {
        timing.beats_to_ms(self.beats).saturating_add(self.ms)
    }
}

/// One servo target at an absolute controller time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoMove {
    pub actuator: u8,
    pub angle: u8,
    pub at_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Move to a fixed angle
    Timed {
        actuator: u8,
        angle: u8,
        offset: Offset,
    },
    /// Pick a string, alternating between the up and down angle on every use
    AlternatingPick {
        actuator: u8,
        up: u8,
        down: u8,
        offset: Offset,
    },
    /// Press a fret, then release it after the event's duration
    /// (or `release_after` beats when the event has none)
    PressRelease {
        actuator: u8,
        press: u8,
        release: u8,
        offset: Offset,
        release_after: f64,
    },
}

impl Action {
    pub fn actuator(&self) -> u8 {
        match self {
            Action::Timed { actuator, .. }
            | Action::AlternatingPick { actuator, .. }
            | Action::PressRelease { actuator, .. } => *actuator,
        }
    }

    pub fn offset(&self) -> Offset {
        match self {
            Action::Timed { offset, .. }
            | Action::AlternatingPick { offset, .. }
            | Action::PressRelease { offset, .. } => *offset,
        }
    }

    /// Every angle this action can emit
    pub fn angles(&self) -> Vec<u8> {
        match self {
            Action::Timed { angle, .. } => vec![*angle],
            Action::AlternatingPick { up, down, .. } => vec![*up, *down],
            Action::PressRelease { press, release, .. } => vec![*press, *release],
        }
    }

    /// Emit the moves for this action, advancing pick alternation in `state`
    pub fn schedule(
        &self,
        base_ms: u32,
        duration_beats: Option<f64>,
        timing: &Timing,
        state: &mut PerformanceState,
        out: &mut Vec<ServoMove>,
    ) {
        let at_ms = base_ms.saturating_add(self.offset().relative_ms(timing));
        match self {
            Action::Timed {
                actuator, angle, ..
            } => out.push(ServoMove {
                actuator: *actuator,
                angle: *angle,
                at_ms,
            }),
            Action::AlternatingPick {
                actuator, up, down, ..
            } => {
                let angle = if state.next_pick_is_up(*actuator) {
                    *up
                } else {
                    *down
                };
                out.push(ServoMove {
                    actuator: *actuator,
                    angle,
                    at_ms,
                });
            }
            Action::PressRelease {
                actuator,
                press,
                release,
                release_after,
                ..
            } => {
                let hold = timing.beats_to_ms(duration_beats.unwrap_or(*release_after));
                out.push(ServoMove {
                    actuator: *actuator,
                    angle: *press,
                    at_ms,
                });
                out.push(ServoMove {
                    actuator: *actuator,
                    angle: *release,
                    at_ms: at_ms.saturating_add(hold),
                });
            }
        }
    }

    /// Time of this action's last move, relative to the command's base time
    pub fn span_ms(&self, duration_beats: Option<f64>, timing: &Timing) -> u32 {
        let start = self.offset().relative_ms(timing);
        match self {
            Action::PressRelease { release_after, .. } => {
                start.saturating_add(timing.beats_to_ms(duration_beats.unwrap_or(*release_after)))
            }
            _ => start,
        }
    }
}

/// Alternation state carried across one playback session
///
/// Owned by the scheduler; a fresh session starts from a fresh state.
#[derive(Debug, Clone, Default)]
pub struct PerformanceState {
    /// Per picking actuator: whether its last stroke was `up`
    last_pick_up: HashMap<u8, bool>,
    /// Direction of the most recent strum
    last_strum_up: bool,
}

impl PerformanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direction of the next pick on `actuator`; the first pick is `up`
    pub fn next_pick_is_up(&mut self, actuator: u8) -> bool {
        let was_up = self.last_pick_up.get(&actuator).copied().unwrap_or(false);
        self.last_pick_up.insert(actuator, !was_up);
        !was_up
    }

    /// Direction of the next strum; the first strum sweeps `up`
    pub fn next_strum_is_up(&mut self) -> bool {
        self.last_strum_up = !self.last_strum_up;
        self.last_strum_up
    }
}
