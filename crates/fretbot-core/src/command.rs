//! Commands: notes, chords and strums
//!
//! A [`Command`] is what an event's `cmd` name resolves to. Notes and chords
//! are aggregates of [`Action`]s; a strum sweeps a set of picking actuators
//! with a fixed stagger and a direction that flips on every strum.

use crate::action::{Action, PerformanceState, ServoMove};
use crate::actuator::{string_of_pick, MAX_ANGLE};
use crate::calibration::Calibration;
use crate::timing::Timing;

/// Name reported for strum commands
pub const STRUM_NAME: &str = "STRUM";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Named, ordered collection of actions (a note, chord or reset)
    Aggregate { name: String, actions: Vec<Action> },
    /// Sweep across picking actuators
    Strum(Strum),
}

/// One string of a strum, with its calibrated stroke angles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrumStroke {
    pub actuator: u8,
    pub up: u8,
    pub down: u8,
}

/// Strum over a set of picking actuators, held in ascending actuator order
#[derive(Debug, Clone, PartialEq)]
pub struct Strum {
    strokes: Vec<StrumStroke>,
}

impl Strum {
    /// Build a strum over the given picking actuators
    ///
    /// Duplicates are dropped; any id that is not a picking actuator is an error.
    pub fn across(actuators: &[u8], calibration: &Calibration) -> Result<Self, String> {
        let mut ids = actuators.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let strokes = ids
            .into_iter()
            .map(|actuator| {
                let string = string_of_pick(actuator)
                    .ok_or_else(|| format!("actuator {} is not a picking actuator", actuator))?;
                let angles = calibration
                    .pick(string)
                    .ok_or_else(|| format!("no pick calibration for actuator {}", actuator))?;
                Ok(StrumStroke {
                    actuator,
                    up: angles.up,
                    down: angles.down,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self { strokes })
    }

    pub fn strokes(&self) -> &[StrumStroke] {
        &self.strokes
    }

    pub fn actuators(&self) -> Vec<u8> {
        self.strokes.iter().map(|s| s.actuator).collect()
    }

    fn schedule(&self, base_ms: u32, timing: &Timing, state: &mut PerformanceState, out: &mut Vec<ServoMove>) {
        let start = base_ms.saturating_add(timing.strum_lead_in_ms);
        let up = state.next_strum_is_up();

        // Down strokes sweep low to high actuator, up strokes high to low
        let mut order: Vec<&StrumStroke> = self.strokes.iter().collect();
        if up {
            order.reverse();
        }

        for (i, stroke) in order.into_iter().enumerate() {
            out.push(ServoMove {
                actuator: stroke.actuator,
                angle: if up { stroke.up } else { stroke.down },
                at_ms: start.saturating_add(i as u32 * timing.strum_stagger_ms),
            });
        }
    }

    /// `(strings - 1) * stagger`
    fn span_ms(&self, timing: &Timing) -> u32 {
        (self.strokes.len().saturating_sub(1) as u32).saturating_mul(timing.strum_stagger_ms)
    }
}

impl Command {
    pub fn aggregate(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Command::Aggregate {
            name: name.into(),
            actions,
        }
    }

    /// Concatenate the actions of several commands, keeping declaration order
    pub fn chord(name: impl Into<String>, parts: &[&Command]) -> Self {
        let actions = parts
            .iter()
            .flat_map(|part| match part {
                Command::Aggregate { actions, .. } => actions.clone(),
                Command::Strum(_) => Vec::new(),
            })
            .collect();
        Command::aggregate(name, actions)
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Aggregate { name, .. } => name,
            Command::Strum(_) => STRUM_NAME,
        }
    }

    /// Emit every servo move of this command for an event starting at `base_ms`
    ///
    /// `duration_beats` is the invoking event's duration; it overrides the
    /// release time of press-release actions.
    pub fn schedule(
        &self,
        base_ms: u32,
        duration_beats: Option<f64>,
        timing: &Timing,
        state: &mut PerformanceState,
    ) -> Vec<ServoMove> {
        let mut out = Vec::new();
        match self {
            Command::Aggregate { actions, .. } => {
                for action in actions {
                    action.schedule(base_ms, duration_beats, timing, state, &mut out);
                }
            }
            Command::Strum(strum) => strum.schedule(base_ms, timing, state, &mut out),
        }
        out
    }

    /// Latest time this command contributes to the song end, relative to its base time
    pub fn span_ms(&self, duration_beats: Option<f64>, timing: &Timing) -> u32 {
        match self {
            Command::Aggregate { actions, .. } => actions
                .iter()
                .map(|a| a.span_ms(duration_beats, timing))
                .max()
                .unwrap_or(0),
            Command::Strum(strum) => strum.span_ms(timing),
        }
    }

    /// Check that this command can be scheduled
    pub fn check_shape(&self) -> Result<(), String> {
        match self {
            Command::Aggregate { actions, .. } => {
                if actions.is_empty() {
                    return Err("aggregate has no actions".to_string());
                }
                for action in actions {
                    if let Some(angle) = action.angles().into_iter().find(|a| *a > MAX_ANGLE) {
                        return Err(format!(
                            "angle {} for actuator {} is outside 0-180",
                            angle,
                            action.actuator()
                        ));
                    }
                }
                Ok(())
            }
            Command::Strum(strum) => {
                if strum.strokes.is_empty() {
                    return Err("strum has no strings".to_string());
                }
                Ok(())
            }
        }
    }
}
