//! Command catalog
//!
//! Maps command names to either a ready-made [`Command`] or a factory that
//! builds one from the playing event. [`CommandCatalog::resolve`] is the only
//! way to turn an event into a command, and it always returns a concrete,
//! shape-checked value: factories are invoked at resolution time, and a
//! factory that defers to another factory is followed until it produces a
//! command.
//!
//! The built-in catalog is derived from the calibration:
//!
//! | Name | Content |
//! |------|---------|
//! | `e0` .. `E0` | open string: one alternating pick, see [`OPEN_PICK_MS`] |
//! | `e1` .. `E4` | fret press-release on the fret's range actuator, then a pick |
//! | `Chord_*` | concatenation of notes, in declaration order |
//! | `RESET` | every actuator to neutral, staggered by range |
//! | `STRUM` | factory, sweeps the event's `strings` (default: all six) |

use crate::action::{Action, Offset};
use crate::actuator::{
    fret_actuator, pick_actuator, LOWER_FRET_BASE, MAX_FRET, STRING_COUNT, STRING_KEYS,
    UPPER_FRET_BASE,
};
use crate::calibration::Calibration;
use crate::command::{Command, Strum, STRUM_NAME};
use crate::error::{CoreError, Result};
use crate::song::FlatEvent;
use crate::timing::DEFAULT_RELEASE_BEATS;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Delay of the pick behind a note's fret press, so the fret lands first
pub const PICK_AFTER_FRET_MS: u32 = 50;

/// Pick delay of each open-string note, in actuator order: D, G and B
/// pick at 100 ms, the outer strings at 50 ms
pub const OPEN_PICK_MS: [u32; STRING_COUNT] = [50, 50, 100, 100, 100, 50];

/// Upper bound on factory-to-factory deferrals during one resolve
const MAX_DEFERRALS: usize = 8;

/// Builds a command from the event that invokes it
pub type Factory = Arc<dyn Fn(&FlatEvent) -> std::result::Result<Resolution, String> + Send + Sync>;

/// What a factory hands back
pub enum Resolution {
    Ready(Command),
    /// Another factory that must be invoked with the same event
    Deferred(Factory),
}

/// A catalog slot
#[derive(Clone)]
pub enum CatalogEntry {
    Static(Command),
    Factory(Factory),
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogEntry::Static(cmd) => f.debug_tuple("Static").field(&cmd.name()).finish(),
            CatalogEntry::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Registry of every command a song may name
#[derive(Clone, Default)]
pub struct CommandCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl CommandCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of notes, chords, `RESET` and `STRUM` for a calibrated robot
    pub fn from_calibration(calibration: &Calibration) -> Self {
        let calibration = Arc::new(calibration.clone());
        let mut catalog = Self::new();

        for (string, key) in STRING_KEYS.iter().enumerate() {
            for fret in 0..=MAX_FRET {
                if let Some(note) = note(&calibration, string, fret) {
                    catalog.register(format!("{}{}", key, fret), CatalogEntry::Static(note));
                }
            }
        }

        for (name, parts) in CHORDS {
            let parts: Vec<Command> = parts
                .iter()
                .filter_map(|part| match catalog.entries.get(*part) {
                    Some(CatalogEntry::Static(cmd)) => Some(cmd.clone()),
                    _ => None,
                })
                .collect();
            let refs: Vec<&Command> = parts.iter().collect();
            catalog.register(*name, CatalogEntry::Static(Command::chord(*name, &refs)));
        }

        catalog.register("RESET", CatalogEntry::Static(reset_command(&calibration)));

        let strum_cal = Arc::clone(&calibration);
        catalog.register(
            STRUM_NAME,
            CatalogEntry::Factory(Arc::new(move |event: &FlatEvent| -> std::result::Result<Resolution, String> {
                let strings = match event.u8_list_param("strings") {
                    Some(parsed) => parsed?,
                    None => (0..STRING_COUNT).map(pick_actuator).collect(),
                };
                Strum::across(&strings, &strum_cal).map(|s| Resolution::Ready(Command::Strum(s)))
            })),
        );

        log::debug!("[catalog] Built {} commands from calibration", catalog.len());
        catalog
    }

    /// Add or replace an entry
    pub fn register(&mut self, name: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted command names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve an event's command name to a concrete, schedulable command
    ///
    /// # Errors
    /// - [`CoreError::UnknownCommand`] if the name is not registered
    /// - [`CoreError::InvalidCommandShape`] if a factory fails, defers too
    ///   often, or the result cannot be scheduled
    pub fn resolve(&self, event: &FlatEvent) -> Result<Command> {
        let entry = self
            .entries
            .get(&event.command)
            .ok_or_else(|| CoreError::UnknownCommand {
                name: event.command.clone(),
                beat: event.beat,
            })?;

        let invalid = |reason: String| CoreError::InvalidCommandShape {
            name: event.command.clone(),
            reason,
        };

        let command = match entry {
            CatalogEntry::Static(command) => command.clone(),
            CatalogEntry::Factory(factory) => {
                let mut factory = Arc::clone(factory);
                let mut deferrals = 0;
                loop {
                    match factory(event).map_err(&invalid)? {
                        Resolution::Ready(command) => break command,
                        Resolution::Deferred(next) => {
                            deferrals += 1;
                            if deferrals > MAX_DEFERRALS {
                                return Err(invalid(format!(
                                    "factory deferred more than {} times",
                                    MAX_DEFERRALS
                                )));
                            }
                            factory = next;
                        }
                    }
                }
            }
        };

        command.check_shape().map_err(invalid)?;
        Ok(command)
    }
}

/// Chord definitions: name and component notes
const CHORDS: &[(&str, &[&str])] = &[
    ("Chord_F", &["B1", "G2", "D3", "A3"]),
    ("Chord_G", &["A2", "e3", "E3"]),
    ("Chord_C", &["B1", "D2", "A3"]),
    ("Chord_Am", &["B1", "G2", "D2"]),
    ("Chord_E7", &["G1", "A2"]),
];

fn note(calibration: &Calibration, string: usize, fret: u8) -> Option<Command> {
    let key = STRING_KEYS[string];
    let pick = calibration.pick(string)?;
    let pick_delay = if fret == 0 {
        OPEN_PICK_MS[string]
    } else {
        PICK_AFTER_FRET_MS
    };
    let pick_action = Action::AlternatingPick {
        actuator: pick_actuator(string),
        up: pick.up,
        down: pick.down,
        offset: Offset::ms(pick_delay),
    };

    if fret == 0 {
        return Some(Command::aggregate(format!("{}0", key), vec![pick_action]));
    }

    let angles = calibration.fret(string, fret)?;
    let fret_action = Action::PressRelease {
        actuator: fret_actuator(string, fret),
        press: angles.press,
        release: angles.release,
        offset: Offset::default(),
        release_after: angles.release_after.unwrap_or(DEFAULT_RELEASE_BEATS),
    };
    Some(Command::aggregate(
        format!("{}{}", key, fret),
        vec![fret_action, pick_action],
    ))
}

/// Picks to neutral immediately, then the lower and upper fret ranges
fn reset_command(calibration: &Calibration) -> Command {
    let mut actions = Vec::with_capacity(STRING_COUNT * 3);
    let neutral = calibration.neutral_angles();
    let stages = [(0u8, 0.0), (LOWER_FRET_BASE, 0.5), (UPPER_FRET_BASE, 1.0)];

    for (base, beats) in stages {
        for string in 0..STRING_COUNT {
            let actuator = base + string as u8;
            actions.push(Action::Timed {
                actuator,
                angle: neutral[actuator as usize] as u8,
                offset: Offset::beats(beats),
            });
        }
    }
    Command::aggregate("RESET", actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::example;
    use crate::song::EventParams;
    use serde_json::json;

    fn event(name: &str) -> FlatEvent {
        FlatEvent {
            beat: 1.0,
            command: name.to_string(),
            duration: None,
            params: EventParams::new(),
        }
    }

    #[test]
    fn test_builtin_names() {
        let catalog = CommandCatalog::from_calibration(&example());
        for name in ["e0", "A4", "E3", "Chord_F", "Chord_E7", "RESET", "STRUM"] {
            assert!(catalog.contains(name), "missing {}", name);
        }
        // 6 strings x 5 frets + 5 chords + RESET + STRUM
        assert_eq!(catalog.len(), 37);

        let names = catalog.names();
        assert_eq!(names.len(), 37);
        assert!(names.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_open_string_pick_delays() {
        let catalog = CommandCatalog::from_calibration(&example());
        for (string, key) in STRING_KEYS.iter().enumerate() {
            match catalog.resolve(&event(&format!("{}0", key))).unwrap() {
                Command::Aggregate { actions, .. } => {
                    assert_eq!(actions.len(), 1);
                    assert_eq!(actions[0].offset().ms, OPEN_PICK_MS[string], "{}0", key);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(OPEN_PICK_MS[2], 100);
        assert_eq!(OPEN_PICK_MS[0], 50);
    }

    #[test]
    fn test_unknown_command() {
        let catalog = CommandCatalog::from_calibration(&example());
        let err = catalog.resolve(&event("Chord_X")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownCommand { ref name, .. } if name == "Chord_X"));
    }

    #[test]
    fn test_note_is_fret_then_pick() {
        let cal = example();
        let catalog = CommandCatalog::from_calibration(&cal);
        match catalog.resolve(&event("D3")).unwrap() {
            Command::Aggregate { actions, .. } => {
                assert_eq!(actions.len(), 2);
                assert_eq!(actions[0].actuator(), 14);
                assert!(matches!(actions[0], Action::PressRelease { release_after, .. } if release_after == 1.0));
                assert_eq!(actions[1].actuator(), 2);
                assert_eq!(actions[1].offset().ms, PICK_AFTER_FRET_MS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_calibrated_release_after_is_default() {
        let catalog = CommandCatalog::from_calibration(&example());
        match catalog.resolve(&event("E4")).unwrap() {
            Command::Aggregate { actions, .. } => {
                assert!(matches!(actions[0], Action::PressRelease { release_after, .. } if release_after == 0.75));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chord_concatenates_notes() {
        let catalog = CommandCatalog::from_calibration(&example());
        match catalog.resolve(&event("Chord_G")).unwrap() {
            Command::Aggregate { actions, .. } => {
                let actuators: Vec<u8> = actions.iter().map(|a| a.actuator()).collect();
                // A2, e3, E3
                assert_eq!(actuators, vec![7, 1, 12, 0, 17, 5]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strum_defaults_to_all_strings() {
        let catalog = CommandCatalog::from_calibration(&example());
        match catalog.resolve(&event("STRUM")).unwrap() {
            Command::Strum(strum) => assert_eq!(strum.actuators(), vec![0, 1, 2, 3, 4, 5]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strum_reads_strings_param() {
        let catalog = CommandCatalog::from_calibration(&example());
        let mut ev = event("STRUM");
        ev.params.insert("strings".to_string(), json!([4, 2, 3]));
        match catalog.resolve(&ev).unwrap() {
            Command::Strum(strum) => assert_eq!(strum.actuators(), vec![2, 3, 4]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strum_with_bad_strings_is_invalid_shape() {
        let catalog = CommandCatalog::from_calibration(&example());
        let mut ev = event("STRUM");
        ev.params.insert("strings".to_string(), json!([0, 9]));
        assert!(matches!(
            catalog.resolve(&ev),
            Err(CoreError::InvalidCommandShape { .. })
        ));

        ev.params.insert("strings".to_string(), json!([]));
        assert!(matches!(
            catalog.resolve(&ev),
            Err(CoreError::InvalidCommandShape { .. })
        ));
    }

    #[test]
    fn test_deferred_factory_is_followed_until_concrete() {
        let mut catalog = CommandCatalog::from_calibration(&example());
        let inner: Factory = Arc::new(|_: &FlatEvent| {
            Ok::<_, String>(Resolution::Ready(Command::aggregate(
                "late",
                vec![Action::Timed {
                    actuator: 3,
                    angle: 90,
                    offset: Offset::default(),
                }],
            )))
        });
        let middle: Factory = Arc::new(move |_: &FlatEvent| Ok::<_, String>(Resolution::Deferred(Arc::clone(&inner))));
        catalog.register(
            "LATE",
            CatalogEntry::Factory(Arc::new(move |_: &FlatEvent| Ok::<_, String>(Resolution::Deferred(Arc::clone(&middle))))),
        );

        let command = catalog.resolve(&event("LATE")).unwrap();
        assert_eq!(command.name(), "late");
    }

    #[test]
    fn test_endless_deferral_is_invalid_shape() {
        fn again() -> Factory {
            Arc::new(|_: &FlatEvent| Ok::<_, String>(Resolution::Deferred(again())))
        }
        let mut catalog = CommandCatalog::new();
        catalog.register("LOOP", CatalogEntry::Factory(again()));
        assert!(matches!(
            catalog.resolve(&event("LOOP")),
            Err(CoreError::InvalidCommandShape { .. })
        ));
    }

    #[test]
    fn test_failing_factory_is_invalid_shape_not_unknown() {
        let mut catalog = CommandCatalog::new();
        catalog.register(
            "BROKEN",
            CatalogEntry::Factory(Arc::new(|_: &FlatEvent| Err::<Resolution, _>("no strings tuned".to_string()))),
        );
        match catalog.resolve(&event("BROKEN")) {
            Err(CoreError::InvalidCommandShape { name, reason }) => {
                assert_eq!(name, "BROKEN");
                assert_eq!(reason, "no strings tuned");
            }
            other => panic!("unexpected {:?}", other.map(|c| c.name().to_string())),
        }
    }

    #[test]
    fn test_reset_drives_every_actuator_to_neutral() {
        let cal = example();
        let catalog = CommandCatalog::from_calibration(&cal);
        let neutral = cal.neutral_angles();
        match catalog.resolve(&event("RESET")).unwrap() {
            Command::Aggregate { actions, .. } => {
                assert_eq!(actions.len(), 18);
                for action in &actions {
                    match action {
                        Action::Timed { actuator, angle, offset } => {
                            assert_eq!(*angle as i16, neutral[*actuator as usize]);
                            let expected = match actuator {
                                0..=5 => 0.0,
                                6..=11 => 0.5,
                                _ => 1.0,
                            };
                            assert_eq!(offset.beats, expected);
                        }
                        other => panic!("unexpected {:?}", other),
                    }
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
