//! Song documents and flattening
//!
//! A song is a flat `timeline` of events whose `cmd` is either a catalog
//! command or the name of a reusable section:
//!
//! ```text
//! {
//!   "bpm": 90,
//!   "sections": { "verse": [ { "beat": 0, "cmd": "Chord_G" }, { "beat": 0, "cmd": "STRUM" } ] },
//!   "timeline": [ { "beat": 0, "cmd": "verse" }, { "beat": 4, "cmd": "verse" },
//!                 { "beat": 8, "cmd": "e1", "duration": 1.0 } ]
//! }
//! ```
//!
//! [`flatten`] expands section references one level deep and orders the
//! result by beat.

use crate::error::{CoreError, Result};
use crate::timing::Timing;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Extra event fields, passed through to command factories
pub type EventParams = BTreeMap<String, serde_json::Value>;

/// One entry of a timeline or a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongEvent {
    pub beat: f64,
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub params: EventParams,
}

impl SongEvent {
    pub fn new(beat: f64, command: impl Into<String>) -> Self {
        Self {
            beat,
            command: command.into(),
            duration: None,
            params: EventParams::new(),
        }
    }

    pub fn with_duration(mut self, beats: f64) -> Self {
        self.duration = Some(beats);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Tempo override for this song
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub sections: BTreeMap<String, Vec<SongEvent>>,
    pub timeline: Vec<SongEvent>,
}

/// An event after section expansion, positioned at an absolute beat
#[derive(Debug, Clone, PartialEq)]
pub struct FlatEvent {
    pub beat: f64,
    pub command: String,
    pub duration: Option<f64>,
    pub params: EventParams,
}

impl FlatEvent {
    fn from_song_event(event: &SongEvent, beat: f64) -> Self {
        Self {
            beat,
            command: event.command.clone(),
            duration: event.duration,
            params: event.params.clone(),
        }
    }

    /// Integer-list parameter, e.g. a strum's `strings`
    pub fn u8_list_param(&self, key: &str) -> Option<std::result::Result<Vec<u8>, String>> {
        let value = self.params.get(key)?;
        let parsed = value
            .as_array()
            .ok_or_else(|| format!("'{}' must be a list of actuator ids", key))
            .and_then(|items| {
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or_else(|| format!("'{}' contains invalid id {}", key, item))
                    })
                    .collect()
            });
        Some(parsed)
    }
}

impl Song {
    /// Parse and validate a song document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let song: Song = serde_json::from_str(json).map_err(|source| CoreError::Parse {
            what: "song".to_string(),
            source,
        })?;
        song.validate()?;
        Ok(song)
    }

    /// Load and validate a song file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Timing for this song: its own tempo if it has one
    pub fn timing(&self, base: Timing) -> Timing {
        match self.bpm {
            Some(bpm) => base.with_bpm(bpm),
            None => base,
        }
    }

    /// Reject songs that cannot be flattened into a playable sequence
    pub fn validate(&self) -> Result<()> {
        if let Some(bpm) = self.bpm {
            if !bpm.is_finite() || bpm <= 0.0 {
                return Err(CoreError::InvalidSong(format!("bpm must be positive, got {}", bpm)));
            }
        }

        for event in &self.timeline {
            check_event(event, "timeline")?;
        }

        for (name, events) in &self.sections {
            for event in events {
                check_event(event, &format!("section '{}'", name))?;
                if self.sections.contains_key(&event.command) {
                    return Err(CoreError::InvalidSong(format!(
                        "section '{}' references section '{}'; sections cannot nest",
                        name, event.command
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_event(event: &SongEvent, location: &str) -> Result<()> {
    if !event.beat.is_finite() || event.beat < 0.0 {
        return Err(CoreError::InvalidSong(format!(
            "{}: '{}' has invalid beat {}",
            location, event.command, event.beat
        )));
    }
    if let Some(duration) = event.duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(CoreError::InvalidSong(format!(
                "{}: '{}' has invalid duration {}",
                location, event.command, duration
            )));
        }
    }
    Ok(())
}

/// Expand section references and order events by beat
///
/// A timeline entry naming a section becomes one event per section entry,
/// shifted by the entry's beat; each keeps its own duration and params.
/// Other entries pass through unchanged. The sort is stable, so events on
/// the same beat keep their document order.
pub fn flatten(song: &Song) -> Vec<FlatEvent> {
    let mut flat = Vec::with_capacity(song.timeline.len());

    for entry in &song.timeline {
        match song.sections.get(&entry.command) {
            Some(section) => {
                for sub in section {
                    flat.push(FlatEvent::from_song_event(sub, entry.beat + sub.beat));
                }
            }
            None => flat.push(FlatEvent::from_song_event(entry, entry.beat)),
        }
    }

    flat.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(events: &[FlatEvent]) -> Vec<&str> {
        events.iter().map(|e| e.command.as_str()).collect()
    }

    #[test]
    fn test_flatten_without_sections_sorts_stably() {
        let song = Song {
            timeline: vec![
                SongEvent::new(2.0, "A0"),
                SongEvent::new(0.0, "e1").with_duration(1.0),
                SongEvent::new(1.0, "B1"),
                SongEvent::new(0.0, "STRUM"),
                SongEvent::new(1.0, "G2"),
            ],
            ..Default::default()
        };

        let flat = flatten(&song);
        assert_eq!(names(&flat), vec!["e1", "STRUM", "B1", "G2", "A0"]);
        assert_eq!(flat[0].duration, Some(1.0));
        assert_eq!(flat[1].duration, None);
    }

    #[test]
    fn test_section_referenced_twice_yields_two_offset_copies() {
        let mut sections = BTreeMap::new();
        sections.insert(
            "riff".to_string(),
            vec![
                SongEvent::new(0.0, "A0"),
                SongEvent::new(0.5, "A2")
                    .with_duration(0.5)
                    .with_param("accent", json!(true)),
            ],
        );
        let song = Song {
            bpm: None,
            sections,
            timeline: vec![
                SongEvent::new(4.0, "riff").with_duration(8.0),
                SongEvent::new(0.0, "riff"),
            ],
        };

        let flat = flatten(&song);
        let beats: Vec<f64> = flat.iter().map(|e| e.beat).collect();
        assert_eq!(beats, vec![0.0, 0.5, 4.0, 4.5]);
        assert_eq!(names(&flat), vec!["A0", "A2", "A0", "A2"]);
        // Sub-events keep their own duration, not the invoking entry's
        assert_eq!(flat[0].duration, None);
        assert_eq!(flat[1].duration, Some(0.5));
        assert_eq!(flat[2].duration, None);
        assert_eq!(flat[3].duration, Some(0.5));
        assert_eq!(flat[3].params.get("accent"), Some(&json!(true)));
        assert!(flat[2].params.is_empty());
    }

    #[test]
    fn test_params_survive_parsing_and_flattening() {
        let json = json!({
            "sections": { "s": [ { "beat": 1, "cmd": "STRUM", "strings": [1, 2] } ] },
            "timeline": [ { "beat": 2, "cmd": "s" }, { "beat": 0, "cmd": "STRUM", "strings": [0] } ]
        });
        let song = Song::from_json_str(&json.to_string()).unwrap();
        let flat = flatten(&song);

        assert_eq!(flat[0].u8_list_param("strings").unwrap().unwrap(), vec![0]);
        assert_eq!(flat[1].beat, 3.0);
        assert_eq!(flat[1].u8_list_param("strings").unwrap().unwrap(), vec![1, 2]);
        assert!(flat[1].u8_list_param("missing").is_none());
    }

    #[test]
    fn test_invalid_list_param() {
        let event = FlatEvent {
            beat: 0.0,
            command: "STRUM".to_string(),
            duration: None,
            params: [("strings".to_string(), json!([0, 400]))].into_iter().collect(),
        };
        assert!(event.u8_list_param("strings").unwrap().is_err());
    }

    #[test]
    fn test_nested_section_is_rejected() {
        let json = json!({
            "sections": {
                "inner": [ { "beat": 0, "cmd": "A0" } ],
                "outer": [ { "beat": 0, "cmd": "inner" } ]
            },
            "timeline": [ { "beat": 0, "cmd": "outer" } ]
        });
        let err = Song::from_json_str(&json.to_string()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSong(ref m) if m.contains("cannot nest")));
    }

    #[test]
    fn test_negative_beat_is_rejected() {
        let json = json!({ "timeline": [ { "beat": -1, "cmd": "A0" } ] });
        assert!(matches!(
            Song::from_json_str(&json.to_string()),
            Err(CoreError::InvalidSong(_))
        ));
    }

    #[test]
    fn test_song_bpm_overrides_timing() {
        let json = json!({ "bpm": 60, "timeline": [] });
        let song = Song::from_json_str(&json.to_string()).unwrap();
        assert_eq!(song.timing(Timing::new(120.0)).beats_to_ms(1.0), 1000);
        assert_eq!(Song::default().timing(Timing::new(120.0)).bpm, 120.0);
    }

    #[test]
    fn test_example_songs_parse() {
        for doc in [
            include_str!("../../../assets/songs/single_note.json"),
            include_str!("../../../assets/songs/strum_practice.json"),
            include_str!("../../../assets/songs/riff.json"),
        ] {
            let song = Song::from_json_str(doc).unwrap();
            assert!(!flatten(&song).is_empty());
        }
    }
}
