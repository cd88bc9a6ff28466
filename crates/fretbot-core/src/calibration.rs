//! Servo calibration
//!
//! Per-actuator angles measured on the physical robot. The document is JSON:
//!
//! ```text
//! {
//!   "picking":  { "e": { "up": 70, "down": 110, "neutral": 90 }, ... },
//!   "fretting": { "e": { "neutral": { "6": 90, "12": 90 },
//!                        "frets": { "1": { "press": 60, "release": 90 }, ... } }, ... }
//! }
//! ```
//!
//! Loading validates everything the command catalog and the RESET packet
//! need, so a bad calibration is rejected before any session starts.
//! The loaded value is immutable.

use crate::actuator::{
    fret_actuator, LOWER_FRET_BASE, MAX_ANGLE, MAX_FRET, STRING_COUNT, STRING_KEYS,
    UPPER_FRET_BASE, ACTUATOR_COUNT,
};
use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Pick angles for one string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickAngles {
    pub up: u8,
    pub down: u8,
    pub neutral: u8,
}

/// Press/release angles for one fret on one string
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FretAngles {
    pub press: u8,
    pub release: u8,
    /// Default hold time in beats when the playing event gives no duration
    pub release_after: Option<f64>,
}

/// Calibration of one string: its picker and both fret-range servos
#[derive(Debug, Clone, PartialEq)]
pub struct StringCalibration {
    pub pick: PickAngles,
    pub lower_neutral: u8,
    pub upper_neutral: u8,
    pub frets: BTreeMap<u8, FretAngles>,
}

/// Validated calibration for the whole robot
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    strings: Vec<StringCalibration>,
}

#[derive(Deserialize)]
struct RawCalibration {
    #[serde(default)]
    picking: HashMap<String, RawPick>,
    #[serde(default)]
    fretting: HashMap<String, RawFretString>,
}

#[derive(Deserialize)]
struct RawPick {
    up: Option<f64>,
    down: Option<f64>,
    neutral: Option<f64>,
}

#[derive(Deserialize)]
struct RawFretString {
    #[serde(default)]
    neutral: HashMap<String, f64>,
    #[serde(default)]
    frets: HashMap<String, RawFret>,
}

#[derive(Deserialize)]
struct RawFret {
    press: Option<f64>,
    release: Option<f64>,
    release_after: Option<f64>,
}

impl Calibration {
    /// Load and validate a calibration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let calibration = Self::from_json_str(&contents)?;
        log::info!("[calibration] Loaded {:?}", path);
        Ok(calibration)
    }

    /// Parse and validate a calibration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawCalibration = serde_json::from_str(json).map_err(|source| CoreError::Parse {
            what: "calibration".to_string(),
            source,
        })?;

        let strings = STRING_KEYS
            .iter()
            .enumerate()
            .map(|(idx, key)| Self::validate_string(&raw, idx, key))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { strings })
    }

    fn validate_string(raw: &RawCalibration, idx: usize, key: &str) -> Result<StringCalibration> {
        let pick = raw
            .picking
            .get(key)
            .ok_or_else(|| CoreError::CalibrationMissing(format!("picking.{}", key)))?;
        let pick = PickAngles {
            up: required_angle(pick.up, &format!("picking.{}.up", key))?,
            down: required_angle(pick.down, &format!("picking.{}.down", key))?,
            neutral: required_angle(pick.neutral, &format!("picking.{}.neutral", key))?,
        };

        let fretting = raw
            .fretting
            .get(key)
            .ok_or_else(|| CoreError::CalibrationMissing(format!("fretting.{}", key)))?;

        let lower_id = (LOWER_FRET_BASE as usize + idx).to_string();
        let upper_id = (UPPER_FRET_BASE as usize + idx).to_string();
        let lower_neutral = required_angle(
            fretting.neutral.get(&lower_id).copied(),
            &format!("fretting.{}.neutral.{}", key, lower_id),
        )?;
        let upper_neutral = required_angle(
            fretting.neutral.get(&upper_id).copied(),
            &format!("fretting.{}.neutral.{}", key, upper_id),
        )?;

        let mut frets = BTreeMap::new();
        for fret in 1..=MAX_FRET {
            let path = format!("fretting.{}.frets.{}", key, fret);
            let raw_fret = fretting
                .frets
                .get(&fret.to_string())
                .ok_or_else(|| CoreError::CalibrationMissing(path.clone()))?;
            let release_after = match raw_fret.release_after {
                Some(beats) if !beats.is_finite() || beats < 0.0 => {
                    return Err(CoreError::InvalidCalibration {
                        key: format!("{}.release_after", path),
                        reason: format!("{} is not a non-negative beat count", beats),
                    });
                }
                other => other,
            };
            frets.insert(
                fret,
                FretAngles {
                    press: required_angle(raw_fret.press, &format!("{}.press", path))?,
                    release: required_angle(raw_fret.release, &format!("{}.release", path))?,
                    release_after,
                },
            );
        }

        let extra = fretting
            .frets
            .keys()
            .filter(|k| k.parse::<u8>().map(|f| f == 0 || f > MAX_FRET).unwrap_or(true))
            .count();
        if extra > 0 {
            log::debug!(
                "[calibration] Ignoring {} fret entries on string {} outside 1-{}",
                extra,
                key,
                MAX_FRET
            );
        }

        Ok(StringCalibration {
            pick,
            lower_neutral,
            upper_neutral,
            frets,
        })
    }

    /// Calibration of a string by index (0 = `e` .. 5 = `E`)
    pub fn string(&self, string: usize) -> Option<&StringCalibration> {
        self.strings.get(string)
    }

    /// Pick angles of a string
    pub fn pick(&self, string: usize) -> Option<PickAngles> {
        self.strings.get(string).map(|s| s.pick)
    }

    /// Press/release angles for a fret on a string
    pub fn fret(&self, string: usize, fret: u8) -> Option<FretAngles> {
        self.strings.get(string)?.frets.get(&fret).copied()
    }

    /// Neutral angle of every actuator, indexed by actuator id
    ///
    /// This is the payload order the controller's RESET handler expects.
    pub fn neutral_angles(&self) -> [i16; ACTUATOR_COUNT] {
        let mut angles = [0i16; ACTUATOR_COUNT];
        for (idx, string) in self.strings.iter().enumerate().take(STRING_COUNT) {
            angles[idx] = string.pick.neutral as i16;
            angles[fret_actuator(idx, 1) as usize] = string.lower_neutral as i16;
            angles[fret_actuator(idx, MAX_FRET) as usize] = string.upper_neutral as i16;
        }
        angles
    }
}

fn required_angle(value: Option<f64>, key: &str) -> Result<u8> {
    let value = value.ok_or_else(|| CoreError::CalibrationMissing(key.to_string()))?;
    let rounded = value.round();
    if !value.is_finite() || rounded < 0.0 || rounded > MAX_ANGLE as f64 {
        return Err(CoreError::InvalidAngle {
            key: key.to_string(),
            angle: if value.is_finite() { rounded as i64 } else { i64::MAX },
        });
    }
    Ok(rounded as u8)
}
