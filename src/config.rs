//! # Configuration
//!
//! YAML configuration for one rig: actuation mode, keyboard geometry, heights, timing, and
//! the calibrated joint postures.
//!
//! Parsing happens in two steps. The YAML is first deserialized into [`RawConfig`], which
//! mirrors the file (kebab-case keys, everything optional). [`Config::from_raw`] then fills
//! defaults, checks every value, and produces the typed [`Config`] the rest of the crate uses.
//! Validation problems are reported as [`StrikeError::ConfigError`].
//!
//! ## Example
//! ```rust
//! use keystrike::{ActuationMode, Config};
//!
//! let config = Config::builtin().unwrap();
//! assert_eq!(config.mode, ActuationMode::Cartesian);
//! assert_eq!(config.table_height, 0.16);
//! assert_eq!(config.song.len(), 7);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::calibration::CalibrationSettings;
use crate::error::{Result, StrikeError};
use crate::geometry::{KeyGeometry, NoteIndex};
use crate::resolver::{ActuationMode, JointVector, PostureTable, PosturePair};
use crate::song::{parse_song, song_from_indices, DEFAULT_SONG};
use crate::wait::MotionWait;

const BUILTIN: &str = include_str!("../config/icub.yaml");

/// Raw configuration for YAML deserialization
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawConfig {
    pub mode: Option<ActuationMode>,
    pub interactive: Option<bool>,
    pub trajectory_time: Option<f64>,
    pub table_height: Option<f64>,
    pub torso_enabled: Option<bool>,
    pub geometry: Option<KeyGeometry>,
    pub motion: Option<RawMotion>,
    pub calibration: Option<RawCalibration>,
    pub park_posture: Option<Vec<f64>>,
    pub joint: Option<RawJoint>,
    pub song: Option<RawSong>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawMotion {
    pub poll_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub checkpoint: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawCalibration {
    pub samples: Option<usize>,
    pub tolerance: Option<f64>,
    pub sample_interval_ms: Option<u64>,
    pub encoder_attempts: Option<usize>,
    pub encoder_interval_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawJoint {
    pub reference_speed: Option<f64>,
    pub reference_acceleration: Option<f64>,
    pub reference_posture: Option<Vec<f64>>,
    #[serde(default)]
    pub postures: BTreeMap<String, RawPosturePair>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct RawPosturePair {
    pub up: Vec<f64>,
    pub down: Vec<f64>,
}

/// A song written either as a string of notes or as a list of indices.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawSong {
    Text(String),
    Indices(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointSettings {
    pub reference_speed: f64,
    pub reference_acceleration: f64,
    pub postures: PostureTable,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: ActuationMode,
    /// Ask for confirmation before every move.
    pub interactive: bool,
    /// Seconds the Cartesian controller takes for each point-to-point move.
    pub trajectory_time: f64,
    /// Absolute end-effector height at which a key is fully pressed.
    pub table_height: f64,
    pub torso_enabled: bool,
    pub geometry: KeyGeometry,
    pub motion: MotionWait,
    /// Trajectory fraction at which the Cartesian controller reports "motion ongoing".
    pub motion_checkpoint: Option<f64>,
    pub calibration: CalibrationSettings,
    pub park_posture: Option<JointVector>,
    pub joint: JointSettings,
    pub song: Vec<NoteIndex>,
}

impl Config {
    /// The configuration shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(content)
            .map_err(|e| StrikeError::ConfigError(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let geometry = raw.geometry.unwrap_or_default();
        check_geometry(&geometry)?;

        let trajectory_time = positive("trajectory-time", raw.trajectory_time.unwrap_or(1.0))?;
        let table_height = finite("table-height", raw.table_height.unwrap_or(0.16))?;

        let raw_motion = raw.motion.unwrap_or_default();
        let motion = {
            let defaults = MotionWait::default();
            MotionWait {
                poll_interval: millis(
                    "motion.poll-interval-ms",
                    raw_motion.poll_interval_ms,
                    defaults.poll_interval,
                )?,
                timeout: millis("motion.timeout-ms", raw_motion.timeout_ms, defaults.timeout)?,
            }
        };
        let motion_checkpoint = match raw_motion.checkpoint {
            Some(c) if c.is_finite() && c > 0.0 && c < 1.0 => Some(c),
            Some(c) => {
                return Err(StrikeError::ConfigError(format!(
                    "motion.checkpoint must lie strictly between 0 and 1, got {}",
                    c
                )))
            }
            None => None,
        };

        let calibration = {
            let raw = raw.calibration.unwrap_or_default();
            let defaults = CalibrationSettings::default();
            CalibrationSettings {
                samples: at_least_one("calibration.samples", raw.samples, defaults.samples)?,
                tolerance: positive(
                    "calibration.tolerance",
                    raw.tolerance.unwrap_or(defaults.tolerance),
                )?,
                sample_interval: millis(
                    "calibration.sample-interval-ms",
                    raw.sample_interval_ms,
                    defaults.sample_interval,
                )?,
                encoder_attempts: at_least_one(
                    "calibration.encoder-attempts",
                    raw.encoder_attempts,
                    defaults.encoder_attempts,
                )?,
                encoder_interval: millis(
                    "calibration.encoder-interval-ms",
                    raw.encoder_interval_ms,
                    defaults.encoder_interval,
                )?,
            }
        };

        let joint = parse_joint(raw.joint.unwrap_or_default())?;

        let park_posture = match raw.park_posture {
            Some(values) if values.is_empty() => {
                return Err(StrikeError::ConfigError(
                    "park-posture must list at least one joint".to_string(),
                ))
            }
            Some(values) => Some(JointVector(values)),
            None => None,
        };

        let song = match raw.song {
            Some(RawSong::Text(text)) => parse_song(&text)?,
            Some(RawSong::Indices(indices)) => song_from_indices(&indices)?,
            None => DEFAULT_SONG.to_vec(),
        };

        Ok(Config {
            mode: raw.mode.unwrap_or_default(),
            interactive: raw.interactive.unwrap_or(false),
            trajectory_time,
            table_height,
            torso_enabled: raw.torso_enabled.unwrap_or(false),
            geometry,
            motion,
            motion_checkpoint,
            calibration,
            park_posture,
            joint,
            song,
        })
    }
}

fn parse_joint(raw: RawJoint) -> Result<JointSettings> {
    let reference = raw.reference_posture.ok_or_else(|| {
        StrikeError::ConfigError("joint.reference-posture is required".to_string())
    })?;

    let mut by_note: BTreeMap<NoteIndex, PosturePair> = BTreeMap::new();
    for (name, pair) in raw.postures {
        let note = NoteIndex::from_name(&name).map_err(|e| {
            let message = match e {
                StrikeError::ConfigError(message) => message,
                other => other.to_string(),
            };
            StrikeError::ConfigError(format!("joint.postures: {}", message))
        })?;
        let pair = PosturePair {
            up: pair.up,
            down: pair.down,
        };
        if by_note.insert(note, pair).is_some() {
            return Err(StrikeError::ConfigError(format!(
                "joint.postures: {} is listed twice",
                note
            )));
        }
    }

    let missing: Vec<String> = NoteIndex::all()
        .filter(|note| !by_note.contains_key(note))
        .map(|note| note.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(StrikeError::ConfigError(format!(
            "joint.postures is missing {}",
            missing.join(", ")
        )));
    }

    Ok(JointSettings {
        reference_speed: positive("joint.reference-speed", raw.reference_speed.unwrap_or(10.0))?,
        reference_acceleration: positive(
            "joint.reference-acceleration",
            raw.reference_acceleration.unwrap_or(50.0),
        )?,
        postures: PostureTable::new(JointVector(reference), by_note.into_values().collect())?,
    })
}

fn check_geometry(geometry: &KeyGeometry) -> Result<()> {
    positive("geometry.white-white", geometry.white_white)?;
    positive("geometry.small-white-black", geometry.small_white_black)?;
    positive("geometry.big-white-black", geometry.big_white_black)?;
    positive("geometry.g-to-a", geometry.g_to_a)?;
    positive("geometry.black-white", geometry.black_white)?;
    Ok(())
}

fn finite(key: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StrikeError::ConfigError(format!("{} must be a finite number", key)))
    }
}

fn positive(key: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(StrikeError::ConfigError(format!(
            "{} must be positive, got {}",
            key, value
        )))
    }
}

fn millis(key: &str, value: Option<u64>, default: Duration) -> Result<Duration> {
    match value {
        Some(0) => Err(StrikeError::ConfigError(format!(
            "{} must be greater than zero",
            key
        ))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

fn at_least_one(key: &str, value: Option<usize>, default: usize) -> Result<usize> {
    match value {
        Some(0) => Err(StrikeError::ConfigError(format!("{} must be at least 1", key))),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}
