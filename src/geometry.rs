//! # Keyboard Geometry Model
//!
//! Maps a chromatic note index to a planar offset from the calibrated home position.
//!
//! ## Axis Convention
//! The rig looks at the keyboard from the player's side:
//! - `+y` moves right from the robot's point of view
//! - `-x` moves forward (away from the robot, towards the black keys)
//! - `-z` moves down towards the keys
//!
//! Home sits on F. White keys lie on the home line at multiples of the white-key pitch;
//! black keys sit `black_white` further forward at key-specific lateral gaps.
//!
//! ## Enharmonics
//! Only sharp spellings exist. `Db` and `C#` would alias to the same key, so the model
//! keeps a single representation and rejects flats at the naming boundary.
//!
//! ## Example
//! ```rust
//! use keystrike::{HomePosition, KeyGeometry, NoteIndex, NoteTable};
//!
//! let home = HomePosition::new([-0.3, -0.1, 0.2], [0.0, 0.0, 1.0, std::f64::consts::PI]);
//! let table = NoteTable::build(home, &KeyGeometry::default());
//!
//! let [x, y] = table.position_for(NoteIndex::C_SHARP);
//! assert!((x - (-0.3 - 0.035)).abs() < 1e-12);
//! assert!((y - (-0.1 - 0.0225 * 2.0 - 0.01425)).abs() < 1e-12);
//! ```

use std::fmt;

use serde::Deserialize;

use crate::error::{Result, StrikeError};

/// Number of chromatic keys in the modelled octave.
pub const OCTAVE: usize = 12;

const NOTE_NAMES: [&str; OCTAVE] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A chromatic semitone within the single modelled octave (C = 0 ... B = 11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteIndex(u8);

impl NoteIndex {
    pub const C: NoteIndex = NoteIndex(0);
    pub const C_SHARP: NoteIndex = NoteIndex(1);
    pub const D: NoteIndex = NoteIndex(2);
    pub const D_SHARP: NoteIndex = NoteIndex(3);
    pub const E: NoteIndex = NoteIndex(4);
    pub const F: NoteIndex = NoteIndex(5);
    pub const F_SHARP: NoteIndex = NoteIndex(6);
    pub const G: NoteIndex = NoteIndex(7);
    pub const G_SHARP: NoteIndex = NoteIndex(8);
    pub const A: NoteIndex = NoteIndex(9);
    pub const A_SHARP: NoteIndex = NoteIndex(10);
    pub const B: NoteIndex = NoteIndex(11);

    /// Checked constructor. Out-of-range values are a contract violation, never clamped.
    pub fn new(value: i64) -> Result<Self> {
        if (0..OCTAVE as i64).contains(&value) {
            Ok(NoteIndex(value as u8))
        } else {
            Err(StrikeError::InvalidNoteIndex(value))
        }
    }

    /// Fold any sequence value into the octave (`14` becomes D, `-1` becomes B).
    pub fn wrapping(value: i64) -> Self {
        NoteIndex(value.rem_euclid(OCTAVE as i64) as u8)
    }

    /// Parse a natural or sharp note name (`"C"`, `"F#"`, case-insensitive letter).
    ///
    /// Flats are rejected with a message naming the sharp spelling to use instead.
    pub fn from_name(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        let letter = chars
            .next()
            .ok_or_else(|| StrikeError::ConfigError("empty note name".to_string()))?
            .to_ascii_uppercase();
        let base: i64 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => {
                return Err(StrikeError::ConfigError(format!(
                    "unknown note name '{}'",
                    trimmed
                )))
            }
        };
        match chars.as_str() {
            "" => Ok(NoteIndex(base as u8)),
            "#" => {
                let sharp = NoteIndex::wrapping(base + 1);
                if sharp.is_black() {
                    Ok(sharp)
                } else {
                    Err(StrikeError::ConfigError(format!(
                        "'{}' is not a black key; use '{}'",
                        trimmed, sharp
                    )))
                }
            }
            "b" => Err(StrikeError::ConfigError(format!(
                "flat spelling '{}' is not supported; use '{}'",
                trimmed,
                NoteIndex::wrapping(base - 1)
            ))),
            _ => Err(StrikeError::ConfigError(format!(
                "unknown note name '{}'",
                trimmed
            ))),
        }
    }

    pub fn value(self) -> usize {
        self.0 as usize
    }

    pub fn is_black(self) -> bool {
        matches!(self.0, 1 | 3 | 6 | 8 | 10)
    }

    /// All twelve notes in chromatic order.
    pub fn all() -> impl Iterator<Item = NoteIndex> {
        (0..OCTAVE as u8).map(NoteIndex)
    }
}

impl fmt::Display for NoteIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NOTE_NAMES[self.value()])
    }
}

/// Physical spacing of one piano octave, in metres.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KeyGeometry {
    /// Centre-to-centre distance between adjacent white keys.
    pub white_white: f64,
    /// Lateral gap between a white key and the nearer black key (E/F side).
    pub small_white_black: f64,
    /// Lateral gap between a white key and the farther black key.
    pub big_white_black: f64,
    /// Half-step gap around G#, half a white-key pitch.
    pub g_to_a: f64,
    /// How far forward the black keys are struck relative to the white keys.
    pub black_white: f64,
}

impl Default for KeyGeometry {
    fn default() -> Self {
        Self {
            white_white: 0.0225,
            small_white_black: 0.00825,
            big_white_black: 0.01425,
            g_to_a: 0.01125,
            black_white: 0.035,
        }
    }
}

/// Planar displacement from home: `x = home.x - forward`, `y = home.y + lateral`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub forward: f64,
    pub lateral: f64,
}

/// End-effector pose: position in metres and axis-angle orientation (axis xyz + angle).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

impl Pose {
    pub fn new(position: [f64; 3], orientation: [f64; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Euclidean distance between the two positions.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        self.position
            .iter()
            .zip(other.position.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Largest absolute component difference across position and orientation.
    pub fn max_deviation(&self, other: &Pose) -> f64 {
        self.position
            .iter()
            .zip(other.position.iter())
            .chain(self.orientation.iter().zip(other.orientation.iter()))
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// The captured reference pose every note target is relative to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomePosition(Pose);

impl HomePosition {
    pub fn new(position: [f64; 3], orientation: [f64; 4]) -> Self {
        HomePosition(Pose::new(position, orientation))
    }

    pub fn pose(&self) -> &Pose {
        &self.0
    }

    pub fn height(&self) -> f64 {
        self.0.position[2]
    }
}

impl From<Pose> for HomePosition {
    fn from(pose: Pose) -> Self {
        HomePosition(pose)
    }
}

/// Twelve per-note offsets plus the home they are relative to.
///
/// Built once during calibration; there is no mutating API.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteTable {
    home: HomePosition,
    offsets: [Offset; OCTAVE],
}

impl NoteTable {
    pub fn build(home: HomePosition, geometry: &KeyGeometry) -> Self {
        let KeyGeometry {
            white_white: w,
            small_white_black: s,
            big_white_black: b,
            g_to_a: g,
            black_white: f,
        } = *geometry;

        let white = |lateral: f64| Offset {
            forward: 0.0,
            lateral,
        };
        let black = |lateral: f64| Offset {
            forward: f,
            lateral,
        };

        // F is home; keys left of it count down in white pitches, keys right of it
        // accumulate the black-key gaps.
        let f_sharp = s;
        let g_nat = f_sharp + b;
        let g_sharp = g_nat + g;
        let a_nat = g_sharp + g;
        let a_sharp = a_nat + b;
        let b_nat = a_sharp + s;

        let offsets = [
            white(-w * 3.0),
            black(-w * 2.0 - b),
            white(-w * 2.0),
            black(-s - w),
            white(-w),
            white(0.0),
            black(f_sharp),
            white(g_nat),
            black(g_sharp),
            white(a_nat),
            black(a_sharp),
            white(b_nat),
        ];

        Self { home, offsets }
    }

    pub fn home(&self) -> &HomePosition {
        &self.home
    }

    pub fn offset_for(&self, note: NoteIndex) -> Offset {
        self.offsets[note.value()]
    }

    /// Absolute `[x, y]` of the strike point for `note`.
    pub fn position_for(&self, note: NoteIndex) -> [f64; 2] {
        let offset = self.offset_for(note);
        let home = self.home.pose().position;
        [home[0] - offset.forward, home[1] + offset.lateral]
    }
}
