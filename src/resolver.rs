//! # Target Resolver
//!
//! Turns a note and a motion phase into something the arm can be commanded to.
//!
//! ## Two Resolvers
//! - [`CartesianResolver`] - produces an end-effector [`Pose`]. Inverse kinematics is left to
//!   the external Cartesian controller, so targets are computed from the note table.
//! - [`JointResolver`] - produces a [`JointVector`]. There is no kinematic model in this mode,
//!   so every (note, up/down) posture is a calibrated constant looked up in a [`PostureTable`].
//!
//! Both are only constructible from a sealed calibration (see `calibration`), which is what
//! keeps the sequencer from running before bootstrap has succeeded.
//!
//! ## Phases
//! A note cycle is always Approach -> Press -> Retract. Joint mode has only two postures per
//! note, so Approach and Retract both resolve to the Up posture.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Deserialize;

use crate::calibration::{CartesianCalibration, JointCalibration};
use crate::error::{Result, StrikeError};
use crate::geometry::{NoteIndex, NoteTable, Pose, OCTAVE};

/// Which actuation strategy drives the arm. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ActuationMode {
    #[default]
    Cartesian,
    Joint,
}

impl fmt::Display for ActuationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuationMode::Cartesian => f.write_str("cartesian"),
            ActuationMode::Joint => f.write_str("joint"),
        }
    }
}

/// One step of the per-note press cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionPhase {
    Approach,
    Press,
    Retract,
}

impl MotionPhase {
    /// Phases of one note cycle, in dispatch order.
    pub const CYCLE: [MotionPhase; 3] = [
        MotionPhase::Approach,
        MotionPhase::Press,
        MotionPhase::Retract,
    ];

    pub fn vertical(self) -> VerticalPhase {
        match self {
            MotionPhase::Press => VerticalPhase::Down,
            MotionPhase::Approach | MotionPhase::Retract => VerticalPhase::Up,
        }
    }

    pub fn next(self) -> Option<MotionPhase> {
        match self {
            MotionPhase::Approach => Some(MotionPhase::Press),
            MotionPhase::Press => Some(MotionPhase::Retract),
            MotionPhase::Retract => None,
        }
    }

    pub(crate) fn verb(self) -> &'static str {
        match self {
            MotionPhase::Approach => "approaching",
            MotionPhase::Press => "pressing",
            MotionPhase::Retract => "retracting",
        }
    }
}

/// Finger height for joint-space postures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalPhase {
    Up,
    Down,
}

/// Joint angles in degrees, one per controlled axis.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointVector(pub Vec<f64>);

impl JointVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Copy of `self` with the leading axes replaced by `prefix`.
    pub fn overlay(&self, prefix: &[f64]) -> JointVector {
        let mut joints = self.0.clone();
        for (slot, value) in joints.iter_mut().zip(prefix) {
            *slot = *value;
        }
        JointVector(joints)
    }
}

impl From<Vec<f64>> for JointVector {
    fn from(values: Vec<f64>) -> Self {
        JointVector(values)
    }
}

/// Calibrated arm-joint prefixes for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct PosturePair {
    pub up: Vec<f64>,
    pub down: Vec<f64>,
}

/// Reference posture plus the calibrated up/down arm prefix of every note.
///
/// Joints not covered by a note's prefix (the hand) keep their reference values.
#[derive(Debug, Clone, PartialEq)]
pub struct PostureTable {
    reference: JointVector,
    notes: Vec<PosturePair>,
}

impl PostureTable {
    pub fn new(reference: JointVector, notes: Vec<PosturePair>) -> Result<Self> {
        if notes.len() != OCTAVE {
            return Err(StrikeError::ConfigError(format!(
                "posture table needs {} notes, found {}",
                OCTAVE,
                notes.len()
            )));
        }
        for (note, pair) in NoteIndex::all().zip(notes.iter()) {
            for (label, prefix) in [("up", &pair.up), ("down", &pair.down)] {
                if prefix.is_empty() || prefix.len() > reference.len() {
                    return Err(StrikeError::ConfigError(format!(
                        "{} posture for {} has {} joints; expected 1..={}",
                        label,
                        note,
                        prefix.len(),
                        reference.len()
                    )));
                }
            }
        }
        Ok(Self { reference, notes })
    }

    pub fn reference(&self) -> &JointVector {
        &self.reference
    }

    pub fn posture(&self, note: NoteIndex, phase: VerticalPhase) -> JointVector {
        let pair = &self.notes[note.value()];
        match phase {
            VerticalPhase::Up => self.reference.overlay(&pair.up),
            VerticalPhase::Down => self.reference.overlay(&pair.down),
        }
    }
}

/// Capability the sequencer needs from a resolver.
pub trait TargetResolver {
    type Target: fmt::Debug + Clone;

    fn mode(&self) -> ActuationMode;

    fn target_for(&self, note: NoteIndex, phase: MotionPhase) -> Self::Target;
}

/// Operational-space resolver: note table plus a fixed strike height.
#[derive(Debug, Clone)]
pub struct CartesianResolver {
    table: Arc<NoteTable>,
    press_height: f64,
}

impl CartesianResolver {
    pub fn new(calibration: &CartesianCalibration) -> Self {
        Self {
            table: calibration.note_table(),
            press_height: calibration.press_height(),
        }
    }

    pub fn pose_for(&self, note: NoteIndex, phase: MotionPhase) -> Pose {
        let home = self.table.home().pose();
        let [x, y] = self.table.position_for(note);
        let z = match phase {
            MotionPhase::Press => self.press_height,
            MotionPhase::Approach | MotionPhase::Retract => home.position[2],
        };
        // attitude is held for the whole session
        Pose::new([x, y, z], home.orientation)
    }

    pub fn table(&self) -> &NoteTable {
        &self.table
    }
}

impl TargetResolver for CartesianResolver {
    type Target = Pose;

    fn mode(&self) -> ActuationMode {
        ActuationMode::Cartesian
    }

    fn target_for(&self, note: NoteIndex, phase: MotionPhase) -> Pose {
        self.pose_for(note, phase)
    }
}

/// Joint-space resolver backed by a calibrated posture table.
#[derive(Debug, Clone)]
pub struct JointResolver {
    postures: Arc<PostureTable>,
}

impl JointResolver {
    pub fn new(calibration: &JointCalibration) -> Self {
        Self {
            postures: calibration.postures(),
        }
    }

    pub fn joints_for(&self, note: NoteIndex, phase: MotionPhase) -> JointVector {
        self.postures.posture(note, phase.vertical())
    }
}

impl TargetResolver for JointResolver {
    type Target = JointVector;

    fn mode(&self) -> ActuationMode {
        ActuationMode::Joint
    }

    fn target_for(&self, note: NoteIndex, phase: MotionPhase) -> JointVector {
        self.joints_for(note, phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CartesianCalibration, JointCalibration};
    use crate::config::Config;
    use crate::geometry::{HomePosition, KeyGeometry};

    fn cartesian() -> CartesianResolver {
        let home = HomePosition::new([-0.3, -0.1, 0.2], [0.0, 0.0, 1.0, 3.14]);
        let table = NoteTable::build(home, &KeyGeometry::default());
        CartesianResolver::new(&CartesianCalibration::seal(table, 0.16))
    }

    fn joint() -> JointResolver {
        let config = Config::builtin().unwrap();
        JointResolver::new(&JointCalibration::seal(config.joint.postures.clone()))
    }

    #[test]
    fn test_press_uses_table_height_others_use_home_height() {
        let resolver = cartesian();
        assert_eq!(resolver.pose_for(NoteIndex::E, MotionPhase::Approach).position[2], 0.2);
        assert_eq!(resolver.pose_for(NoteIndex::E, MotionPhase::Press).position[2], 0.16);
        assert_eq!(resolver.pose_for(NoteIndex::E, MotionPhase::Retract).position[2], 0.2);
    }

    #[test]
    fn test_orientation_never_varies() {
        let resolver = cartesian();
        for note in NoteIndex::all() {
            for phase in MotionPhase::CYCLE {
                assert_eq!(
                    resolver.pose_for(note, phase).orientation,
                    [0.0, 0.0, 1.0, 3.14]
                );
            }
        }
    }

    #[test]
    fn test_phase_only_changes_height() {
        let resolver = cartesian();
        let approach = resolver.pose_for(NoteIndex::G_SHARP, MotionPhase::Approach);
        let press = resolver.pose_for(NoteIndex::G_SHARP, MotionPhase::Press);
        assert_eq!(approach.position[..2], press.position[..2]);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(MotionPhase::Approach.next(), Some(MotionPhase::Press));
        assert_eq!(MotionPhase::Press.next(), Some(MotionPhase::Retract));
        assert_eq!(MotionPhase::Retract.next(), None);
        assert_eq!(MotionPhase::Approach.vertical(), VerticalPhase::Up);
        assert_eq!(MotionPhase::Press.vertical(), VerticalPhase::Down);
        assert_eq!(MotionPhase::Retract.vertical(), VerticalPhase::Up);
    }

    #[test]
    fn test_white_key_template_differs_in_shoulder_only() {
        let resolver = joint();
        let up = resolver.joints_for(NoteIndex::C, MotionPhase::Approach);
        let down = resolver.joints_for(NoteIndex::C, MotionPhase::Press);
        assert_eq!(&up.as_slice()[..7], &[-9.0, 80.0, 0.0, 67.5, 20.0, 0.0, 0.0]);
        assert_eq!(&down.as_slice()[..7], &[-4.0, 80.0, 0.0, 67.5, 20.0, 0.0, 0.0]);
        assert_eq!(&up.as_slice()[1..], &down.as_slice()[1..]);
    }

    #[test]
    fn test_black_key_postures_are_exact() {
        let resolver = joint();
        let up = resolver.joints_for(NoteIndex::D_SHARP, MotionPhase::Approach);
        let down = resolver.joints_for(NoteIndex::D_SHARP, MotionPhase::Press);
        assert_eq!(&up.as_slice()[..7], &[-67.0, 74.0, 63.0, 67.0, 19.0, -6.0, 7.0]);
        assert_eq!(&down.as_slice()[..7], &[-56.0, 75.0, 63.0, 68.0, 17.0, -16.0, 8.0]);
    }

    #[test]
    fn test_hand_joints_keep_reference_values() {
        let resolver = joint();
        let up = resolver.joints_for(NoteIndex::A_SHARP, MotionPhase::Approach);
        assert_eq!(up.len(), 16);
        assert_eq!(
            &up.as_slice()[7..],
            &[38.0, 4.0, 48.0, 55.0, 2.0, 10.0, 48.0, 0.0, 14.0]
        );
    }

    #[test]
    fn test_retract_returns_to_up_posture() {
        let resolver = joint();
        for note in NoteIndex::all() {
            assert_eq!(
                resolver.joints_for(note, MotionPhase::Approach),
                resolver.joints_for(note, MotionPhase::Retract)
            );
        }
    }

    #[test]
    fn test_posture_table_rejects_incomplete_tables() {
        let reference = JointVector(vec![0.0; 4]);
        let pair = PosturePair {
            up: vec![1.0],
            down: vec![2.0],
        };
        assert!(PostureTable::new(reference.clone(), vec![pair.clone(); 11]).is_err());

        let too_long = PosturePair {
            up: vec![0.0; 5],
            down: vec![0.0; 4],
        };
        let mut notes = vec![pair; 12];
        notes[3] = too_long;
        let err = PostureTable::new(reference, notes).unwrap_err();
        assert!(err.to_string().contains("D#"), "{}", err);
    }

    #[test]
    fn test_mode_names_match_config_spelling() {
        assert_eq!(
            ActuationMode::from_str("joint", false),
            Ok(ActuationMode::Joint)
        );
        assert_eq!(
            ActuationMode::from_str("cartesian", false),
            Ok(ActuationMode::Cartesian)
        );
        assert!(ActuationMode::from_str("pose", false).is_err());
        for mode in ActuationMode::value_variants() {
            let name = mode.to_possible_value().unwrap();
            assert_eq!(name.get_name(), mode.to_string());
        }
    }

    #[test]
    fn test_overlay_keeps_tail() {
        let base = JointVector(vec![1.0, 2.0, 3.0]);
        assert_eq!(base.overlay(&[9.0]).0, vec![9.0, 2.0, 3.0]);
    }
}
