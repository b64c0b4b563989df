//! # Calibration Bootstrap
//!
//! One-shot preparation that has to succeed before anything can be played.
//!
//! ## Cartesian Mode
//! 1. Park the idle arm out of the way (dual-arm rigs).
//! 2. Put the acting arm in its reference posture, finger extended.
//! 3. Restrict the solver's degrees of freedom (torso off unless configured).
//! 4. Wait for the operator to line the finger up with the home key.
//! 5. Capture the live end-effector pose as home once two consecutive reads agree.
//! 6. Build and seal the note table.
//!
//! ## Joint Mode
//! Set reference speeds and accelerations, wait for encoders, move to the reference posture,
//! seal the posture table.
//!
//! Every failure surfaces as [`StrikeError::CalibrationFailed`] and leaves nothing sealed.
//! The sealed outputs ([`CartesianCalibration`], [`JointCalibration`]) are the only way to
//! build a resolver.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::actuation::{CartesianInterface, CartesianSession, JointInterface};
use crate::config::Config;
use crate::confirm::ConfirmPolicy;
use crate::error::{Result, StrikeError};
use crate::geometry::{HomePosition, NoteTable};
use crate::resolver::{JointVector, PostureTable};
use crate::wait::{wait_until, StopToken, WaitOutcome};

/// Number of leading torso joints in the Cartesian solver's DOF vector.
const TORSO_DOF: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    /// Maximum number of consecutive-read comparisons while waiting for the pose to settle.
    pub samples: usize,
    /// Largest per-component difference for two reads to count as stable.
    pub tolerance: f64,
    pub sample_interval: Duration,
    pub encoder_attempts: usize,
    pub encoder_interval: Duration,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            samples: 20,
            tolerance: 1e-3,
            sample_interval: Duration::from_millis(100),
            encoder_attempts: 50,
            encoder_interval: Duration::from_millis(100),
        }
    }
}

/// Sealed result of a Cartesian bootstrap.
#[derive(Debug, Clone)]
pub struct CartesianCalibration {
    table: Arc<NoteTable>,
    press_height: f64,
}

impl CartesianCalibration {
    pub(crate) fn seal(table: NoteTable, press_height: f64) -> Self {
        Self {
            table: Arc::new(table),
            press_height,
        }
    }

    pub fn home(&self) -> &HomePosition {
        self.table.home()
    }

    pub fn note_table(&self) -> Arc<NoteTable> {
        Arc::clone(&self.table)
    }

    pub fn press_height(&self) -> f64 {
        self.press_height
    }
}

/// Sealed result of a joint-space bootstrap.
#[derive(Debug, Clone)]
pub struct JointCalibration {
    postures: Arc<PostureTable>,
}

impl JointCalibration {
    pub(crate) fn seal(postures: PostureTable) -> Self {
        Self {
            postures: Arc::new(postures),
        }
    }

    pub fn postures(&self) -> Arc<PostureTable> {
        Arc::clone(&self.postures)
    }
}

fn failed(reason: impl Into<String>) -> StrikeError {
    StrikeError::CalibrationFailed {
        reason: reason.into(),
    }
}

fn device(context: &str) -> impl FnOnce(StrikeError) -> StrikeError + '_ {
    move |e| failed(format!("{}: {}", context, e))
}

pub struct Bootstrap<'a> {
    config: &'a Config,
    stop: StopToken,
}

impl<'a> Bootstrap<'a> {
    pub fn new(config: &'a Config, stop: StopToken) -> Self {
        Self { config, stop }
    }

    /// Swing the idle arm clear of the keyboard, if a park posture is configured.
    pub fn park<J: JointInterface>(&self, idle: &mut J) -> Result<()> {
        match &self.config.park_posture {
            Some(posture) => {
                info!("parking idle arm");
                self.move_limb(idle, posture)
            }
            None => Ok(()),
        }
    }

    /// Put the acting arm in its reference posture via its joint board.
    pub fn pose_acting_arm<J: JointInterface>(&self, acting: &mut J) -> Result<()> {
        info!("moving acting arm to reference posture");
        let reference = self.config.joint.postures.reference().clone();
        self.move_limb(acting, &reference)
    }

    /// Capture home through an open Cartesian session and seal the note table.
    pub fn calibrate_cartesian<C, P>(
        &self,
        session: &mut CartesianSession<C>,
        confirm: &mut P,
    ) -> Result<CartesianCalibration>
    where
        C: CartesianInterface,
        P: ConfirmPolicy,
    {
        let iface = session.interface();

        let current = iface.get_dof().map_err(device("reading solver DOF"))?;
        let mut wanted = current.clone();
        for slot in wanted.iter_mut().take(TORSO_DOF) {
            *slot = self.config.torso_enabled;
        }
        let applied = iface.set_dof(&wanted).map_err(device("setting solver DOF"))?;
        debug!(?applied, "solver DOF configured");

        let approved = confirm
            .await_continue("Line the middle finger up with the home key.", &self.stop)
            .map_err(device("waiting for line-up confirmation"))?;
        if !approved {
            return Err(failed("stopped before home was captured"));
        }

        let home = self.capture_home(iface)?;
        let home_height = home.height();
        if self.config.table_height >= home_height {
            return Err(failed(format!(
                "table height {:.3} m is not below home height {:.3} m",
                self.config.table_height, home_height
            )));
        }

        info!(
            position = ?home.pose().position,
            orientation = ?home.pose().orientation,
            "home captured"
        );
        let table = NoteTable::build(home, &self.config.geometry);
        Ok(CartesianCalibration::seal(table, self.config.table_height))
    }

    /// Bring the arm to its reference posture and seal the posture table.
    pub fn calibrate_joint<J: JointInterface>(&self, arm: &mut J) -> Result<JointCalibration> {
        let postures = self.config.joint.postures.clone();
        let axes = arm.axis_count().map_err(device("reading axis count"))?;
        if postures.reference().len() != axes {
            return Err(failed(format!(
                "reference posture has {} joints but the board has {} axes",
                postures.reference().len(),
                axes
            )));
        }
        self.pose_acting_arm(arm)?;
        info!(axes, "joint postures sealed");
        Ok(JointCalibration::seal(postures))
    }

    fn capture_home<C: CartesianInterface>(&self, iface: &mut C) -> Result<HomePosition> {
        let settings = &self.config.calibration;
        let mut previous = iface.get_pose().map_err(device("reading home pose"))?;
        for sample in 0..settings.samples {
            if self.stop.sleep(settings.sample_interval) {
                return Err(failed("stopped while capturing home"));
            }
            let current = iface.get_pose().map_err(device("reading home pose"))?;
            let deviation = current.max_deviation(&previous);
            debug!(sample, deviation, "home pose sample");
            if deviation <= settings.tolerance {
                return Ok(HomePosition::from(current));
            }
            previous = current;
        }
        Err(failed(format!(
            "pose did not stabilize within {} samples",
            settings.samples
        )))
    }

    fn move_limb<J: JointInterface>(&self, arm: &mut J, posture: &JointVector) -> Result<()> {
        let joint = &self.config.joint;
        let axes = arm.axis_count().map_err(device("reading axis count"))?;

        arm.set_reference_accelerations(&vec![joint.reference_acceleration; axes])
            .map_err(device("setting reference accelerations"))?;
        for axis in 0..axes {
            arm.set_reference_speed(axis, joint.reference_speed)
                .map_err(device("setting reference speed"))?;
        }

        let encoders = self.read_encoders(arm)?;
        let command = encoders.overlay(posture.as_slice());
        arm.position_move(&command)
            .map_err(device("commanding posture"))?;

        let outcome = wait_until(&self.config.motion, &self.stop, || arm.check_motion_done())
            .map_err(device("polling motion"))?;
        match outcome {
            WaitOutcome::Done => Ok(()),
            WaitOutcome::TimedOut(waited) => Err(failed(format!(
                "posture not reached after {:.3}s",
                waited.as_secs_f64()
            ))),
            WaitOutcome::Stopped => Err(failed("stopped while moving to posture")),
        }
    }

    fn read_encoders<J: JointInterface>(&self, arm: &mut J) -> Result<JointVector> {
        let settings = &self.config.calibration;
        for attempt in 0..settings.encoder_attempts.max(1) {
            if let Some(encoders) = arm.encoders().map_err(device("reading encoders"))? {
                debug!(attempt, "encoders available");
                return Ok(encoders);
            }
            if self.stop.sleep(settings.encoder_interval) {
                return Err(failed("stopped while waiting for encoders"));
            }
        }
        Err(failed(format!(
            "encoders unavailable after {} attempts",
            settings.encoder_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::geometry::{NoteIndex, Pose};
    use crate::sim::{SimArm, SimEvent};

    fn test_config() -> Config {
        let mut config = Config::builtin().unwrap();
        config.calibration.sample_interval = Duration::from_millis(1);
        config.calibration.encoder_interval = Duration::from_millis(1);
        config.calibration.encoder_attempts = 5;
        config.motion.poll_interval = Duration::from_millis(1);
        config.motion.timeout = Duration::from_millis(50);
        config
    }

    #[test]
    fn test_cartesian_bootstrap_captures_live_pose() {
        let config = test_config();
        let arm = SimArm::with_pose(Pose::new([-0.3, -0.1, 0.2], [0.0, 0.0, 1.0, 3.0]));
        let log = arm.clone();
        let mut session = CartesianSession::open(arm, config.trajectory_time).unwrap();
        let calibration = Bootstrap::new(&config, StopToken::new())
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap();

        assert_eq!(calibration.home().pose().position, [-0.3, -0.1, 0.2]);
        assert_eq!(calibration.press_height(), 0.16);
        let [_, y] = calibration.note_table().position_for(NoteIndex::C);
        assert!((y - (-0.1 - 0.0675)).abs() < 1e-12);

        let dof = log.dof();
        assert_eq!(&dof[..3], &[false, false, false]);
        assert!(dof[3..].iter().all(|d| *d));
    }

    #[test]
    fn test_single_sample_captures_still_arm() {
        let mut config = test_config();
        config.calibration.samples = 1;
        let mut session = CartesianSession::open(SimArm::new(), 1.0).unwrap();
        let calibration = Bootstrap::new(&config, StopToken::new())
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap();
        assert_eq!(calibration.home().pose().position, [-0.3, -0.1, 0.2]);
    }

    #[test]
    fn test_single_sample_still_rejects_moving_arm() {
        let mut config = test_config();
        config.calibration.samples = 1;
        let arm = SimArm::new();
        arm.make_pose_unstable();
        let mut session = CartesianSession::open(arm, 1.0).unwrap();
        let err = Bootstrap::new(&config, StopToken::new())
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap_err();
        assert!(err.to_string().contains("within 1 samples"), "{}", err);
    }

    #[test]
    fn test_unstable_pose_fails_calibration() {
        let config = test_config();
        let arm = SimArm::new();
        arm.make_pose_unstable();
        let mut session = CartesianSession::open(arm, 1.0).unwrap();
        let err = Bootstrap::new(&config, StopToken::new())
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap_err();
        assert!(matches!(err, StrikeError::CalibrationFailed { .. }));
        assert!(err.to_string().contains("did not stabilize"), "{}", err);
    }

    #[test]
    fn test_table_above_home_fails_calibration() {
        let config = test_config();
        let arm = SimArm::with_pose(Pose::new([-0.3, -0.1, 0.1], [0.0, 0.0, 1.0, 3.0]));
        let mut session = CartesianSession::open(arm, 1.0).unwrap();
        let err = Bootstrap::new(&config, StopToken::new())
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap_err();
        assert!(err.to_string().contains("not below home"), "{}", err);
    }

    #[test]
    fn test_stop_before_line_up_fails_calibration() {
        let config = test_config();
        let stop = StopToken::new();
        stop.handle().stop();
        let mut session = CartesianSession::open(SimArm::new(), 1.0).unwrap();
        let err = Bootstrap::new(&config, stop)
            .calibrate_cartesian(&mut session, &mut AutoConfirm)
            .unwrap_err();
        assert!(matches!(err, StrikeError::CalibrationFailed { .. }));
    }

    #[test]
    fn test_joint_bootstrap_moves_to_reference() {
        let config = test_config();
        let mut arm = SimArm::new();
        let calibration = Bootstrap::new(&config, StopToken::new())
            .calibrate_joint(&mut arm)
            .unwrap();
        assert_eq!(&calibration.postures().reference().0, &arm.joints().0);

        let events = arm.events();
        assert!(events.contains(&SimEvent::ReferenceSpeed(15, 10.0)));
        assert!(events.contains(&SimEvent::ReferenceAcceleration(0, 50.0)));
        assert_eq!(events.last(), Some(&SimEvent::MotionDone));
    }

    #[test]
    fn test_missing_encoders_fail_calibration() {
        let config = test_config();
        let mut arm = SimArm::new();
        arm.delay_encoders(None);
        let err = Bootstrap::new(&config, StopToken::new())
            .calibrate_joint(&mut arm)
            .unwrap_err();
        assert!(err.to_string().contains("encoders unavailable"), "{}", err);
    }

    #[test]
    fn test_park_keeps_unlisted_axes_from_encoders() {
        let mut config = test_config();
        config.park_posture = Some(JointVector(vec![0.0, 25.0]));
        let mut left = SimArm::new();
        Bootstrap::new(&config, StopToken::new())
            .park(&mut left)
            .unwrap();
        let joints = left.joints();
        assert_eq!(joints.0[1], 25.0);
        assert_eq!(joints.len(), 16);
    }

    #[test]
    fn test_stalled_posture_move_times_out() {
        let config = test_config();
        let mut arm = SimArm::new();
        arm.stall_on_dispatch(1);
        let err = Bootstrap::new(&config, StopToken::new())
            .calibrate_joint(&mut arm)
            .unwrap_err();
        assert!(err.to_string().contains("posture not reached"), "{}", err);
    }
}
