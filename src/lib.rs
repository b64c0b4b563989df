pub mod actuation;
pub mod calibration;
pub mod config;
pub mod confirm;
pub mod error;
pub mod geometry;
pub mod resolver;
pub mod sequencer;
pub mod sim;
pub mod song;
pub mod wait;

pub use actuation::{
    ActuationBackend, CartesianEvent, CartesianInterface, CartesianSession, JointBackend,
    JointInterface, TrackingStatus,
};
pub use calibration::{Bootstrap, CalibrationSettings, CartesianCalibration, JointCalibration};
pub use config::Config;
pub use confirm::{confirm_channel, AutoConfirm, ChannelConfirm, ConfirmPolicy, LineConfirm};
pub use error::*;
pub use geometry::{HomePosition, KeyGeometry, NoteIndex, NoteTable, Pose};
pub use resolver::{
    ActuationMode, CartesianResolver, JointResolver, JointVector, MotionPhase, TargetResolver,
};
pub use sequencer::{CycleReport, RunSummary, SequenceCursor, Sequencer, SequencerState};
pub use song::parse_song;
pub use wait::{MotionWait, StopHandle, StopToken};

/// Run the full Cartesian bootstrap and return a sequencer ready to play `config.song`.
///
/// In order: park the `idle` arm (when a park posture is configured), put the `acting` arm in
/// its reference posture, open a session on `iface`, register the motion checkpoint, then
/// capture home. `acting` and `iface` drive the same limb through its joint board and its
/// Cartesian controller.
///
/// The session stays owned by the sequencer; dropping it restores the controller context.
pub fn cartesian_sequencer<C, I, A, P>(
    config: &Config,
    idle: &mut I,
    acting: &mut A,
    iface: C,
    mut confirm: P,
    stop: StopToken,
) -> Result<Sequencer<CartesianResolver, CartesianSession<C>, P>>
where
    C: CartesianInterface,
    I: JointInterface,
    A: JointInterface,
    P: ConfirmPolicy,
{
    let bootstrap = Bootstrap::new(config, stop.clone());
    bootstrap.park(idle)?;
    bootstrap.pose_acting_arm(acting)?;

    let mut session = CartesianSession::open(iface, config.trajectory_time)?;
    if let Some(checkpoint) = config.motion_checkpoint {
        session.watch_checkpoint(checkpoint)?;
    }
    let calibration = bootstrap.calibrate_cartesian(&mut session, &mut confirm)?;
    let cursor = SequenceCursor::new(config.song.clone())?;
    Ok(Sequencer::new(
        CartesianResolver::new(&calibration),
        session,
        confirm,
        cursor,
        config.motion,
    )
    .with_stop_token(stop))
}

/// Move to the reference posture and return a joint-space sequencer for `config.song`.
pub fn joint_sequencer<J, P>(
    config: &Config,
    mut iface: J,
    confirm: P,
    stop: StopToken,
) -> Result<Sequencer<JointResolver, JointBackend<J>, P>>
where
    J: JointInterface,
    P: ConfirmPolicy,
{
    let calibration = Bootstrap::new(config, stop.clone()).calibrate_joint(&mut iface)?;
    let cursor = SequenceCursor::new(config.song.clone())?;
    Ok(Sequencer::new(
        JointResolver::new(&calibration),
        JointBackend::new(iface),
        confirm,
        cursor,
        config.motion,
    )
    .with_stop_token(stop))
}
