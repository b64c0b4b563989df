//! Integration tests for keystrike
//!
//! Drives the full bootstrap -> sequencer path against the simulated arm.

use std::io::{Cursor, Write};
use std::time::Duration;

use keystrike::sim::{SimArm, SimEvent};
use keystrike::{
    cartesian_sequencer, joint_sequencer, AutoConfirm, Config, LineConfirm, MotionPhase, NoteIndex,
    Pose, RunSummary, StopToken, StrikeError,
};

fn fast_config() -> Config {
    let mut config = Config::builtin().unwrap();
    config.motion.poll_interval = Duration::from_millis(1);
    config.motion.timeout = Duration::from_millis(100);
    config.calibration.sample_interval = Duration::from_millis(1);
    config.calibration.encoder_interval = Duration::from_millis(1);
    config
}

fn go_to_poses(events: &[SimEvent]) -> Vec<Pose> {
    events
        .iter()
        .filter_map(|e| match e {
            SimEvent::GoToPose(pose) => Some(*pose),
            _ => None,
        })
        .collect()
}

#[test]
fn test_default_song_plays_once_around() {
    let config = fast_config();
    let arm = SimArm::new();
    arm.set_polls_per_motion(1);
    let log = arm.clone();

    let mut sequencer = cartesian_sequencer(
        &config,
        &mut SimArm::new(),
        &mut arm.clone(),
        arm,
        AutoConfirm,
        StopToken::new(),
    )
    .unwrap();
    let summary = sequencer.run(Some(7)).unwrap();
    assert_eq!(summary, RunSummary { cycles: 7, stopped: false });
    assert_eq!(sequencer.cursor().position(), 0);
    sequencer.shutdown().unwrap();

    let poses = go_to_poses(&log.events());
    assert_eq!(poses.len(), 21);

    // A: one white key right of G from home F
    let a = poses[0].position;
    assert!((a[0] - -0.3).abs() < 1e-12);
    assert!((a[1] - -0.055).abs() < 1e-12);
    assert_eq!(a[2], 0.2);
    assert_eq!(poses[1].position[2], 0.16);

    // every target keeps the captured orientation
    let home = SimArm::new().pose();
    assert!(poses.iter().all(|p| p.orientation == home.orientation));

    let events = log.events();
    assert_eq!(events.last(), Some(&SimEvent::RestoreContext(1)));
    let checkpoints = events
        .iter()
        .filter(|e| matches!(e, SimEvent::Checkpoint(_)))
        .count();
    assert_eq!(checkpoints, 21);
}

#[test]
fn test_bootstrap_parks_and_poses_before_opening_session() {
    let config = fast_config();
    let idle = SimArm::new();
    let acting = SimArm::new();
    let idle_log = idle.clone();
    let acting_log = acting.clone();

    let _sequencer = cartesian_sequencer(
        &config,
        &mut idle.clone(),
        &mut acting.clone(),
        acting,
        AutoConfirm,
        StopToken::new(),
    )
    .unwrap();

    let parked: Vec<_> = idle_log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::PositionMove(target) => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(parked.len(), 1);
    let park = config.park_posture.as_ref().unwrap();
    assert_eq!(&parked[0].as_slice()[..park.len()], park.as_slice());
    assert!(!idle_log
        .events()
        .iter()
        .any(|e| matches!(e, SimEvent::StoreContext(_))));

    let events = acting_log.events();
    let posed = events
        .iter()
        .position(|e| matches!(e, SimEvent::PositionMove(_)))
        .unwrap();
    let stored = events
        .iter()
        .position(|e| *e == SimEvent::StoreContext(1))
        .unwrap();
    assert!(posed < stored);
    let reference = config.joint.postures.reference();
    match &events[posed] {
        SimEvent::PositionMove(target) => {
            assert_eq!(&target.as_slice()[..reference.len()], reference.as_slice())
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_stop_during_endless_run_restores_context_once() {
    let config = fast_config();
    let arm = SimArm::new();
    arm.set_polls_per_motion(1);
    let log = arm.clone();
    let stop = StopToken::new();
    let handle = stop.handle();

    let mut sequencer = cartesian_sequencer(
        &config,
        &mut SimArm::new(),
        &mut arm.clone(),
        arm,
        AutoConfirm,
        stop,
    )
    .unwrap();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        handle.stop();
    });
    let summary = sequencer.run(None).unwrap();
    stopper.join().unwrap();
    assert!(summary.stopped);
    sequencer.shutdown().unwrap();

    let events = log.events();
    assert_eq!(events.last(), Some(&SimEvent::RestoreContext(1)));
    let restores = events
        .iter()
        .filter(|e| matches!(e, SimEvent::RestoreContext(_)))
        .count();
    assert_eq!(restores, 1);
    let stops_after_restore = events
        .iter()
        .skip_while(|e| !matches!(e, SimEvent::RestoreContext(_)))
        .filter(|e| **e == SimEvent::StopControl)
        .count();
    assert_eq!(stops_after_restore, 0);
}

#[test]
fn test_torso_is_disabled_during_calibration() {
    let config = fast_config();
    let arm = SimArm::new();
    let log = arm.clone();
    let _sequencer = cartesian_sequencer(
        &config,
        &mut SimArm::new(),
        &mut arm.clone(),
        arm,
        AutoConfirm,
        StopToken::new(),
    )
    .unwrap();

    let dof = log.dof();
    assert_eq!(&dof[..3], &[false, false, false]);
    assert!(dof[3..].iter().all(|enabled| *enabled));
}

#[test]
fn test_table_above_home_refuses_to_start() {
    let mut config = fast_config();
    config.table_height = 0.25;
    let arm = SimArm::new();
    let log = arm.clone();

    let err = cartesian_sequencer(
        &config,
        &mut SimArm::new(),
        &mut arm.clone(),
        arm,
        AutoConfirm,
        StopToken::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, StrikeError::CalibrationFailed { .. }));
    assert!(go_to_poses(&log.events()).is_empty());
    // the failed bootstrap still gave the controller context back
    assert_eq!(log.events().last(), Some(&SimEvent::RestoreContext(1)));
}

#[test]
fn test_stalled_motion_faults_and_holds() {
    let config = fast_config();
    let arm = SimArm::new();
    arm.set_polls_per_motion(0);
    // the reference posture move is the first dispatch on this limb
    arm.stall_on_dispatch(4);
    let log = arm.clone();

    let mut sequencer = cartesian_sequencer(
        &config,
        &mut SimArm::new(),
        &mut arm.clone(),
        arm,
        AutoConfirm,
        StopToken::new(),
    )
    .unwrap();
    let err = sequencer.run(None).unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("retracting A"), "{err}");
    assert_eq!(sequencer.state_label(), "Faulted");
    assert_eq!(go_to_poses(&log.events()).len(), 3);
}

#[test]
fn test_joint_mode_plays_requested_song() {
    let mut config = fast_config();
    config.song = keystrike::parse_song("C# F#").unwrap();
    let arm = SimArm::new();
    arm.set_polls_per_motion(1);
    let log = arm.clone();

    let mut sequencer = joint_sequencer(&config, arm, AutoConfirm, StopToken::new()).unwrap();
    let summary = sequencer.run(Some(2)).unwrap();
    assert_eq!(summary.cycles, 2);

    let moves: Vec<_> = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::PositionMove(_)))
        .collect();
    // reference posture plus three per note
    assert_eq!(moves.len(), 7);
    assert_eq!(sequencer.cursor().current(), NoteIndex::C_SHARP);
}

#[test]
fn test_interactive_run_stops_at_end_of_input() {
    let config = fast_config();
    let arm = SimArm::new();
    arm.set_polls_per_motion(0);
    let log = arm.clone();

    // one line for the home line-up, then four moves
    let input = Cursor::new(b"\n\n\n\n\n".to_vec());
    let mut output = Vec::new();
    {
        let confirm = LineConfirm::new(input, &mut output);
        let mut sequencer = cartesian_sequencer(
            &config,
            &mut SimArm::new(),
            &mut arm.clone(),
            arm,
            confirm,
            StopToken::new(),
        )
        .unwrap();
        assert_eq!(sequencer.step().unwrap().note, NoteIndex::A);
        let err = sequencer.step().unwrap_err();
        assert!(matches!(
            err,
            StrikeError::Cancelled {
                note: NoteIndex::B,
                phase: MotionPhase::Press
            }
        ));
    }

    let transcript = String::from_utf8(output).unwrap();
    assert!(transcript.starts_with("Line the middle finger up with the home key. Continue?"));
    assert!(transcript.contains("Approaching A. Continue?"));
    assert_eq!(go_to_poses(&log.events()).len(), 4);
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        include_str!("../config/icub.yaml").replace("song: \"A B C D E F G\"", "song: [0, 12, 25]")
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.song, vec![NoteIndex::C, NoteIndex::C, NoteIndex::C_SHARP]);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, StrikeError::Io(_)));
}
