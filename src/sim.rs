//! In-process simulated limb.
//!
//! `SimArm` implements both [`CartesianInterface`] and [`JointInterface`]. Motions complete
//! after a fixed number of `check_motion_done` polls, faults can be injected, and every
//! command is appended to an event log. Clones share state, so a test can keep one clone
//! for inspection while the sequencer owns another.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::actuation::{CartesianEvent, CartesianInterface, ContextId, JointInterface};
use crate::error::{Result, StrikeError};
use crate::geometry::Pose;
use crate::resolver::JointVector;

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    StoreContext(ContextId),
    RestoreContext(ContextId),
    TrajectoryTime(f64),
    SetDof(Vec<bool>),
    GoToPose(Pose),
    PositionMove(JointVector),
    MotionDone,
    Checkpoint(f64),
    StopControl,
    ReferenceSpeed(usize, f64),
    ReferenceAcceleration(usize, f64),
}

#[derive(Debug)]
struct SimState {
    pose: Pose,
    target_pose: Option<Pose>,
    desired: Pose,
    settle_offset: [f64; 3],
    checkpoint: Option<f64>,
    checkpoint_fired: bool,
    pending: Vec<CartesianEvent>,
    joints: JointVector,
    target_joints: Option<JointVector>,
    dof: Vec<bool>,
    polls_per_motion: usize,
    motion_polls: usize,
    remaining_polls: Option<usize>,
    dispatches: usize,
    stall_on_dispatch: Option<usize>,
    stalled: bool,
    unstable_pose: bool,
    pose_reads: usize,
    encoder_delay: Option<usize>,
    fail_restore: bool,
    next_context: ContextId,
    events: Vec<SimEvent>,
}

impl SimState {
    fn begin_motion(&mut self) {
        self.dispatches += 1;
        self.motion_polls = self.polls_per_motion;
        self.checkpoint_fired = false;
        self.remaining_polls = Some(self.polls_per_motion);
        self.stalled = self.stall_on_dispatch == Some(self.dispatches);
    }

    /// Raise the checkpoint event once per Cartesian move when `progress` passes it.
    fn track_progress(&mut self, progress: f64) {
        if self.target_pose.is_none() || self.checkpoint_fired {
            return;
        }
        if let Some(checkpoint) = self.checkpoint {
            if progress >= checkpoint {
                self.checkpoint_fired = true;
                self.pending.push(CartesianEvent::MotionOngoing { checkpoint });
                self.events.push(SimEvent::Checkpoint(checkpoint));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimArm {
    state: Arc<Mutex<SimState>>,
}

impl SimArm {
    /// A 16-axis arm (7 arm joints, 9 hand joints) resting at the rig's usual home.
    pub fn new() -> Self {
        Self::with_pose(Pose::new(
            [-0.3, -0.1, 0.2],
            [0.0, 0.0, 1.0, std::f64::consts::PI],
        ))
    }

    pub fn with_pose(pose: Pose) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pose,
                target_pose: None,
                desired: pose,
                settle_offset: [0.0; 3],
                checkpoint: None,
                checkpoint_fired: false,
                pending: Vec::new(),
                joints: JointVector(vec![0.0; 16]),
                target_joints: None,
                dof: vec![true; 10],
                polls_per_motion: 2,
                motion_polls: 2,
                remaining_polls: None,
                dispatches: 0,
                stall_on_dispatch: None,
                stalled: false,
                unstable_pose: false,
                pose_reads: 0,
                encoder_delay: Some(0),
                fail_restore: false,
                next_context: 1,
                events: Vec::new(),
            })),
        }
    }

    /// Number of `check_motion_done` polls each motion takes to finish.
    pub fn set_polls_per_motion(&self, polls: usize) {
        self.state.lock().polls_per_motion = polls;
    }

    /// Cartesian moves settle this far off the solver's destination.
    pub fn set_settle_offset(&self, offset: [f64; 3]) {
        self.state.lock().settle_offset = offset;
    }

    /// The `n`th dispatched motion (1-based) never completes.
    pub fn stall_on_dispatch(&self, n: usize) {
        self.state.lock().stall_on_dispatch = Some(n);
    }

    /// Resume a stalled motion on the next poll.
    pub fn unstall(&self) {
        let mut state = self.state.lock();
        state.stalled = false;
        state.stall_on_dispatch = None;
    }

    /// Make consecutive pose reads disagree, so the pose never stabilizes.
    pub fn make_pose_unstable(&self) {
        self.state.lock().unstable_pose = true;
    }

    /// Encoders return `None` for the first `reads` reads; `None` means never available.
    pub fn delay_encoders(&self, reads: Option<usize>) {
        self.state.lock().encoder_delay = reads;
    }

    pub fn fail_context_restore(&self) {
        self.state.lock().fail_restore = true;
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    pub fn pose(&self) -> Pose {
        self.state.lock().pose
    }

    pub fn joints(&self) -> JointVector {
        self.state.lock().joints.clone()
    }

    pub fn dof(&self) -> Vec<bool> {
        self.state.lock().dof.clone()
    }

    fn poll(&self) -> bool {
        let mut state = self.state.lock();
        if state.stalled {
            return false;
        }
        match state.remaining_polls {
            None => true,
            Some(0) => {
                state.track_progress(1.0);
                state.remaining_polls = None;
                if let Some(mut pose) = state.target_pose.take() {
                    for (axis, offset) in pose.position.iter_mut().zip(state.settle_offset) {
                        *axis += offset;
                    }
                    state.pose = pose;
                }
                if let Some(joints) = state.target_joints.take() {
                    state.joints = joints;
                }
                state.events.push(SimEvent::MotionDone);
                true
            }
            Some(n) => {
                state.remaining_polls = Some(n - 1);
                let progress = (state.motion_polls - (n - 1)) as f64 / (state.motion_polls + 1) as f64;
                state.track_progress(progress);
                false
            }
        }
    }
}

impl Default for SimArm {
    fn default() -> Self {
        Self::new()
    }
}

impl CartesianInterface for SimArm {
    fn store_context(&mut self) -> Result<ContextId> {
        let mut state = self.state.lock();
        let context = state.next_context;
        state.next_context += 1;
        state.events.push(SimEvent::StoreContext(context));
        Ok(context)
    }

    fn restore_context(&mut self, context: ContextId) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_restore {
            return Err(StrikeError::Device(format!(
                "context {} is unknown to the controller",
                context
            )));
        }
        state.events.push(SimEvent::RestoreContext(context));
        Ok(())
    }

    fn set_trajectory_time(&mut self, seconds: f64) -> Result<()> {
        self.state.lock().events.push(SimEvent::TrajectoryTime(seconds));
        Ok(())
    }

    fn get_dof(&mut self) -> Result<Vec<bool>> {
        Ok(self.state.lock().dof.clone())
    }

    fn set_dof(&mut self, dof: &[bool]) -> Result<Vec<bool>> {
        let mut state = self.state.lock();
        for (slot, wanted) in state.dof.iter_mut().zip(dof) {
            *slot = *wanted;
        }
        state.events.push(SimEvent::SetDof(dof.to_vec()));
        Ok(state.dof.clone())
    }

    fn go_to_pose(&mut self, pose: &Pose) -> Result<()> {
        let mut state = self.state.lock();
        state.target_pose = Some(*pose);
        state.desired = *pose;
        state.begin_motion();
        state.events.push(SimEvent::GoToPose(*pose));
        Ok(())
    }

    fn check_motion_done(&mut self) -> Result<bool> {
        Ok(self.poll())
    }

    fn get_pose(&mut self) -> Result<Pose> {
        let mut state = self.state.lock();
        state.pose_reads += 1;
        let mut pose = state.pose;
        if state.unstable_pose {
            pose.position[2] += 0.01 * (state.pose_reads % 2) as f64;
        }
        Ok(pose)
    }

    fn get_desired(&mut self) -> Result<Pose> {
        Ok(self.state.lock().desired)
    }

    fn register_checkpoint(&mut self, checkpoint: f64) -> Result<()> {
        if !(checkpoint > 0.0 && checkpoint < 1.0) {
            return Err(StrikeError::Device(format!(
                "checkpoint {} outside (0, 1)",
                checkpoint
            )));
        }
        self.state.lock().checkpoint = Some(checkpoint);
        Ok(())
    }

    fn take_events(&mut self) -> Result<Vec<CartesianEvent>> {
        Ok(std::mem::take(&mut self.state.lock().pending))
    }

    fn stop_control(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.remaining_polls = None;
        state.target_pose = None;
        state.events.push(SimEvent::StopControl);
        Ok(())
    }
}

impl JointInterface for SimArm {
    fn axis_count(&mut self) -> Result<usize> {
        Ok(self.state.lock().joints.len())
    }

    fn encoders(&mut self) -> Result<Option<JointVector>> {
        let mut state = self.state.lock();
        match state.encoder_delay {
            None => Ok(None),
            Some(0) => Ok(Some(state.joints.clone())),
            Some(n) => {
                state.encoder_delay = Some(n - 1);
                Ok(None)
            }
        }
    }

    fn set_reference_speed(&mut self, axis: usize, speed: f64) -> Result<()> {
        self.state
            .lock()
            .events
            .push(SimEvent::ReferenceSpeed(axis, speed));
        Ok(())
    }

    fn set_reference_acceleration(&mut self, axis: usize, acceleration: f64) -> Result<()> {
        self.state
            .lock()
            .events
            .push(SimEvent::ReferenceAcceleration(axis, acceleration));
        Ok(())
    }

    fn position_move(&mut self, target: &JointVector) -> Result<()> {
        let mut state = self.state.lock();
        if target.len() != state.joints.len() {
            return Err(StrikeError::Device(format!(
                "position move with {} joints on a {}-axis board",
                target.len(),
                state.joints.len()
            )));
        }
        state.target_joints = Some(target.clone());
        state.begin_motion();
        state.events.push(SimEvent::PositionMove(target.clone()));
        Ok(())
    }

    fn check_motion_done(&mut self) -> Result<bool> {
        Ok(self.poll())
    }
}
