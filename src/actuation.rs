//! # Actuation Interfaces
//!
//! Boundary traits for the external robot-control platform, and the backends the
//! sequencer drives through them.
//!
//! ## Interfaces
//! - [`CartesianInterface`] - operational-space controller (pose targets, solver-side IK)
//! - [`JointInterface`] - position-controlled motor board (joint-angle targets)
//!
//! ## Backends
//! [`ActuationBackend`] is what the sequencer sees: dispatch a target, poll for completion,
//! halt, release. [`CartesianSession`] brackets the whole session with a stored controller
//! context and always stops control and restores that context on the way out, including when
//! dropped during unwinding. [`JointBackend`] has no context to latch.
//!
//! ## Tracking
//! The Cartesian controller can raise a "motion ongoing" event once a trajectory passes a
//! checkpoint fraction. After every settled move the session compares the requested pose, the
//! solver's resolved pose and the measured pose as a [`TrackingStatus`].

use tracing::{debug, info, warn};

use crate::error::{Result, StrikeError};
use crate::geometry::Pose;
use crate::resolver::JointVector;

/// Handle of a stored controller context.
pub type ContextId = i32;

/// Asynchronous notifications raised by a Cartesian controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CartesianEvent {
    /// The running trajectory has covered `checkpoint` of its length.
    MotionOngoing { checkpoint: f64 },
}

/// Requested vs. solver-resolved vs. measured pose after a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingStatus {
    pub desired: Pose,
    pub resolved: Pose,
    pub actual: Pose,
    /// Norm of the position difference between resolved and actual, in metres.
    pub position_error: f64,
    /// Norm of the axis-angle difference between resolved and actual, in radians.
    pub orientation_error: f64,
}

impl TrackingStatus {
    pub fn measure(desired: Pose, resolved: Pose, actual: Pose) -> Self {
        let norm = |a: &[f64], b: &[f64]| {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt()
        };
        Self {
            desired,
            resolved,
            actual,
            position_error: norm(&resolved.position, &actual.position),
            orientation_error: norm(&resolved.orientation, &actual.orientation),
        }
    }
}

/// Operational-space controller of one limb.
pub trait CartesianInterface {
    fn store_context(&mut self) -> Result<ContextId>;
    fn restore_context(&mut self, context: ContextId) -> Result<()>;
    fn set_trajectory_time(&mut self, seconds: f64) -> Result<()>;
    fn get_dof(&mut self) -> Result<Vec<bool>>;
    /// Request which degrees of freedom the solver may use; returns the applied set.
    fn set_dof(&mut self, dof: &[bool]) -> Result<Vec<bool>>;
    /// Dispatch a pose target. Returns once the request is accepted, not when reached.
    fn go_to_pose(&mut self, pose: &Pose) -> Result<()>;
    fn check_motion_done(&mut self) -> Result<bool>;
    fn get_pose(&mut self) -> Result<Pose>;
    /// Final destination of the current move as found by the solver. Differs slightly from
    /// the requested pose according to the solver tolerances.
    fn get_desired(&mut self) -> Result<Pose>;
    /// Ask for a [`CartesianEvent::MotionOngoing`] each time a trajectory reaches `checkpoint`
    /// (a fraction in `(0, 1)`).
    fn register_checkpoint(&mut self, checkpoint: f64) -> Result<()>;
    /// Events raised since the last call.
    fn take_events(&mut self) -> Result<Vec<CartesianEvent>>;
    fn stop_control(&mut self) -> Result<()>;
}

/// Position-controlled joint board of one limb.
pub trait JointInterface {
    fn axis_count(&mut self) -> Result<usize>;
    /// Current joint readings; `None` until the board has published them.
    fn encoders(&mut self) -> Result<Option<JointVector>>;
    fn set_reference_speed(&mut self, axis: usize, speed: f64) -> Result<()>;
    fn set_reference_acceleration(&mut self, axis: usize, acceleration: f64) -> Result<()>;

    fn set_reference_accelerations(&mut self, accelerations: &[f64]) -> Result<()> {
        for (axis, acceleration) in accelerations.iter().enumerate() {
            self.set_reference_acceleration(axis, *acceleration)?;
        }
        Ok(())
    }

    fn position_move(&mut self, target: &JointVector) -> Result<()>;
    fn check_motion_done(&mut self) -> Result<bool>;
}

/// What the sequencer needs to move the arm to resolved targets.
pub trait ActuationBackend {
    type Target;

    fn dispatch(&mut self, target: &Self::Target) -> Result<()>;

    fn motion_done(&mut self) -> Result<bool>;

    /// Called once motion completion has been observed for `target`.
    fn settled(&mut self, _target: &Self::Target) -> Result<()> {
        Ok(())
    }

    /// Stop any in-flight motion and hold position.
    fn halt(&mut self) -> Result<()>;

    /// Give control back. Idempotent.
    fn release(&mut self) -> Result<()>;
}

/// Scoped acquisition of a Cartesian controller.
///
/// Opening stores the controller context and sets the trajectory time. Releasing (or
/// dropping) stops control before restoring the context.
pub struct CartesianSession<C: CartesianInterface> {
    iface: C,
    context: ContextId,
    released: bool,
    checkpoints_reached: usize,
    last_status: Option<TrackingStatus>,
}

impl<C: CartesianInterface> CartesianSession<C> {
    pub fn open(mut iface: C, trajectory_time: f64) -> Result<Self> {
        let context = iface.store_context()?;
        let mut session = Self {
            iface,
            context,
            released: false,
            checkpoints_reached: 0,
            last_status: None,
        };
        // from here on the context is latched, so a failure must still restore it
        session.iface.set_trajectory_time(trajectory_time)?;
        debug!(context, trajectory_time, "cartesian session opened");
        Ok(session)
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn interface(&mut self) -> &mut C {
        &mut self.iface
    }

    /// Report "motion ongoing" whenever a trajectory passes `checkpoint`.
    pub fn watch_checkpoint(&mut self, checkpoint: f64) -> Result<()> {
        self.iface.register_checkpoint(checkpoint)?;
        debug!(checkpoint, "motion checkpoint registered");
        Ok(())
    }

    /// Number of checkpoint events seen so far.
    pub fn checkpoints_reached(&self) -> usize {
        self.checkpoints_reached
    }

    /// Tracking status of the most recent settled move.
    pub fn tracking_status(&self) -> Option<&TrackingStatus> {
        self.last_status.as_ref()
    }

    fn drain_events(&mut self) -> Result<()> {
        for event in self.iface.take_events()? {
            match event {
                CartesianEvent::MotionOngoing { checkpoint } => {
                    self.checkpoints_reached += 1;
                    info!("{:.0}% of trajectory attained", checkpoint * 100.0);
                }
            }
        }
        Ok(())
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Err(e) = self.iface.stop_control() {
            warn!(error = %e, "stop_control failed during release");
        }
        self.iface
            .restore_context(self.context)
            .map_err(|e| StrikeError::ContextRestoreFailed {
                context: self.context,
                message: e.to_string(),
            })?;
        debug!(context = self.context, "controller context restored");
        Ok(())
    }
}

impl<C: CartesianInterface> ActuationBackend for CartesianSession<C> {
    type Target = Pose;

    fn dispatch(&mut self, target: &Pose) -> Result<()> {
        self.iface.go_to_pose(target)
    }

    fn motion_done(&mut self) -> Result<bool> {
        let done = self.iface.check_motion_done()?;
        self.drain_events()?;
        Ok(done)
    }

    fn settled(&mut self, target: &Pose) -> Result<()> {
        let actual = self.iface.get_pose()?;
        let resolved = self.iface.get_desired()?;
        let status = TrackingStatus::measure(*target, resolved, actual);
        debug!(
            desired = ?status.desired.position,
            resolved = ?status.resolved.position,
            actual = ?status.actual.position,
            e_x = status.position_error,
            e_o = status.orientation_error,
            "arm settled"
        );
        self.last_status = Some(status);
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        // a restored context belongs to someone else again
        if self.released {
            return Ok(());
        }
        self.iface.stop_control()
    }

    fn release(&mut self) -> Result<()> {
        self.release_inner()
    }
}

impl<C: CartesianInterface> Drop for CartesianSession<C> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "best-effort context restore failed");
        }
    }
}

/// Joint-space backend. Motions are not interruptible at this level; halting leaves the
/// board on its last commanded posture.
pub struct JointBackend<J: JointInterface> {
    iface: J,
}

impl<J: JointInterface> JointBackend<J> {
    pub fn new(iface: J) -> Self {
        Self { iface }
    }

    pub fn interface(&mut self) -> &mut J {
        &mut self.iface
    }
}

impl<J: JointInterface> ActuationBackend for JointBackend<J> {
    type Target = JointVector;

    fn dispatch(&mut self, target: &JointVector) -> Result<()> {
        self.iface.position_move(target)
    }

    fn motion_done(&mut self) -> Result<bool> {
        self.iface.check_motion_done()
    }

    fn halt(&mut self) -> Result<()> {
        debug!("joint backend holds its last commanded posture");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
