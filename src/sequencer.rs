//! # Motion Sequencer
//!
//! Plays a song one note cycle at a time: approach the key, press it, retract.
//!
//! ## Cycle
//! ```text
//! Idle -> Approaching -> Pressing -> Retracting -> Done -> (cursor advances) -> Idle
//!                  \           \            \
//!                   +-----------+------------+--> Faulted { note, phase }
//! ```
//! Joint-space runs report the same states as MovingUp / MovingDown / ReturningUp.
//!
//! Every phase is: confirm (policy) -> resolve target -> dispatch -> wait for motion-done.
//! The next phase is never dispatched before the previous one has been observed complete,
//! and cycles never overlap.
//!
//! ## Faults
//! A timeout or device error leaves the sequencer `Faulted` with the arm at its last
//! commanded target. [`Sequencer::retry`] re-runs the failed phase and finishes the cycle;
//! [`Sequencer::abort_cycle`] drops the cycle and keeps the cursor on the same note.
//!
//! ## Stopping
//! A [`StopHandle`] interrupts any in-flight wait. The backend is halted and the step returns
//! [`StrikeError::Cancelled`]; [`Sequencer::run`] then releases the backend before returning.

use tracing::{debug, error, info, warn};

use crate::actuation::ActuationBackend;
use crate::confirm::ConfirmPolicy;
use crate::error::{Result, StrikeError};
use crate::geometry::NoteIndex;
use crate::resolver::{ActuationMode, MotionPhase, TargetResolver};
use crate::wait::{wait_until, MotionWait, StopHandle, StopToken, WaitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Approaching,
    Pressing,
    Retracting,
    Done,
    Faulted { note: NoteIndex, phase: MotionPhase },
}

impl SequencerState {
    fn for_phase(phase: MotionPhase) -> Self {
        match phase {
            MotionPhase::Approach => SequencerState::Approaching,
            MotionPhase::Press => SequencerState::Pressing,
            MotionPhase::Retract => SequencerState::Retracting,
        }
    }

    /// State name as the given actuation mode calls it.
    pub fn label(&self, mode: ActuationMode) -> &'static str {
        match (self, mode) {
            (SequencerState::Idle, _) => "Idle",
            (SequencerState::Approaching, ActuationMode::Cartesian) => "Approaching",
            (SequencerState::Pressing, ActuationMode::Cartesian) => "Pressing",
            (SequencerState::Retracting, ActuationMode::Cartesian) => "Retracting",
            (SequencerState::Approaching, ActuationMode::Joint) => "MovingUp",
            (SequencerState::Pressing, ActuationMode::Joint) => "MovingDown",
            (SequencerState::Retracting, ActuationMode::Joint) => "ReturningUp",
            (SequencerState::Done, _) => "Done",
            (SequencerState::Faulted { .. }, _) => "Faulted",
        }
    }
}

/// Position in a song. Wraps to the first note after the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceCursor {
    song: Vec<NoteIndex>,
    position: usize,
    passes: usize,
}

impl SequenceCursor {
    pub fn new(song: Vec<NoteIndex>) -> Result<Self> {
        if song.is_empty() {
            return Err(StrikeError::SongError {
                position: 0,
                message: "song has no notes".to_string(),
            });
        }
        Ok(Self {
            song,
            position: 0,
            passes: 0,
        })
    }

    pub fn current(&self) -> NoteIndex {
        self.song[self.position]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.song.len()
    }

    pub fn is_empty(&self) -> bool {
        self.song.is_empty()
    }

    /// Completed passes through the whole song.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Move to the next note. Returns `true` when this wrapped back to the start.
    pub fn advance(&mut self) -> bool {
        self.position += 1;
        if self.position == self.song.len() {
            self.position = 0;
            self.passes += 1;
            true
        } else {
            false
        }
    }
}

/// Outcome of one completed note cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub note: NoteIndex,
    /// Song position that was played.
    pub position: usize,
    /// Song position the cursor points at now.
    pub next_position: usize,
    pub wrapped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub stopped: bool,
}

pub struct Sequencer<R, B, P>
where
    R: TargetResolver,
    B: ActuationBackend<Target = R::Target>,
    P: ConfirmPolicy,
{
    resolver: R,
    backend: B,
    confirm: P,
    cursor: SequenceCursor,
    motion: MotionWait,
    stop: StopToken,
    state: SequencerState,
    resume_from: Option<MotionPhase>,
}

impl<R, B, P> Sequencer<R, B, P>
where
    R: TargetResolver,
    B: ActuationBackend<Target = R::Target>,
    P: ConfirmPolicy,
{
    pub fn new(resolver: R, backend: B, confirm: P, cursor: SequenceCursor, motion: MotionWait) -> Self {
        Self {
            resolver,
            backend,
            confirm,
            cursor,
            motion,
            stop: StopToken::new(),
            state: SequencerState::Idle,
            resume_from: None,
        }
    }

    /// Share a stop token with other parts of the driver (e.g. the bootstrap).
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.handle()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label(self.resolver.mode())
    }

    pub fn cursor(&self) -> &SequenceCursor {
        &self.cursor
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Play one full note cycle for the note under the cursor.
    pub fn step(&mut self) -> Result<CycleReport> {
        if let SequencerState::Faulted { note, phase } = self.state {
            return Err(StrikeError::SequencerFaulted { note, phase });
        }

        let note = self.cursor.current();
        let position = self.cursor.position();
        let mut phase = Some(self.resume_from.take().unwrap_or(MotionPhase::Approach));
        info!(
            %note,
            position,
            mode = %self.resolver.mode(),
            "note cycle"
        );

        while let Some(current) = phase {
            self.run_phase(note, current)?;
            phase = current.next();
        }

        self.state = SequencerState::Done;
        let wrapped = self.cursor.advance();
        self.state = SequencerState::Idle;

        Ok(CycleReport {
            note,
            position,
            next_position: self.cursor.position(),
            wrapped,
        })
    }

    /// Clear a fault and finish the interrupted cycle, starting with the failed phase.
    pub fn retry(&mut self) -> Result<CycleReport> {
        match self.state {
            SequencerState::Faulted { note, phase } => {
                info!(%note, ?phase, "retrying faulted phase");
                self.state = SequencerState::Idle;
                self.resume_from = Some(phase);
                self.step()
            }
            _ => self.step(),
        }
    }

    /// Drop the current cycle. The cursor stays on the same note.
    pub fn abort_cycle(&mut self) {
        if let SequencerState::Faulted { note, phase } = self.state {
            warn!(%note, ?phase, "aborting faulted cycle");
        }
        self.state = SequencerState::Idle;
        self.resume_from = None;
    }

    /// Step until `cycles` cycles are done (forever when `None`) or a stop is requested.
    pub fn run(&mut self, cycles: Option<usize>) -> Result<RunSummary> {
        let mut completed = 0;
        while cycles.map_or(true, |limit| completed < limit) {
            if self.stop.is_stopped() {
                break;
            }
            match self.step() {
                Ok(_) => completed += 1,
                Err(StrikeError::Cancelled { note, phase }) => {
                    info!(%note, ?phase, completed, "stopped");
                    self.release_logged();
                    return Ok(RunSummary {
                        cycles: completed,
                        stopped: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        let stopped = self.stop.is_stopped();
        if stopped {
            self.release_logged();
        }
        Ok(RunSummary {
            cycles: completed,
            stopped,
        })
    }

    /// Halt and release the backend, returning any context-restore failure.
    pub fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.backend.halt() {
            warn!(error = %e, "halt failed during shutdown");
        }
        self.backend.release()
    }

    fn run_phase(&mut self, note: NoteIndex, phase: MotionPhase) -> Result<()> {
        self.state = SequencerState::for_phase(phase);

        let prompt = format!("{} {}.", self.state.label(self.resolver.mode()), note);
        match self.confirm.await_continue(&prompt, &self.stop) {
            Ok(true) => {}
            Ok(false) => return Err(self.cancel(note, phase)),
            Err(e) => return Err(self.fault(note, phase, e)),
        }

        let target = self.resolver.target_for(note, phase);
        debug!(%note, ?phase, ?target, "dispatching");
        if let Err(e) = self.backend.dispatch(&target) {
            return Err(self.fault(note, phase, e));
        }

        let backend = &mut self.backend;
        match wait_until(&self.motion, &self.stop, || backend.motion_done()) {
            Ok(WaitOutcome::Done) => {
                debug!(%note, ?phase, "motion done");
                if let Err(e) = self.backend.settled(&target) {
                    warn!(error = %e, "could not read settled pose");
                }
                Ok(())
            }
            Ok(WaitOutcome::TimedOut(waited)) => Err(self.fault(
                note,
                phase,
                StrikeError::ActuationTimeout {
                    note,
                    phase,
                    waited,
                },
            )),
            Ok(WaitOutcome::Stopped) => Err(self.cancel(note, phase)),
            Err(e) => Err(self.fault(note, phase, e)),
        }
    }

    fn fault(&mut self, note: NoteIndex, phase: MotionPhase, err: StrikeError) -> StrikeError {
        error!(%note, ?phase, error = %err, "phase failed; holding position");
        self.state = SequencerState::Faulted { note, phase };
        self.resume_from = Some(phase);
        err
    }

    fn cancel(&mut self, note: NoteIndex, phase: MotionPhase) -> StrikeError {
        if let Err(e) = self.backend.halt() {
            warn!(error = %e, "halt failed after stop request");
        }
        self.state = SequencerState::Idle;
        self.resume_from = None;
        StrikeError::Cancelled { note, phase }
    }

    fn release_logged(&mut self) {
        if let Err(e) = self.backend.release() {
            warn!(error = %e, "release failed");
        }
    }
}
