//! Confirmation policies gating each dispatched move.
//!
//! Interactive sessions single-step the arm: nothing moves until someone approves it.
//! Autonomous runs use [`AutoConfirm`]. The sequencer only sees the [`ConfirmPolicy`] trait,
//! so it never touches a terminal.

use std::io::{BufRead, Write};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Result, StrikeError};
use crate::wait::StopToken;

pub trait ConfirmPolicy {
    /// Block until proceeding is approved. Returns `Ok(false)` when a stop was requested
    /// instead.
    fn await_continue(&mut self, prompt: &str, stop: &StopToken) -> Result<bool>;
}

/// Approves everything immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl ConfirmPolicy for AutoConfirm {
    fn await_continue(&mut self, _prompt: &str, stop: &StopToken) -> Result<bool> {
        Ok(!stop.is_stopped())
    }
}

/// Waits for a token on a channel; the other end can be a UI, a test, or another process.
#[derive(Debug)]
pub struct ChannelConfirm {
    approvals: Receiver<()>,
}

/// Create a connected approval sender and [`ChannelConfirm`] policy.
pub fn confirm_channel() -> (Sender<()>, ChannelConfirm) {
    let (tx, rx) = bounded(16);
    (tx, ChannelConfirm { approvals: rx })
}

impl ConfirmPolicy for ChannelConfirm {
    fn await_continue(&mut self, prompt: &str, stop: &StopToken) -> Result<bool> {
        tracing::debug!(prompt, "waiting for approval");
        match stop.recv(&self.approvals) {
            None => Ok(false),
            Some(Ok(())) => Ok(true),
            Some(Err(_)) => Err(StrikeError::Device(
                "confirmation channel closed".to_string(),
            )),
        }
    }
}

/// Line-oriented console prompt: writes the prompt, proceeds on any entered line.
///
/// End of input counts as a stop request.
pub struct LineConfirm<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineConfirm<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> ConfirmPolicy for LineConfirm<R, W> {
    fn await_continue(&mut self, prompt: &str, stop: &StopToken) -> Result<bool> {
        if stop.is_stopped() {
            return Ok(false);
        }
        writeln!(self.output, "{} Continue? [enter]", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line)?;
        Ok(read > 0 && !stop.is_stopped())
    }
}
