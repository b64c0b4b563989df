//! Bounded, cancellable waits on external completion predicates.
//!
//! The backends only expose a polled "motion done" flag. Waiting on it sleeps on a stop
//! channel between polls, so a stop request wakes the waiter immediately and every wait
//! ends after `timeout` at the latest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, RecvError, RecvTimeoutError, Sender};

use crate::error::Result;

/// How often to poll and how long to wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for MotionWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(40),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    Done,
    TimedOut(Duration),
    Stopped,
}

/// Receiving side of a cooperative stop. Cloning shares the same stop state.
#[derive(Debug, Clone)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Requests a stop on every clone of the token it came from.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake_tx: Sender<()>,
}

impl StopToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = unbounded();
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn handle(&self) -> StopHandle {
        StopHandle {
            stopped: Arc::clone(&self.stopped),
            wake_tx: self.wake_tx.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until a stop is requested. Returns `true` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.wake_rx.recv_timeout(duration) {
            Ok(()) => {
                // pass the wakeup on to any other sleeping clone
                let _ = self.wake_tx.try_send(());
                true
            }
            // the token owns a sender, so the channel never disconnects
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.is_stopped()
            }
        }
    }
}

impl StopToken {
    /// Block on `rx` until it yields or a stop is requested. `None` means stopped.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Option<std::result::Result<T, RecvError>> {
        if self.is_stopped() {
            return None;
        }
        select! {
            recv(rx) -> msg => Some(msg),
            recv(self.wake_rx) -> _ => {
                let _ = self.wake_tx.try_send(());
                None
            }
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.send(());
    }
}

/// Poll `done` until it reports completion, the timeout elapses, or `stop` fires.
pub fn wait_until<F>(policy: &MotionWait, stop: &StopToken, mut done: F) -> Result<WaitOutcome>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    loop {
        if done()? {
            return Ok(WaitOutcome::Done);
        }
        if stop.is_stopped() {
            return Ok(WaitOutcome::Stopped);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Ok(WaitOutcome::TimedOut(elapsed));
        }
        let remaining = policy.timeout - elapsed;
        if stop.sleep(policy.poll_interval.min(remaining)) {
            return Ok(WaitOutcome::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn quick() -> MotionWait {
        MotionWait {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(30),
        }
    }

    #[test]
    fn test_done_after_a_few_polls() {
        let stop = StopToken::new();
        let mut polls = 0;
        let outcome = wait_until(&quick(), &stop, || {
            polls += 1;
            Ok(polls == 3)
        })
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Done);
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_never_done_times_out() {
        let stop = StopToken::new();
        let started = Instant::now();
        let outcome = wait_until(&quick(), &stop, || Ok(false)).unwrap();
        assert!(matches!(outcome, WaitOutcome::TimedOut(d) if d >= Duration::from_millis(30)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_stop_interrupts_long_poll() {
        let stop = StopToken::new();
        let handle = stop.handle();
        let policy = MotionWait {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        };
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.stop();
        });
        let started = Instant::now();
        let outcome = wait_until(&policy, &stop, || Ok(false)).unwrap();
        stopper.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_is_latched_for_every_clone() {
        let stop = StopToken::new();
        let other = stop.clone();
        stop.handle().stop();
        assert!(stop.sleep(Duration::from_millis(1)));
        assert!(other.sleep(Duration::from_millis(1)));
        assert!(other.is_stopped());
    }

    #[test]
    fn test_predicate_errors_propagate() {
        let stop = StopToken::new();
        let result = wait_until(&quick(), &stop, || {
            Err(crate::StrikeError::Device("encoder bus down".to_string()))
        });
        assert!(result.is_err());
    }
}
