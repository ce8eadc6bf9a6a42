pub mod deadline;
mod pacing_gate;

use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::SyncError;

pub use pacing_gate::{GateWait, PacingGate, WaitOutcome};

/// Consumer side of the shared manual-reset event.
pub trait FrameSignal {
    /// Lets the target present.
    fn go(&mut self) -> Result<(), SyncError>;

    /// Makes the target's next present wait.
    fn stop(&mut self) -> Result<(), SyncError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running { since: Instant },
}

/// Opens a short window after each consumer present in which the target may
/// present too, so both sides run at the headset's rate.
pub struct FrameSynchronizer<S: FrameSignal> {
    signal: S,
    stop_after: Duration,
    phase: Phase,
}

impl<S: FrameSignal> FrameSynchronizer<S> {
    pub fn new(signal: S, stop_after: Duration) -> Self {
        Self {
            signal,
            stop_after,
            phase: Phase::Stopped,
        }
    }

    pub fn signal(&self) -> &S {
        &self.signal
    }

    /// Call right after presenting.
    pub fn after_present(&mut self, now: Instant) -> Result<(), SyncError> {
        self.signal.go()?;
        self.phase = Phase::Running { since: now };
        Ok(())
    }

    /// Spins out the rest of the window, then stops the target. Does nothing
    /// if no window is open.
    pub fn close_window(&mut self) -> Result<Duration, SyncError> {
        let Phase::Running { since } = self.phase else {
            return Ok(Duration::ZERO);
        };
        let ended = deadline::spin_until(since + self.stop_after);
        self.signal.stop()?;
        self.phase = Phase::Stopped;
        let open_for = ended - since;
        trace!("window open for {:?}", open_for);
        Ok(open_for)
    }

    /// Leaves the event signalled so a target that outlives us is never held.
    pub fn release(&mut self) -> Result<(), SyncError> {
        self.phase = Phase::Stopped;
        self.signal.go()
    }
}
