use std::time::Duration;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateWait {
    Wait(Duration),
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Failed,
}

/// Target side of frame pacing. Each wait is bounded, and after enough
/// misses in a row the gate stops waiting for good, so a consumer that died
/// or stalled costs the game at most a few frames.
#[derive(Debug)]
pub struct PacingGate {
    timeout: Duration,
    relax_after: u32,
    misses: u32,
    relaxed: bool,
}

impl Default for PacingGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(25), 90)
    }
}

impl PacingGate {
    pub fn new(timeout: Duration, relax_after: u32) -> Self {
        Self {
            timeout,
            relax_after,
            misses: 0,
            relaxed: false,
        }
    }

    pub fn next(&self) -> GateWait {
        if self.relaxed {
            GateWait::Skip
        } else {
            GateWait::Wait(self.timeout)
        }
    }

    pub fn record(&mut self, outcome: WaitOutcome) {
        match outcome {
            WaitOutcome::Signaled => self.misses = 0,
            WaitOutcome::TimedOut => {
                self.misses += 1;
                if self.misses >= self.relax_after && !self.relaxed {
                    warn!("consumer stopped pacing, presenting freely");
                    self.relaxed = true;
                }
            }
            WaitOutcome::Failed => {
                warn!("pacing event unusable, presenting freely");
                self.relaxed = true;
            }
        }
    }

    pub fn is_relaxed(&self) -> bool {
        self.relaxed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_are_always_bounded() {
        let gate = PacingGate::new(Duration::from_millis(25), 3);
        assert_eq!(gate.next(), GateWait::Wait(Duration::from_millis(25)));
    }

    #[test]
    fn a_run_of_misses_relaxes_for_good() {
        let mut gate = PacingGate::new(Duration::from_millis(25), 3);
        gate.record(WaitOutcome::TimedOut);
        gate.record(WaitOutcome::TimedOut);
        assert!(!gate.is_relaxed());
        gate.record(WaitOutcome::TimedOut);
        assert_eq!(gate.next(), GateWait::Skip);
        gate.record(WaitOutcome::Signaled);
        assert_eq!(gate.next(), GateWait::Skip);
    }

    #[test]
    fn a_signal_resets_the_miss_count() {
        let mut gate = PacingGate::new(Duration::from_millis(25), 3);
        for _ in 0..10 {
            gate.record(WaitOutcome::TimedOut);
            gate.record(WaitOutcome::TimedOut);
            gate.record(WaitOutcome::Signaled);
        }
        assert!(!gate.is_relaxed());
    }

    #[test]
    fn a_broken_event_relaxes_immediately() {
        let mut gate = PacingGate::default();
        gate.record(WaitOutcome::Failed);
        assert!(gate.is_relaxed());
    }
}
