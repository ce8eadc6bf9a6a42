use std::{hint, time::Instant};

/// Busy-waits until `deadline`. Sleeping is too coarse for the few
/// milliseconds a frame handoff needs.
pub fn spin_until(deadline: Instant) -> Instant {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return now;
        }
        hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn returns_at_or_after_the_deadline() {
        let deadline = Instant::now() + Duration::from_millis(2);
        assert!(spin_until(deadline) >= deadline);
    }

    #[test]
    fn past_deadline_returns_immediately() {
        let before = Instant::now();
        spin_until(before);
        assert!(before.elapsed() < Duration::from_millis(50));
    }
}
