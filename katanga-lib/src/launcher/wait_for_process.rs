use std::{
    task::Poll,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{config::LaunchSettings, error::LaunchError, process::ProcessControl};

/// Waits for a process that something else starts: a grace period first, then
/// a lookup by name every interval. Never blocks; the caller polls it.
#[derive(Debug)]
pub struct WaitForProcess {
    exe_name: String,
    next_check: Instant,
    interval: Duration,
    give_up_at: Option<Instant>,
    cancel: CancellationToken,
}

impl WaitForProcess {
    pub fn new(
        exe_name: String,
        started: Instant,
        settings: &LaunchSettings,
        cancel: CancellationToken,
    ) -> Self {
        let first_check = started + settings.grace();
        debug!(
            "waiting {:?} before looking for {}",
            settings.grace(),
            exe_name
        );
        Self {
            exe_name,
            next_check: first_check,
            interval: settings.poll_interval(),
            give_up_at: settings.wait_timeout().map(|x| first_check + x),
            cancel,
        }
    }

    pub fn next_check(&self) -> Instant {
        self.next_check
    }

    pub fn poll(
        &mut self,
        now: Instant,
        control: &impl ProcessControl,
    ) -> Poll<Result<u32, LaunchError>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Err(LaunchError::WaitCancelled(self.exe_name.clone())));
        }
        if now < self.next_check {
            return Poll::Pending;
        }
        if let Some(pid) = control.find_process_id(&self.exe_name) {
            info!("found {} as {}", self.exe_name, pid);
            return Poll::Ready(Ok(pid));
        }
        if self.give_up_at.is_some_and(|x| now >= x) {
            return Poll::Ready(Err(LaunchError::WaitTimedOut(self.exe_name.clone())));
        }
        self.next_check = now + self.interval;
        Poll::Pending
    }
}
