use std::{
    task::Poll,
    time::{Duration, Instant},
};

use tracing::{info, trace};

use crate::{config::ExitWatchSettings, process::ProcessControl};

/// Notices the game exiting by looking its process up by name now and then.
/// Store launches go through a relauncher, so the pid we saw first is not
/// reliable.
#[derive(Debug)]
pub struct ExitWatch {
    exe_name: String,
    next_check: Instant,
    interval: Duration,
}

impl ExitWatch {
    pub fn new(exe_name: String, started: Instant, settings: &ExitWatchSettings) -> Self {
        Self {
            exe_name,
            next_check: started + settings.initial_delay(),
            interval: settings.interval(),
        }
    }

    pub fn exe_name(&self) -> &str {
        &self.exe_name
    }

    pub fn next_check(&self) -> Instant {
        self.next_check
    }

    pub fn poll(&mut self, now: Instant, control: &impl ProcessControl) -> Poll<()> {
        if now < self.next_check {
            return Poll::Pending;
        }
        self.next_check = now + self.interval;
        match control.find_process_id(&self.exe_name) {
            Some(pid) => {
                trace!("{} still running as {}", self.exe_name, pid);
                Poll::Pending
            }
            None => {
                info!("{} has exited", self.exe_name);
                Poll::Ready(())
            }
        }
    }
}
