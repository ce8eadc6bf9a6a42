use std::{
    path::Path,
    task::Poll,
    time::{Duration, Instant},
};

use katanga_lib::{
    config::LaunchSettings,
    error::{HookError, LaunchError},
    hooks::{AgentHost, AgentModule},
    launch_params::LaunchParams,
    launcher::{Launched, Launcher},
    process::{ProcessControl, TargetProcess},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Polls the launcher until the target is known. `None` when the user gave
/// up waiting.
pub async fn drive_launcher(
    params: LaunchParams,
    settings: LaunchSettings,
    control: &mut impl ProcessControl,
    cancel: &CancellationToken,
) -> Result<Option<Launched>, LaunchError> {
    let mut launcher = Launcher::new(params, settings, cancel.clone());
    loop {
        let now = Instant::now();
        match launcher.poll(now, control) {
            Poll::Ready(Ok(launched)) => return Ok(Some(launched)),
            Poll::Ready(Err(LaunchError::WaitCancelled(exe_name))) => {
                info!("stopped waiting for {}", exe_name);
                return Ok(None);
            }
            Poll::Ready(Err(err)) => return Err(err),
            Poll::Pending => {}
        }
        let deadline = tokio::time::Instant::from_std(launcher.next_deadline(now));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
}

/// Loads the agent while its initialization runs in the target, without
/// holding up the runtime. `None` when cancelled first.
pub async fn drive_agent_load(
    host: &mut impl AgentHost,
    process: &TargetProcess,
    path: &Path,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<AgentModule>, HookError> {
    info!(
        "loading {} into {} ({})",
        path.display(),
        process.pid(),
        process.bitness()
    );
    host.start_load(process, path)?;
    loop {
        if let Poll::Ready(loaded) = host.poll_load() {
            return loaded.map(Some);
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stopped waiting for the agent in {}", process.pid());
                return Ok(None);
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
