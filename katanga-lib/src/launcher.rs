mod wait_for_process;

use std::{mem, path::Path, task::Poll, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::LaunchSettings,
    error::LaunchError,
    launch_params::{LaunchParams, LaunchVariant},
    process::{ProcessControl, TargetProcess},
};

pub use wait_for_process::WaitForProcess;

#[derive(Debug)]
pub enum Launched {
    Process(TargetProcess),
    Slideshow,
}

#[derive(Debug)]
enum State {
    Start,
    Waiting(WaitForProcess),
    Finished,
}

/// Starts the game the way its launch variant asks for. Driven by `poll`
/// until it yields the target process.
#[derive(Debug)]
pub struct Launcher {
    params: LaunchParams,
    settings: LaunchSettings,
    cancel: CancellationToken,
    state: State,
}

fn require_file(path: &Path, err: impl FnOnce() -> LaunchError) -> Result<(), LaunchError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(err())
    }
}

impl Launcher {
    pub fn new(params: LaunchParams, settings: LaunchSettings, cancel: CancellationToken) -> Self {
        Self {
            params,
            settings,
            cancel,
            state: State::Start,
        }
    }

    pub fn params(&self) -> &LaunchParams {
        &self.params
    }

    /// When polling again can make progress.
    pub fn next_deadline(&self, now: Instant) -> Instant {
        match &self.state {
            State::Waiting(wait) => wait.next_check(),
            State::Start | State::Finished => now,
        }
    }

    fn wait_for_name(&self) -> Result<String, LaunchError> {
        self.params
            .wait_for()
            .clone()
            .ok_or(LaunchError::MissingWaitFor)
    }

    fn start(
        &mut self,
        now: Instant,
        control: &mut impl ProcessControl,
    ) -> Result<Option<Launched>, LaunchError> {
        let params = &self.params;
        let variant = *params.variant();
        match variant {
            LaunchVariant::SlideshowStub => {
                info!("no game, slideshow only");
                Ok(Some(Launched::Slideshow))
            }
            LaunchVariant::SuspendedLaunch => {
                let exe = params.game_path().as_deref().ok_or(LaunchError::NoGame)?;
                require_file(exe, || LaunchError::GameNotFound(exe.to_owned()))?;
                let working_dir = params.working_dir().unwrap_or(Path::new("."));
                info!("launching {} suspended", exe.display());
                let child = control.create_suspended(exe, params.args(), working_dir)?;
                let bitness = control.bitness(child.pid)?;
                info!("created {} ({})", child.pid, bitness);
                Ok(Some(Launched::Process(TargetProcess::suspended(
                    child,
                    bitness,
                    self.wait_for_name()?,
                ))))
            }
            LaunchVariant::DeferredWait => {
                if let Some(exe) = params.game_path() {
                    require_file(exe, || LaunchError::GameNotFound(exe.to_owned()))?;
                    let working_dir = params.working_dir().unwrap_or(Path::new("."));
                    info!("launching {}", exe.display());
                    control.spawn_detached(exe, params.args(), working_dir)?;
                }
                self.begin_wait(now)?;
                Ok(None)
            }
            LaunchVariant::StoreLaunch => {
                let store = params.store().as_ref().ok_or(LaunchError::MissingAppId)?;
                let launcher = &store.launcher;
                require_file(launcher, || {
                    LaunchError::StoreLauncherNotFound(launcher.to_owned())
                })?;
                let args = params.store_args().unwrap_or_default();
                let working_dir = launcher.parent().unwrap_or(Path::new("."));
                info!("asking {} to start {}", launcher.display(), store.app_id);
                control.spawn_detached(launcher, &args, working_dir)?;
                self.begin_wait(now)?;
                Ok(None)
            }
        }
    }

    fn begin_wait(&mut self, now: Instant) -> Result<(), LaunchError> {
        let wait = WaitForProcess::new(
            self.wait_for_name()?,
            now,
            &self.settings,
            self.cancel.clone(),
        );
        self.state = State::Waiting(wait);
        Ok(())
    }

    pub fn poll(
        &mut self,
        now: Instant,
        control: &mut impl ProcessControl,
    ) -> Poll<Result<Launched, LaunchError>> {
        match mem::replace(&mut self.state, State::Finished) {
            State::Start => match self.start(now, control) {
                Ok(Some(launched)) => Poll::Ready(Ok(launched)),
                Ok(None) => Poll::Pending,
                Err(err) => Poll::Ready(Err(err)),
            },
            State::Waiting(mut wait) => match wait.poll(now, control) {
                Poll::Pending => {
                    self.state = State::Waiting(wait);
                    Poll::Pending
                }
                Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                Poll::Ready(Ok(pid)) => Poll::Ready(
                    control
                        .bitness(pid)
                        .map(|bitness| {
                            TargetProcess::running(
                                pid,
                                bitness,
                                self.params.wait_for().clone().unwrap_or_default(),
                                *self.params.variant(),
                            )
                        })
                        .map(Launched::Process),
                ),
            },
            State::Finished => Poll::Pending,
        }
    }
}
