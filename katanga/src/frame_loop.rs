use std::time::{Duration, Instant};

use katanga_lib::{
    error::KatangaError,
    frame_sync::{FrameSignal, FrameSynchronizer},
    liveness::ExitWatch,
    process::ProcessControl,
    setup_lock::{FrameLock, SetupLock},
    surface::{SurfaceBroker, SurfaceSource, SurfaceUpdate, TextureImporter},
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

/// What the consumer screen shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Showing {
    Placeholder,
    Surface { generation: u64, aspect_ratio: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ended {
    Cancelled,
    TargetExited,
}

pub struct FrameLoop<L: SetupLock, S: FrameSignal, I: TextureImporter> {
    lock: L,
    sync: FrameSynchronizer<S>,
    broker: SurfaceBroker<I>,
    showing: Showing,
}

impl<L: SetupLock, S: FrameSignal, I: TextureImporter> FrameLoop<L, S, I> {
    pub fn new(lock: L, sync: FrameSynchronizer<S>, broker: SurfaceBroker<I>) -> Self {
        Self {
            lock,
            sync,
            broker,
            showing: Showing::Placeholder,
        }
    }

    pub fn showing(&self) -> Showing {
        self.showing
    }

    pub fn broker(&self) -> &SurfaceBroker<I> {
        &self.broker
    }

    fn apply(&mut self, update: SurfaceUpdate) {
        self.showing = match update {
            SurfaceUpdate::Placeholder => Showing::Placeholder,
            SurfaceUpdate::Unchanged => match self.broker.current() {
                Some(current) => Showing::Surface {
                    generation: current.generation(),
                    aspect_ratio: current.desc().aspect_ratio(),
                },
                None => Showing::Placeholder,
            },
            SurfaceUpdate::Rebuilt {
                generation,
                aspect_ratio,
                ..
            } => {
                info!("screen aspect ratio {:.3}", aspect_ratio);
                Showing::Surface {
                    generation,
                    aspect_ratio,
                }
            }
        };
    }

    /// One consumer frame: check the surface under the setup lock, present,
    /// then give the target its window.
    pub fn frame(
        &mut self,
        now: Instant,
        source: &mut impl SurfaceSource,
    ) -> Result<Showing, KatangaError> {
        let update = match FrameLock::try_new(&mut self.lock)? {
            Some(guard) => {
                let update = self.broker.tick(source)?;
                guard.unlock()?;
                Some(update)
            }
            None => None,
        };
        match update {
            Some(update) => self.apply(update),
            None => {
                trace!("target is swapping its surface");
                self.showing = Showing::Placeholder;
            }
        }
        self.sync.after_present(now)?;
        self.sync.close_window()?;
        Ok(self.showing)
    }

    /// Drops the imported texture and leaves the target free to run.
    pub fn shutdown(&mut self) {
        self.broker.release();
        self.showing = Showing::Placeholder;
        if let Err(err) = self.sync.release() {
            warn!("{}", err);
        }
    }
}

/// Runs frames at `period` until cancelled or the target is gone.
pub async fn run_frames<L: SetupLock, S: FrameSignal, I: TextureImporter>(
    frames: &mut FrameLoop<L, S, I>,
    source: &mut impl SurfaceSource,
    mut watch: Option<&mut ExitWatch>,
    control: &impl ProcessControl,
    cancel: &CancellationToken,
    period: Duration,
) -> Result<Ended, KatangaError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(Ended::Cancelled),
            _ = interval.tick() => {}
        }
        let now = Instant::now();
        if let Err(err) = frames.frame(now, source) {
            // a target that just exited fails the remote calls first
            if let Some(watch) = watch.as_deref() {
                if control.find_process_id(watch.exe_name()).is_none() {
                    info!("{} exited mid-frame ({})", watch.exe_name(), err);
                    return Ok(Ended::TargetExited);
                }
            }
            return Err(err);
        }
        if let Some(watch) = watch.as_deref_mut() {
            if watch.poll(now, control).is_ready() {
                return Ok(Ended::TargetExited);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        path::Path,
        rc::Rc,
    };

    use katanga_lib::{
        config::ExitWatchSettings,
        error::{LaunchError, SurfaceError, SyncError},
        hooks::ArmedHooks,
        process::{Bitness, ResumeToken, SuspendedChild},
        surface::{RawSurfaceDesc, SharedSurfaceHandle, SurfaceDesc},
    };

    use super::*;

    #[derive(Default, Clone)]
    struct SharedLock {
        busy: Rc<Cell<bool>>,
        held: bool,
    }

    impl SetupLock for SharedLock {
        fn try_acquire(&mut self) -> Result<bool, SyncError> {
            if self.busy.get() {
                return Ok(false);
            }
            self.held = true;
            Ok(true)
        }

        fn acquire_timeout(&mut self, _timeout: Duration) -> Result<(), SyncError> {
            self.try_acquire().map(|_| ())
        }

        fn release(&mut self) -> Result<(), SyncError> {
            assert!(self.held);
            self.held = false;
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct Signals(Rc<RefCell<Vec<&'static str>>>);

    impl FrameSignal for Signals {
        fn go(&mut self) -> Result<(), SyncError> {
            self.0.borrow_mut().push("go");
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SyncError> {
            self.0.borrow_mut().push("stop");
            Ok(())
        }
    }

    #[derive(Default)]
    struct Importer {
        imports: usize,
    }

    impl TextureImporter for Importer {
        type Texture = u32;

        fn import(
            &mut self,
            handle: SharedSurfaceHandle,
            _desc: &SurfaceDesc,
        ) -> Result<u32, SurfaceError> {
            self.imports += 1;
            Ok(handle.raw())
        }
    }

    struct Source {
        handles: VecDeque<u32>,
        polls: usize,
    }

    impl Source {
        fn new(handles: &[u32]) -> Self {
            Self {
                handles: handles.iter().copied().collect(),
                polls: 0,
            }
        }
    }

    impl SurfaceSource for Source {
        fn shared_handle(&mut self) -> Result<SharedSurfaceHandle, KatangaError> {
            self.polls += 1;
            Ok(SharedSurfaceHandle::new(
                self.handles.pop_front().unwrap_or_default(),
            ))
        }

        fn describe(&mut self) -> Result<RawSurfaceDesc, KatangaError> {
            Ok(RawSurfaceDesc {
                width: 3200,
                height: 900,
                format: 28,
            })
        }
    }

    struct NoProcesses;

    impl ProcessControl for NoProcesses {
        fn create_suspended(
            &mut self,
            exe: &Path,
            _args: &str,
            _working_dir: &Path,
        ) -> Result<SuspendedChild, LaunchError> {
            Err(LaunchError::GameNotFound(exe.to_owned()))
        }

        fn spawn_detached(
            &mut self,
            program: &Path,
            _args: &str,
            _working_dir: &Path,
        ) -> Result<(), LaunchError> {
            Err(LaunchError::GameNotFound(program.to_owned()))
        }

        fn find_process_id(&self, _exe_name: &str) -> Option<u32> {
            None
        }

        fn bitness(&self, _pid: u32) -> Result<Bitness, LaunchError> {
            Ok(Bitness::X64)
        }

        fn resume(&mut self, _token: ResumeToken, _armed: &ArmedHooks) -> Result<(), LaunchError> {
            Ok(())
        }
    }

    fn frame_loop(lock: SharedLock, signals: Signals) -> FrameLoop<SharedLock, Signals, Importer> {
        FrameLoop::new(
            lock,
            FrameSynchronizer::new(signals, Duration::ZERO),
            SurfaceBroker::new(Importer::default()),
        )
    }

    #[test]
    fn screen_follows_the_published_handle() {
        let mut frames = frame_loop(SharedLock::default(), Signals::default());
        let mut source = Source::new(&[0, 0xABCD, 0xABCD, 0, 0xABCD]);
        let now = Instant::now();
        let ratio = 1600.0 / 900.0;

        assert_eq!(frames.frame(now, &mut source).unwrap(), Showing::Placeholder);
        let first = Showing::Surface {
            generation: 1,
            aspect_ratio: ratio,
        };
        assert_eq!(frames.frame(now, &mut source).unwrap(), first);
        assert_eq!(frames.frame(now, &mut source).unwrap(), first);
        assert_eq!(frames.frame(now, &mut source).unwrap(), Showing::Placeholder);
        assert_eq!(
            frames.frame(now, &mut source).unwrap(),
            Showing::Surface {
                generation: 2,
                aspect_ratio: ratio,
            }
        );
        assert_eq!(frames.broker().importer().imports, 2);
    }

    struct Failing;

    impl SurfaceSource for Failing {
        fn shared_handle(&mut self) -> Result<SharedSurfaceHandle, KatangaError> {
            Err(SurfaceError::Query(6).into())
        }

        fn describe(&mut self) -> Result<RawSurfaceDesc, KatangaError> {
            Err(SurfaceError::Query(6).into())
        }
    }

    #[test]
    fn a_failed_frame_still_releases_the_setup_lock() {
        let mut frames = frame_loop(SharedLock::default(), Signals::default());
        assert!(frames.frame(Instant::now(), &mut Failing).is_err());
        assert!(!frames.lock.held);
    }

    #[test]
    fn busy_lock_shows_the_placeholder_without_polling() {
        let lock = SharedLock::default();
        let mut frames = frame_loop(lock.clone(), Signals::default());
        let mut source = Source::new(&[0xABCD, 0xABCD]);
        let now = Instant::now();
        frames.frame(now, &mut source).unwrap();

        lock.busy.set(true);
        assert_eq!(frames.frame(now, &mut source).unwrap(), Showing::Placeholder);
        assert_eq!(source.polls, 1);

        lock.busy.set(false);
        assert!(matches!(
            frames.frame(now, &mut source).unwrap(),
            Showing::Surface { generation: 1, .. }
        ));
    }

    #[test]
    fn every_frame_opens_and_closes_the_window() {
        let signals = Signals::default();
        let mut frames = frame_loop(SharedLock::default(), signals.clone());
        let mut source = Source::new(&[]);
        frames.frame(Instant::now(), &mut source).unwrap();
        frames.frame(Instant::now(), &mut source).unwrap();
        assert_eq!(*signals.0.borrow(), ["go", "stop", "go", "stop"]);

        frames.shutdown();
        assert_eq!(signals.0.borrow().last(), Some(&"go"));
    }

    #[tokio::test]
    async fn cancellation_ends_the_loop() {
        let mut frames = frame_loop(SharedLock::default(), Signals::default());
        let mut source = Source::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ended = run_frames(
            &mut frames,
            &mut source,
            None,
            &NoProcesses,
            &cancel,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(ended, Ended::Cancelled);
    }

    #[tokio::test]
    async fn a_vanished_target_ends_the_loop() {
        let mut frames = frame_loop(SharedLock::default(), Signals::default());
        let mut source = Source::new(&[]);
        let settings = ExitWatchSettings {
            initial_delay_ms: 0,
            interval_ms: 1,
        };
        let mut watch = ExitWatch::new("Game.exe".into(), Instant::now(), &settings);
        let ended = run_frames(
            &mut frames,
            &mut source,
            Some(&mut watch),
            &NoProcesses,
            &CancellationToken::new(),
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(ended, Ended::TargetExited);
    }

    #[tokio::test]
    async fn shutdown_after_a_failed_run_lets_the_target_go() {
        let signals = Signals::default();
        let mut frames = frame_loop(SharedLock::default(), signals.clone());
        let ended = run_frames(
            &mut frames,
            &mut Failing,
            None,
            &NoProcesses,
            &CancellationToken::new(),
            Duration::from_millis(1),
        )
        .await;
        assert!(ended.is_err());

        frames.shutdown();
        assert_eq!(signals.0.borrow().last(), Some(&"go"));
        assert_eq!(frames.showing(), Showing::Placeholder);
    }
}
