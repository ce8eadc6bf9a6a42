use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    error::{ReplaceError, SyncError},
    setup_lock::SetupLock,
};

use super::{RawSurfaceDesc, SharedSurfaceHandle};

/// The values the agent exports answer with. Written by the render thread,
/// read by remote threads at any time.
#[derive(Debug, Default)]
pub struct PublishedSurface {
    handle: AtomicU32,
    width: AtomicU32,
    height: AtomicU32,
    format: AtomicU32,
}

impl PublishedSurface {
    pub const fn new() -> Self {
        Self {
            handle: AtomicU32::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            format: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> SharedSurfaceHandle {
        SharedSurfaceHandle::new(self.handle.load(Ordering::Acquire))
    }

    pub fn desc(&self) -> RawSurfaceDesc {
        RawSurfaceDesc {
            width: self.width.load(Ordering::Acquire),
            height: self.height.load(Ordering::Acquire),
            format: self.format.load(Ordering::Acquire),
        }
    }

    fn clear(&self) {
        self.handle.store(0, Ordering::Release);
    }

    fn set(&self, handle: SharedSurfaceHandle, desc: RawSurfaceDesc) {
        // desc first, so a reader that sees the handle sees its desc
        self.width.store(desc.width, Ordering::Release);
        self.height.store(desc.height, Ordering::Release);
        self.format.store(desc.format, Ordering::Release);
        self.handle.store(handle.raw(), Ordering::Release);
    }
}

/// Target-side half of the handoff.
pub struct SurfacePublisher<'p, L: SetupLock> {
    lock: L,
    published: &'p PublishedSurface,
    timeout: Duration,
}

impl<'p, L: SetupLock> SurfacePublisher<'p, L> {
    pub fn new(lock: L, published: &'p PublishedSurface, timeout: Duration) -> Self {
        Self {
            lock,
            published,
            timeout,
        }
    }

    pub fn published(&self) -> &PublishedSurface {
        self.published
    }

    /// Takes the setup lock and withdraws the current handle. The old
    /// resource may only be released after this returns.
    pub fn begin_teardown(&mut self) -> Result<Teardown<'_, 'p, L>, SyncError> {
        self.lock.acquire_timeout(self.timeout)?;
        if !self.published.handle().is_none() {
            debug!("withdrawing surface {}", self.published.handle());
        }
        self.published.clear();
        Ok(Teardown {
            publisher: self,
            published_new: false,
        })
    }

    /// Swaps `current` for what `create` makes and publishes it. The new
    /// resource exists before the old one is released, so the system cannot
    /// hand it the old handle value. When `create` fails the old resource is
    /// released anyway and zero stays published.
    pub fn replace<T, E>(
        &mut self,
        current: &mut Option<T>,
        create: impl FnOnce() -> Result<(T, SharedSurfaceHandle, RawSurfaceDesc), E>,
    ) -> Result<(), ReplaceError<E>> {
        let teardown = self.begin_teardown()?;
        match create() {
            Ok((resource, handle, desc)) => {
                *current = Some(resource);
                teardown.publish(handle, desc);
                Ok(())
            }
            Err(err) => {
                *current = None;
                Err(ReplaceError::Create(err))
            }
        }
    }

    /// Releases `current` with zero published. When the setup lock cannot
    /// be had in time the handle is zeroed without it.
    pub fn withdraw<T>(&mut self, current: &mut Option<T>) {
        if current.is_none() {
            return;
        }
        let published = self.published;
        match self.begin_teardown() {
            Ok(_teardown) => *current = None,
            Err(err) => {
                warn!("{}, withdrawing without the lock", err);
                published.clear();
                *current = None;
            }
        }
    }
}

/// A swap in progress. Dropping it without [`Teardown::publish`] leaves zero
/// published. Either way the setup lock is released.
pub struct Teardown<'a, 'p, L: SetupLock> {
    publisher: &'a mut SurfacePublisher<'p, L>,
    published_new: bool,
}

impl<'a, 'p, L: SetupLock> Teardown<'a, 'p, L> {
    pub fn publish(mut self, handle: SharedSurfaceHandle, desc: RawSurfaceDesc) {
        info!(
            "publishing surface {}: {}x{} format {}",
            handle, desc.width, desc.height, desc.format
        );
        self.publisher.published.set(handle, desc);
        self.published_new = true;
    }
}

impl<'a, 'p, L: SetupLock> Drop for Teardown<'a, 'p, L> {
    fn drop(&mut self) {
        if !self.published_new {
            debug!("surface left withdrawn");
        }
        if let Err(err) = self.publisher.lock.release() {
            warn!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use crate::setup_lock::fake::{FakeLock, LockEvent};

    use super::*;

    /// A shared texture that records its creation and release.
    struct Resource {
        handle: u32,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Resource {
        fn create(
            handle: u32,
            log: &Rc<RefCell<Vec<String>>>,
        ) -> Result<(Self, SharedSurfaceHandle, RawSurfaceDesc), i32> {
            log.borrow_mut().push(format!("create {:#x}", handle));
            Ok((
                Self {
                    handle,
                    log: log.clone(),
                },
                SharedSurfaceHandle::new(handle),
                DESC,
            ))
        }
    }

    impl Drop for Resource {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("release {:#x}", self.handle));
        }
    }

    const DESC: RawSurfaceDesc = RawSurfaceDesc {
        width: 3840,
        height: 1080,
        format: 87,
    };

    #[test]
    fn publish_happens_under_the_lock() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let events = lock.events.clone();
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));

        let teardown = publisher.begin_teardown().unwrap();
        teardown.publish(SharedSurfaceHandle::new(0x40), DESC);

        assert_eq!(published.handle().raw(), 0x40);
        assert_eq!(published.desc(), DESC);
        assert_eq!(*events.borrow(), [LockEvent::Acquired, LockEvent::Released]);
    }

    #[test]
    fn handle_is_zero_before_the_old_resource_goes() {
        let published = PublishedSurface::new();
        let mut publisher =
            SurfacePublisher::new(FakeLock::default(), &published, Duration::from_secs(1));
        publisher
            .begin_teardown()
            .unwrap()
            .publish(SharedSurfaceHandle::new(0x40), DESC);

        // what a resize does: withdraw, free the old texture, build the new one
        let teardown = publisher.begin_teardown().unwrap();
        let seen_while_freeing = teardown.publisher.published.handle();
        teardown.publish(SharedSurfaceHandle::new(0x80), DESC);

        assert_eq!(seen_while_freeing, SharedSurfaceHandle::NONE);
        assert_eq!(published.handle().raw(), 0x80);
    }

    #[test]
    fn abandoned_teardown_leaves_zero_and_releases() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let events = lock.events.clone();
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));
        publisher
            .begin_teardown()
            .unwrap()
            .publish(SharedSurfaceHandle::new(0x40), DESC);
        drop(publisher.begin_teardown().unwrap());
        assert!(published.handle().is_none());
        assert_eq!(events.borrow().last(), Some(&LockEvent::Released));
    }

    #[test]
    fn lock_timeout_touches_nothing() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let held = lock.held_elsewhere.clone();
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));
        publisher
            .begin_teardown()
            .unwrap()
            .publish(SharedSurfaceHandle::new(0x40), DESC);

        *held.borrow_mut() = true;
        assert!(matches!(
            publisher.begin_teardown(),
            Err(SyncError::Timeout(_))
        ));
        assert_eq!(published.handle().raw(), 0x40);
    }

    #[test]
    fn replacement_exists_before_the_old_resource_is_released() {
        let published = PublishedSurface::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut publisher =
            SurfacePublisher::new(FakeLock::default(), &published, Duration::from_secs(1));
        let mut current = None;
        publisher
            .replace(&mut current, || Resource::create(0x40, &log))
            .unwrap();

        let seen_while_creating = RefCell::new(None);
        publisher
            .replace(&mut current, || {
                *seen_while_creating.borrow_mut() = Some(published.handle());
                Resource::create(0x80, &log)
            })
            .unwrap();

        assert_eq!(
            *log.borrow(),
            ["create 0x40", "create 0x80", "release 0x40"]
        );
        assert_eq!(*seen_while_creating.borrow(), Some(SharedSurfaceHandle::NONE));
        assert_eq!(published.handle().raw(), 0x80);
        assert_eq!(current.as_ref().map(|x| x.handle), Some(0x80));
    }

    #[test]
    fn failed_replacement_releases_the_old_resource_with_zero_published() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let events = lock.events.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));
        let mut current = None;
        publisher
            .replace(&mut current, || Resource::create(0x40, &log))
            .unwrap();

        let err = publisher
            .replace(&mut current, || Err::<(Resource, _, _), _>(-1))
            .unwrap_err();

        assert!(matches!(err, ReplaceError::Create(-1)));
        assert!(current.is_none());
        assert!(published.handle().is_none());
        assert_eq!(*log.borrow(), ["create 0x40", "release 0x40"]);
        assert_eq!(events.borrow().last(), Some(&LockEvent::Released));
    }

    #[test]
    fn replacement_waits_for_the_lock() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let held = lock.held_elsewhere.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));
        let mut current = None;
        publisher
            .replace(&mut current, || Resource::create(0x40, &log))
            .unwrap();

        *held.borrow_mut() = true;
        let err = publisher
            .replace(&mut current, || Resource::create(0x80, &log))
            .unwrap_err();

        assert!(matches!(err, ReplaceError::Sync(SyncError::Timeout(_))));
        assert_eq!(published.handle().raw(), 0x40);
        assert_eq!(*log.borrow(), ["create 0x40"]);
    }

    #[test]
    fn withdraw_zeroes_the_handle_before_releasing() {
        let published = PublishedSurface::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut publisher =
            SurfacePublisher::new(FakeLock::default(), &published, Duration::from_secs(1));
        let mut current = None;
        publisher
            .replace(&mut current, || Resource::create(0x40, &log))
            .unwrap();

        publisher.withdraw(&mut current);

        assert!(current.is_none());
        assert!(published.handle().is_none());
        assert_eq!(*log.borrow(), ["create 0x40", "release 0x40"]);
    }

    #[test]
    fn withdraw_zeroes_the_handle_even_when_the_lock_times_out() {
        let published = PublishedSurface::new();
        let lock = FakeLock::default();
        let held = lock.held_elsewhere.clone();
        let events = lock.events.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = SurfacePublisher::new(lock, &published, Duration::from_secs(1));
        let mut current = None;
        publisher
            .replace(&mut current, || Resource::create(0x40, &log))
            .unwrap();

        *held.borrow_mut() = true;
        publisher.withdraw(&mut current);

        assert!(current.is_none());
        assert!(published.handle().is_none());
        assert_eq!(events.borrow().last(), Some(&LockEvent::TimedOut));
    }
}
