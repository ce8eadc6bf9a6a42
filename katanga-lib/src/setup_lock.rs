use std::time::Duration;

use tracing::warn;

use crate::error::SyncError;

/// The cross-process mutex that keeps the consumer from opening a surface
/// while the target is tearing it down.
pub trait SetupLock {
    /// Zero-wait attempt.
    fn try_acquire(&mut self) -> Result<bool, SyncError>;

    /// Fails with [`SyncError::Timeout`] once `timeout` elapses.
    fn acquire_timeout(&mut self, timeout: Duration) -> Result<(), SyncError>;

    fn release(&mut self) -> Result<(), SyncError>;
}

/// Held for one consumer frame. Releasing on drop means an error or a panic
/// mid-frame still frees the target.
pub struct FrameLock<'a, L: SetupLock> {
    lock: Option<&'a mut L>,
}

impl<'a, L: SetupLock> FrameLock<'a, L> {
    /// `None` when the target holds the lock this frame.
    pub fn try_new(lock: &'a mut L) -> Result<Option<Self>, SyncError> {
        if !lock.try_acquire()? {
            return Ok(None);
        }
        Ok(Some(Self { lock: Some(lock) }))
    }

    pub fn unlock(mut self) -> Result<(), SyncError> {
        match self.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        }
    }
}

impl<'a, L: SetupLock> Drop for FrameLock<'a, L> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        if let Err(err) = lock.release() {
            warn!("{}", err);
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum LockEvent {
        Acquired,
        Busy,
        TimedOut,
        Released,
    }

    /// Single-process stand-in. `held_elsewhere` simulates the other side.
    #[derive(Clone, Default)]
    pub struct FakeLock {
        pub held_elsewhere: Rc<RefCell<bool>>,
        pub held_here: bool,
        pub events: Rc<RefCell<Vec<LockEvent>>>,
    }

    impl FakeLock {
        pub fn events(&self) -> Vec<LockEvent> {
            self.events.borrow().clone()
        }
    }

    impl SetupLock for FakeLock {
        fn try_acquire(&mut self) -> Result<bool, SyncError> {
            if *self.held_elsewhere.borrow() {
                self.events.borrow_mut().push(LockEvent::Busy);
                return Ok(false);
            }
            self.held_here = true;
            self.events.borrow_mut().push(LockEvent::Acquired);
            Ok(true)
        }

        fn acquire_timeout(&mut self, _timeout: Duration) -> Result<(), SyncError> {
            if *self.held_elsewhere.borrow() {
                self.events.borrow_mut().push(LockEvent::TimedOut);
                return Err(SyncError::Timeout("fake lock".into()));
            }
            self.held_here = true;
            self.events.borrow_mut().push(LockEvent::Acquired);
            Ok(())
        }

        fn release(&mut self) -> Result<(), SyncError> {
            if !self.held_here {
                return Err(SyncError::Signal {
                    name: "fake lock".into(),
                    code: 288, // ERROR_NOT_OWNER
                });
            }
            self.held_here = false;
            self.events.borrow_mut().push(LockEvent::Released);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::*, *};

    #[test]
    fn busy_lock_yields_no_frame() {
        let mut lock = FakeLock::default();
        *lock.held_elsewhere.borrow_mut() = true;
        assert!(FrameLock::try_new(&mut lock).unwrap().is_none());
        assert_eq!(lock.events(), [LockEvent::Busy]);
    }

    #[test]
    fn frame_lock_releases_on_drop() {
        let mut lock = FakeLock::default();
        {
            let _frame = FrameLock::try_new(&mut lock).unwrap().unwrap();
        }
        assert!(!lock.held_here);
        assert_eq!(lock.events(), [LockEvent::Acquired, LockEvent::Released]);
    }

    #[test]
    fn explicit_unlock_releases_once() {
        let mut lock = FakeLock::default();
        let frame = FrameLock::try_new(&mut lock).unwrap().unwrap();
        frame.unlock().unwrap();
        assert_eq!(lock.events(), [LockEvent::Acquired, LockEvent::Released]);
    }

    #[test]
    fn frame_lock_releases_on_unwind() {
        let mut lock = FakeLock::default();
        let events = lock.events.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _frame = FrameLock::try_new(&mut lock).unwrap().unwrap();
            panic!("render failed");
        }));
        assert!(result.is_err());
        assert_eq!(
            *events.borrow(),
            [LockEvent::Acquired, LockEvent::Released]
        );
    }
}
