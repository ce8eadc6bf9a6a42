use std::time::Duration;

use tracing::{debug, warn};
use windows::{
    core::HSTRING,
    Win32::{
        Foundation::{ERROR_NOT_OWNER, FALSE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT},
        System::Threading::{
            CreateMutexW, OpenMutexW, ReleaseMutex, WaitForSingleObject, MUTEX_ALL_ACCESS,
        },
    },
};

use crate::{error::SyncError, setup_lock::SetupLock};

use super::{error_code, last_error, safe_handle::SafeHandle};

/// A named kernel mutex shared by the consumer and the agent. Ownership is
/// per thread, so acquire and release must happen on the same one.
#[derive(Debug)]
pub struct NamedMutex {
    name: String,
    handle: SafeHandle,
}

enum Waited {
    Acquired,
    TimedOut,
}

impl NamedMutex {
    /// Consumer side. Creating an existing mutex opens it.
    pub fn create(name: &str) -> Result<Self, SyncError> {
        let handle = unsafe { CreateMutexW(None, FALSE, &HSTRING::from(name)) }.map_err(|err| {
            SyncError::Create {
                name: name.to_owned(),
                code: error_code(&err),
            }
        })?;
        debug!("created mutex {}", name);
        Ok(Self {
            name: name.to_owned(),
            handle: SafeHandle(handle),
        })
    }

    /// Target side. Fails when no consumer created it.
    pub fn open(name: &str) -> Result<Self, SyncError> {
        let handle = unsafe { OpenMutexW(MUTEX_ALL_ACCESS, FALSE, &HSTRING::from(name)) }
            .map_err(|err| SyncError::Open {
                name: name.to_owned(),
                code: error_code(&err),
            })?;
        Ok(Self {
            name: name.to_owned(),
            handle: SafeHandle(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn wait(&self, timeout_ms: u32) -> Result<Waited, SyncError> {
        let result = unsafe { WaitForSingleObject(self.handle.0, timeout_ms) };
        if result == WAIT_OBJECT_0 {
            Ok(Waited::Acquired)
        } else if result == WAIT_ABANDONED {
            warn!("{} was abandoned by its owner", self.name);
            Ok(Waited::Acquired)
        } else if result == WAIT_TIMEOUT {
            Ok(Waited::TimedOut)
        } else {
            Err(SyncError::Signal {
                name: self.name.clone(),
                code: last_error(),
            })
        }
    }
}

impl SetupLock for NamedMutex {
    fn try_acquire(&mut self) -> Result<bool, SyncError> {
        Ok(matches!(self.wait(0)?, Waited::Acquired))
    }

    fn acquire_timeout(&mut self, timeout: Duration) -> Result<(), SyncError> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        match self.wait(timeout_ms)? {
            Waited::Acquired => Ok(()),
            Waited::TimedOut => Err(SyncError::Timeout(self.name.clone())),
        }
    }

    fn release(&mut self) -> Result<(), SyncError> {
        unsafe { ReleaseMutex(self.handle.0) }.map_err(|err| {
            let code = error_code(&err);
            if code == ERROR_NOT_OWNER.0 {
                warn!("{} released by a thread that does not own it", self.name);
            }
            SyncError::Signal {
                name: self.name.clone(),
                code,
            }
        })
    }
}
