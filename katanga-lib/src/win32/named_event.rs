use std::time::Duration;

use tracing::debug;
use windows::{
    core::HSTRING,
    Win32::{
        Foundation::{FALSE, TRUE, WAIT_OBJECT_0, WAIT_TIMEOUT},
        System::Threading::{
            CreateEventW, OpenEventW, ResetEvent, SetEvent, WaitForSingleObject,
            SYNCHRONIZATION_SYNCHRONIZE,
        },
    },
};

use crate::{
    error::SyncError,
    frame_sync::{FrameSignal, WaitOutcome},
};

use super::{error_code, safe_handle::SafeHandle};

/// The manual-reset pacing event.
#[derive(Debug)]
pub struct NamedEvent {
    name: String,
    handle: SafeHandle,
}

impl NamedEvent {
    /// Consumer side. Starts signalled so the game is never held up before
    /// the first consumer frame.
    pub fn create(name: &str) -> Result<Self, SyncError> {
        let handle = unsafe { CreateEventW(None, TRUE, TRUE, &HSTRING::from(name)) }.map_err(
            |err| SyncError::Create {
                name: name.to_owned(),
                code: error_code(&err),
            },
        )?;
        debug!("created event {}", name);
        Ok(Self {
            name: name.to_owned(),
            handle: SafeHandle(handle),
        })
    }

    /// Target side, wait only.
    pub fn open(name: &str) -> Result<Self, SyncError> {
        let handle = unsafe {
            OpenEventW(SYNCHRONIZATION_SYNCHRONIZE, FALSE, &HSTRING::from(name))
        }
        .map_err(|err| SyncError::Open {
            name: name.to_owned(),
            code: error_code(&err),
        })?;
        Ok(Self {
            name: name.to_owned(),
            handle: SafeHandle(handle),
        })
    }

    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        let result = unsafe { WaitForSingleObject(self.handle.0, timeout_ms) };
        if result == WAIT_OBJECT_0 {
            WaitOutcome::Signaled
        } else if result == WAIT_TIMEOUT {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Failed
        }
    }

    fn signal_error(&self, err: windows::core::Error) -> SyncError {
        SyncError::Signal {
            name: self.name.clone(),
            code: error_code(&err),
        }
    }
}

impl FrameSignal for NamedEvent {
    fn go(&mut self) -> Result<(), SyncError> {
        unsafe { SetEvent(self.handle.0) }.map_err(|err| self.signal_error(err))
    }

    fn stop(&mut self) -> Result<(), SyncError> {
        unsafe { ResetEvent(self.handle.0) }.map_err(|err| self.signal_error(err))
    }
}
