//! Copies each presented frame into a shared texture twice as wide, one
//! copy per eye, and keeps the published handle in step with it.

pub mod d3d11;
pub mod d3d9;

use std::sync::atomic::{AtomicI32, Ordering};

use katanga_lib::{
    error::ReplaceError,
    surface::{RawSurfaceDesc, SharedSurfaceHandle},
};
use tracing::{info, warn};
use windows::{
    core::Error,
    Win32::Foundation::{E_FAIL, HANDLE},
};

use crate::state::Agent;

static LAST_FAILURE: AtomicI32 = AtomicI32::new(0);

/// The backbuffer a shared copy was made for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Source {
    device: usize,
    width: u32,
    height: u32,
    format: u32,
}

/// Logs each distinct failure once, so a broken setup does not flood the log
/// at frame rate.
fn report(err: &Error) {
    let code = err.code().0;
    if LAST_FAILURE.swap(code, Ordering::Relaxed) != code {
        warn!("frame not shared: {}", err);
    }
}

fn recovered() {
    if LAST_FAILURE.swap(0, Ordering::Relaxed) != 0 {
        info!("sharing frames again");
    }
}

/// Swaps `copy` for what `rebuild` makes. The new texture is created while
/// the old one still holds its handle value.
fn swap_surface<T>(
    agent: &Agent,
    copy: &mut Option<T>,
    rebuild: impl FnOnce() -> windows::core::Result<(T, HANDLE, RawSurfaceDesc)>,
) -> windows::core::Result<()> {
    let create = || {
        rebuild().map(|(new_copy, handle, desc)| {
            (new_copy, SharedSurfaceHandle::new(handle.0 as usize as u32), desc)
        })
    };
    match agent.publisher().replace(copy, create) {
        Ok(()) => Ok(()),
        Err(ReplaceError::Create(err)) => Err(err),
        Err(ReplaceError::Sync(err)) => {
            warn!("{}", err);
            Err(Error::from(E_FAIL))
        }
    }
}

fn withdraw<T>(agent: &Agent, copy: &mut Option<T>) {
    agent.publisher().withdraw(copy);
}
