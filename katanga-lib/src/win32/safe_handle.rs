use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// Owns a kernel handle and closes it on drop.
#[derive(Debug)]
pub struct SafeHandle(pub HANDLE);

unsafe impl Send for SafeHandle {}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        if self.0.is_invalid() {
            return;
        }
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!("CloseHandle failed: {}", err);
        }
    }
}
