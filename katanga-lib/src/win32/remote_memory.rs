use std::{ffi::c_void, mem};

use tracing::warn;
use windows::{
    core::Result,
    Win32::System::{
        Diagnostics::Debug::WriteProcessMemory,
        Memory::{VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
    },
};

use super::safe_handle::SafeHandle;

/// A block in another process, freed on drop.
pub struct VirtualAllocatedMem<'a> {
    process: &'a SafeHandle,
    pub addr: *mut c_void,
}

impl<'a> VirtualAllocatedMem<'a> {
    pub fn new(process: &'a SafeHandle, size: usize) -> Result<Self> {
        let addr = unsafe {
            VirtualAllocEx(
                process.0,
                None,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if addr.is_null() {
            return Err(windows::core::Error::from_win32());
        }
        Ok(Self { process, addr })
    }

    pub fn with_bytes(process: &'a SafeHandle, bytes: &[u8]) -> Result<Self> {
        let mem = Self::new(process, bytes.len())?;
        unsafe {
            WriteProcessMemory(
                process.0,
                mem.addr,
                bytes.as_ptr() as _,
                bytes.len(),
                None,
            )
        }?;
        Ok(mem)
    }

    /// Gives up the block without freeing it, for when a remote thread may
    /// still be reading it.
    pub fn leak(self) -> *mut c_void {
        let addr = self.addr;
        mem::forget(self);
        addr
    }

    /// Takes back a block given up with [`VirtualAllocatedMem::leak`].
    ///
    /// # Safety
    /// `addr` must come from `leak` on a block of `process`, taken back once.
    pub unsafe fn from_leaked(process: &'a SafeHandle, addr: *mut c_void) -> Self {
        Self { process, addr }
    }
}

impl<'a> Drop for VirtualAllocatedMem<'a> {
    fn drop(&mut self) {
        if let Err(err) = unsafe { VirtualFreeEx(self.process.0, self.addr, 0, MEM_RELEASE) } {
            warn!("VirtualFreeEx failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use windows::Win32::System::Threading::GetCurrentProcess;

    use super::*;

    #[test]
    fn leaked_block_stays_allocated_until_taken_back() {
        let process = SafeHandle(unsafe { GetCurrentProcess() });
        let mem = VirtualAllocatedMem::with_bytes(&process, b"katanga").unwrap();
        let addr = mem.leak();
        let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, 7) };
        assert_eq!(bytes, b"katanga");
        drop(unsafe { VirtualAllocatedMem::from_leaked(&process, addr) });
    }
}
