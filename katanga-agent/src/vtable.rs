use std::{
    ffi::c_void,
    mem::size_of,
    ptr::null_mut,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Mutex,
    },
};

use tracing::warn;
use windows::Win32::System::Memory::{
    VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
};

static PATCH_LOCK: Mutex<()> = Mutex::new(());

struct WritableSlot {
    address: *const c_void,
    old_protect: PAGE_PROTECTION_FLAGS,
}

impl WritableSlot {
    unsafe fn new(address: *const c_void) -> Option<Self> {
        let mut old_protect = PAGE_PROTECTION_FLAGS(0);
        if let Err(err) = VirtualProtect(
            address,
            size_of::<*mut c_void>(),
            PAGE_EXECUTE_READWRITE,
            &mut old_protect,
        ) {
            warn!("VirtualProtect failed: {}", err);
            return None;
        }
        Some(Self {
            address,
            old_protect,
        })
    }
}

impl Drop for WritableSlot {
    fn drop(&mut self) {
        let mut dummy = PAGE_PROTECTION_FLAGS(0);
        if let Err(err) = unsafe {
            VirtualProtect(
                self.address,
                size_of::<*mut c_void>(),
                self.old_protect,
                &mut dummy,
            )
        } {
            warn!("could not restore protection: {}", err);
        }
    }
}

/// A COM method replaced in place. Only vtables whose slot holds the same
/// original as the first one patched are touched.
pub struct VtableHook {
    index: usize,
    original: AtomicPtr<c_void>,
}

impl VtableHook {
    pub const fn new(index: usize) -> Self {
        Self {
            index,
            original: AtomicPtr::new(null_mut()),
        }
    }

    pub fn original(&self) -> *mut c_void {
        self.original.load(Ordering::Acquire)
    }

    /// # Safety
    /// `object` must be a live COM object whose vtable has a slot at this
    /// index with the signature of `replacement`.
    pub unsafe fn patch(&self, object: *mut c_void, replacement: *mut c_void) -> bool {
        let _lock = match PATCH_LOCK.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if object.is_null() {
            return false;
        }
        let vtable = *(object as *mut *mut *mut c_void);
        let slot = vtable.add(self.index);
        let current = *slot;
        if current == replacement {
            return true;
        }
        if let Err(stored) =
            self.original
                .compare_exchange(null_mut(), current, Ordering::AcqRel, Ordering::Acquire)
        {
            if stored != current {
                warn!("slot {} already leads elsewhere, not patching", self.index);
                return false;
            }
        }
        let Some(_writable) = WritableSlot::new(slot as *const c_void) else {
            return false;
        };
        *slot = replacement;
        true
    }
}
