use std::{
    ffi::c_void,
    mem::transmute,
    ptr::null_mut,
    sync::atomic::AtomicUsize,
};

use tracing::{debug, info, warn};
use windows::{
    core::{s, w, Interface, HRESULT},
    Win32::{
        Foundation::{E_FAIL, RECT},
        Graphics::Direct3D9::{IDirect3D9, IDirect3D9Ex, IDirect3DDevice9, IDirect3DDevice9Ex},
        System::LibraryLoader::{GetModuleHandleW, GetProcAddress},
    },
};

use crate::{
    capture,
    detours::{original, Handler},
    vtable::VtableHook,
};

type Direct3DCreate9Fn = unsafe extern "system" fn(sdk_version: u32) -> *mut c_void;

type Direct3DCreate9ExFn =
    unsafe extern "system" fn(sdk_version: u32, d3d: *mut *mut c_void) -> HRESULT;

type CreateDeviceFn = unsafe extern "system" fn(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    presentation_parameters: *mut c_void,
    device: *mut *mut c_void,
) -> HRESULT;

type CreateDeviceExFn = unsafe extern "system" fn(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    presentation_parameters: *mut c_void,
    fullscreen_display_mode: *mut c_void,
    device: *mut *mut c_void,
) -> HRESULT;

type PresentFn = unsafe extern "system" fn(
    this: *mut c_void,
    source: *const RECT,
    dest: *const RECT,
    dest_window: *mut c_void,
    dirty_region: *const c_void,
) -> HRESULT;

type PresentExFn = unsafe extern "system" fn(
    this: *mut c_void,
    source: *const RECT,
    dest: *const RECT,
    dest_window: *mut c_void,
    dirty_region: *const c_void,
    flags: u32,
) -> HRESULT;

type ResetFn =
    unsafe extern "system" fn(this: *mut c_void, presentation_parameters: *mut c_void) -> HRESULT;

type ResetExFn = unsafe extern "system" fn(
    this: *mut c_void,
    presentation_parameters: *mut c_void,
    fullscreen_display_mode: *mut c_void,
) -> HRESULT;

static ORIGINAL_DIRECT3D_CREATE9: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_DIRECT3D_CREATE9_EX: AtomicUsize = AtomicUsize::new(0);

static CREATE_DEVICE: VtableHook = VtableHook::new(16);
static CREATE_DEVICE_EX: VtableHook = VtableHook::new(20);
static RESET: VtableHook = VtableHook::new(16);
static PRESENT: VtableHook = VtableHook::new(17);
static PRESENT_EX: VtableHook = VtableHook::new(121);
static RESET_EX: VtableHook = VtableHook::new(132);

pub fn handler(symbol: &str) -> Option<Handler> {
    let (replacement, original) = match symbol {
        "Direct3DCreate9" => (
            direct3d_create9 as *const (),
            &ORIGINAL_DIRECT3D_CREATE9,
        ),
        "Direct3DCreate9Ex" => (
            direct3d_create9_ex as *const (),
            &ORIGINAL_DIRECT3D_CREATE9_EX,
        ),
        _ => return None,
    };
    Some(Handler {
        replacement,
        original,
    })
}

unsafe fn hook_direct3d(d3d: *mut c_void) {
    let Some(direct3d) = IDirect3D9::from_raw_borrowed(&d3d) else {
        return;
    };
    CREATE_DEVICE.patch(d3d, create_device as *mut c_void);
    if direct3d.cast::<IDirect3D9Ex>().is_ok() {
        CREATE_DEVICE_EX.patch(d3d, create_device_ex as *mut c_void);
    }
}

unsafe fn hook_device(device: *mut c_void) {
    let Some(borrowed) = IDirect3DDevice9::from_raw_borrowed(&device) else {
        return;
    };
    PRESENT.patch(device, present as *mut c_void);
    RESET.patch(device, reset as *mut c_void);
    if borrowed.cast::<IDirect3DDevice9Ex>().is_ok() {
        PRESENT_EX.patch(device, present_ex as *mut c_void);
        RESET_EX.patch(device, reset_ex as *mut c_void);
    } else {
        warn!("device is not Ex, frames cannot be shared");
    }
    debug!("device hooked");
}

/// Asks for the Ex object in place of the plain one. It answers to the same
/// interface, and only its devices can share surfaces.
unsafe fn create_ex_instead(sdk_version: u32) -> Option<*mut c_void> {
    let module = GetModuleHandleW(w!("d3d9.dll")).ok()?;
    let proc = GetProcAddress(module, s!("Direct3DCreate9Ex"))?;
    let create: Direct3DCreate9ExFn = transmute(proc);
    let mut d3d = null_mut();
    let hr = create(sdk_version, &mut d3d);
    if hr.is_err() || d3d.is_null() {
        warn!("Direct3DCreate9Ex failed: {:?}", hr);
        return None;
    }
    Some(d3d)
}

unsafe extern "system" fn direct3d_create9(sdk_version: u32) -> *mut c_void {
    if let Some(d3d) = create_ex_instead(sdk_version) {
        info!("Direct3DCreate9 upgraded to Ex");
        hook_direct3d(d3d);
        return d3d;
    }
    let Some(original) = original::<Direct3DCreate9Fn>(&ORIGINAL_DIRECT3D_CREATE9) else {
        return null_mut();
    };
    let d3d = original(sdk_version);
    if !d3d.is_null() {
        hook_direct3d(d3d);
    }
    d3d
}

unsafe extern "system" fn direct3d_create9_ex(sdk_version: u32, d3d: *mut *mut c_void) -> HRESULT {
    let Some(original) = original::<Direct3DCreate9ExFn>(&ORIGINAL_DIRECT3D_CREATE9_EX) else {
        return E_FAIL;
    };
    let hr = original(sdk_version, d3d);
    if hr.is_ok() && !d3d.is_null() && !(*d3d).is_null() {
        hook_direct3d(*d3d);
    }
    hr
}

unsafe extern "system" fn create_device(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    presentation_parameters: *mut c_void,
    device: *mut *mut c_void,
) -> HRESULT {
    let original: CreateDeviceFn = transmute(CREATE_DEVICE.original());
    let hr = original(
        this,
        adapter,
        device_type,
        focus_window,
        behavior_flags,
        presentation_parameters,
        device,
    );
    debug!("CreateDevice: {:?}", hr);
    if hr.is_ok() && !device.is_null() {
        hook_device(*device);
    }
    hr
}

unsafe extern "system" fn create_device_ex(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    presentation_parameters: *mut c_void,
    fullscreen_display_mode: *mut c_void,
    device: *mut *mut c_void,
) -> HRESULT {
    let original: CreateDeviceExFn = transmute(CREATE_DEVICE_EX.original());
    let hr = original(
        this,
        adapter,
        device_type,
        focus_window,
        behavior_flags,
        presentation_parameters,
        fullscreen_display_mode,
        device,
    );
    debug!("CreateDeviceEx: {:?}", hr);
    if hr.is_ok() && !device.is_null() {
        hook_device(*device);
    }
    hr
}

unsafe fn share_frame(this: *mut c_void) {
    if let Some(device) = IDirect3DDevice9::from_raw_borrowed(&this) {
        capture::d3d9::on_present(device);
    }
}

unsafe extern "system" fn present(
    this: *mut c_void,
    source: *const RECT,
    dest: *const RECT,
    dest_window: *mut c_void,
    dirty_region: *const c_void,
) -> HRESULT {
    share_frame(this);
    let original: PresentFn = transmute(PRESENT.original());
    original(this, source, dest, dest_window, dirty_region)
}

unsafe extern "system" fn present_ex(
    this: *mut c_void,
    source: *const RECT,
    dest: *const RECT,
    dest_window: *mut c_void,
    dirty_region: *const c_void,
    flags: u32,
) -> HRESULT {
    share_frame(this);
    let original: PresentExFn = transmute(PRESENT_EX.original());
    original(this, source, dest, dest_window, dirty_region, flags)
}

unsafe extern "system" fn reset(this: *mut c_void, presentation_parameters: *mut c_void) -> HRESULT {
    capture::d3d9::on_reset();
    let original: ResetFn = transmute(RESET.original());
    original(this, presentation_parameters)
}

unsafe extern "system" fn reset_ex(
    this: *mut c_void,
    presentation_parameters: *mut c_void,
    fullscreen_display_mode: *mut c_void,
) -> HRESULT {
    capture::d3d9::on_reset();
    let original: ResetExFn = transmute(RESET_EX.original());
    original(this, presentation_parameters, fullscreen_display_mode)
}
