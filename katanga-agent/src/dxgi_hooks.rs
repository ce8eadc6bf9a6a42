use std::{ffi::c_void, mem::transmute, sync::atomic::AtomicUsize};

use tracing::{debug, trace, warn};
use windows::{
    core::{Interface, GUID, HRESULT},
    Win32::{
        Foundation::E_FAIL,
        Graphics::{
            Direct3D11::ID3D11Device,
            Dxgi::{IDXGIDevice, IDXGIFactory, IDXGIFactory2, IDXGISwapChain, IDXGISwapChain1},
        },
    },
};

use crate::{
    capture,
    detours::{original, Handler},
    vtable::VtableHook,
};

const PRESENT_TEST: u32 = 0x1;

type D3D11CreateDeviceFn = unsafe extern "system" fn(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    context: *mut *mut c_void,
) -> HRESULT;

type D3D11CreateDeviceAndSwapChainFn = unsafe extern "system" fn(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    swap_chain_desc: *const c_void,
    swap_chain: *mut *mut c_void,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    context: *mut *mut c_void,
) -> HRESULT;

type CreateDxgiFactoryFn =
    unsafe extern "system" fn(riid: *const GUID, factory: *mut *mut c_void) -> HRESULT;

type CreateSwapChainFn = unsafe extern "system" fn(
    this: *mut c_void,
    device: *mut c_void,
    desc: *const c_void,
    swap_chain: *mut *mut c_void,
) -> HRESULT;

type CreateSwapChainForHwndFn = unsafe extern "system" fn(
    this: *mut c_void,
    device: *mut c_void,
    hwnd: *mut c_void,
    desc: *const c_void,
    fullscreen_desc: *const c_void,
    restrict_to_output: *mut c_void,
    swap_chain: *mut *mut c_void,
) -> HRESULT;

type PresentFn =
    unsafe extern "system" fn(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT;

type Present1Fn = unsafe extern "system" fn(
    this: *mut c_void,
    sync_interval: u32,
    flags: u32,
    parameters: *const c_void,
) -> HRESULT;

type ResizeBuffersFn = unsafe extern "system" fn(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: i32,
    flags: u32,
) -> HRESULT;

static ORIGINAL_D3D11_CREATE_DEVICE: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_D3D11_CREATE_DEVICE_AND_SWAP_CHAIN: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_CREATE_DXGI_FACTORY: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_CREATE_DXGI_FACTORY1: AtomicUsize = AtomicUsize::new(0);

static CREATE_SWAP_CHAIN: VtableHook = VtableHook::new(10);
static CREATE_SWAP_CHAIN_FOR_HWND: VtableHook = VtableHook::new(15);
static PRESENT: VtableHook = VtableHook::new(8);
static RESIZE_BUFFERS: VtableHook = VtableHook::new(13);
static PRESENT1: VtableHook = VtableHook::new(22);

pub fn handler(symbol: &str) -> Option<Handler> {
    let (replacement, original) = match symbol {
        "D3D11CreateDevice" => (
            d3d11_create_device as *const (),
            &ORIGINAL_D3D11_CREATE_DEVICE,
        ),
        "D3D11CreateDeviceAndSwapChain" => (
            d3d11_create_device_and_swap_chain as *const (),
            &ORIGINAL_D3D11_CREATE_DEVICE_AND_SWAP_CHAIN,
        ),
        "CreateDXGIFactory" => (
            create_dxgi_factory as *const (),
            &ORIGINAL_CREATE_DXGI_FACTORY,
        ),
        "CreateDXGIFactory1" => (
            create_dxgi_factory1 as *const (),
            &ORIGINAL_CREATE_DXGI_FACTORY1,
        ),
        _ => return None,
    };
    Some(Handler {
        replacement,
        original,
    })
}

/// Devices made without a swap chain reach one through their own factory.
unsafe fn hook_factory_of(device: *mut c_void) {
    let Some(device) = ID3D11Device::from_raw_borrowed(&device) else {
        return;
    };
    let factory = device
        .cast::<IDXGIDevice>()
        .and_then(|x| x.GetAdapter())
        .and_then(|x| x.GetParent::<IDXGIFactory>());
    match factory {
        Ok(factory) => hook_factory(factory.as_raw()),
        Err(err) => warn!("no factory behind the device: {}", err),
    }
}

unsafe fn hook_factory(factory: *mut c_void) {
    if !CREATE_SWAP_CHAIN.patch(factory, create_swap_chain as *mut c_void) {
        return;
    }
    let is_factory2 = IDXGIFactory::from_raw_borrowed(&factory)
        .is_some_and(|x| x.cast::<IDXGIFactory2>().is_ok());
    if is_factory2 {
        CREATE_SWAP_CHAIN_FOR_HWND.patch(factory, create_swap_chain_for_hwnd as *mut c_void);
    }
    debug!("factory hooked");
}

unsafe fn hook_swap_chain(swap_chain: *mut c_void) {
    if swap_chain.is_null() {
        return;
    }
    let patched = PRESENT.patch(swap_chain, present as *mut c_void)
        && RESIZE_BUFFERS.patch(swap_chain, resize_buffers as *mut c_void);
    let is_swap_chain1 = IDXGISwapChain::from_raw_borrowed(&swap_chain)
        .is_some_and(|x| x.cast::<IDXGISwapChain1>().is_ok());
    if is_swap_chain1 {
        PRESENT1.patch(swap_chain, present1 as *mut c_void);
    }
    if patched {
        debug!("swap chain hooked");
    }
}

unsafe extern "system" fn d3d11_create_device(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    context: *mut *mut c_void,
) -> HRESULT {
    trace!("D3D11CreateDevice driver {} flags {:#x}", driver_type, flags);
    let Some(original) = original::<D3D11CreateDeviceFn>(&ORIGINAL_D3D11_CREATE_DEVICE) else {
        return E_FAIL;
    };
    let hr = original(
        adapter,
        driver_type,
        software,
        flags,
        feature_levels,
        feature_level_count,
        sdk_version,
        device,
        feature_level,
        context,
    );
    debug!("D3D11CreateDevice: {:?}", hr);
    if hr.is_ok() && !device.is_null() && !(*device).is_null() {
        hook_factory_of(*device);
    }
    hr
}

unsafe extern "system" fn d3d11_create_device_and_swap_chain(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    swap_chain_desc: *const c_void,
    swap_chain: *mut *mut c_void,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    context: *mut *mut c_void,
) -> HRESULT {
    trace!("D3D11CreateDeviceAndSwapChain driver {}", driver_type);
    let Some(original) = original::<D3D11CreateDeviceAndSwapChainFn>(
        &ORIGINAL_D3D11_CREATE_DEVICE_AND_SWAP_CHAIN,
    ) else {
        return E_FAIL;
    };
    let hr = original(
        adapter,
        driver_type,
        software,
        flags,
        feature_levels,
        feature_level_count,
        sdk_version,
        swap_chain_desc,
        swap_chain,
        device,
        feature_level,
        context,
    );
    debug!("D3D11CreateDeviceAndSwapChain: {:?}", hr);
    if hr.is_ok() && !swap_chain.is_null() {
        hook_swap_chain(*swap_chain);
    }
    hr
}

unsafe fn after_create_factory(hr: HRESULT, factory: *mut *mut c_void) -> HRESULT {
    if hr.is_ok() && !factory.is_null() && !(*factory).is_null() {
        hook_factory(*factory);
    }
    hr
}

unsafe extern "system" fn create_dxgi_factory(
    riid: *const GUID,
    factory: *mut *mut c_void,
) -> HRESULT {
    let Some(original) = original::<CreateDxgiFactoryFn>(&ORIGINAL_CREATE_DXGI_FACTORY) else {
        return E_FAIL;
    };
    after_create_factory(original(riid, factory), factory)
}

unsafe extern "system" fn create_dxgi_factory1(
    riid: *const GUID,
    factory: *mut *mut c_void,
) -> HRESULT {
    let Some(original) = original::<CreateDxgiFactoryFn>(&ORIGINAL_CREATE_DXGI_FACTORY1) else {
        return E_FAIL;
    };
    after_create_factory(original(riid, factory), factory)
}

unsafe extern "system" fn create_swap_chain(
    this: *mut c_void,
    device: *mut c_void,
    desc: *const c_void,
    swap_chain: *mut *mut c_void,
) -> HRESULT {
    let original: CreateSwapChainFn = transmute(CREATE_SWAP_CHAIN.original());
    let hr = original(this, device, desc, swap_chain);
    if hr.is_ok() && !swap_chain.is_null() {
        hook_swap_chain(*swap_chain);
    }
    hr
}

unsafe extern "system" fn create_swap_chain_for_hwnd(
    this: *mut c_void,
    device: *mut c_void,
    hwnd: *mut c_void,
    desc: *const c_void,
    fullscreen_desc: *const c_void,
    restrict_to_output: *mut c_void,
    swap_chain: *mut *mut c_void,
) -> HRESULT {
    let original: CreateSwapChainForHwndFn = transmute(CREATE_SWAP_CHAIN_FOR_HWND.original());
    let hr = original(
        this,
        device,
        hwnd,
        desc,
        fullscreen_desc,
        restrict_to_output,
        swap_chain,
    );
    if hr.is_ok() && !swap_chain.is_null() {
        hook_swap_chain(*swap_chain);
    }
    hr
}

unsafe fn share_frame(this: *mut c_void, flags: u32) {
    if flags & PRESENT_TEST != 0 {
        return;
    }
    if let Some(swap_chain) = IDXGISwapChain::from_raw_borrowed(&this) {
        capture::d3d11::on_present(swap_chain);
    }
}

unsafe extern "system" fn present(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT {
    share_frame(this, flags);
    let original: PresentFn = transmute(PRESENT.original());
    original(this, sync_interval, flags)
}

unsafe extern "system" fn present1(
    this: *mut c_void,
    sync_interval: u32,
    flags: u32,
    parameters: *const c_void,
) -> HRESULT {
    share_frame(this, flags);
    let original: Present1Fn = transmute(PRESENT1.original());
    original(this, sync_interval, flags, parameters)
}

unsafe extern "system" fn resize_buffers(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: i32,
    flags: u32,
) -> HRESULT {
    debug!("ResizeBuffers {}x{}", width, height);
    capture::d3d11::on_resize();
    let original: ResizeBuffersFn = transmute(RESIZE_BUFFERS.original());
    original(this, buffer_count, width, height, format, flags)
}
