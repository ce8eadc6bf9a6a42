use std::{
    ffi::CString,
    mem::transmute_copy,
    sync::atomic::{AtomicUsize, Ordering},
};

use katanga_lib::{abi::HookRequest, error::ErrorCode, hooks::ExportName, win32::error_code};
use retour::RawDetour;
use tracing::{debug, info, warn};
use windows::{
    core::{HSTRING, PCSTR},
    Win32::{
        Foundation::{
            ERROR_INVALID_FUNCTION, ERROR_INVALID_PARAMETER, ERROR_NOT_SUPPORTED, ERROR_PROC_NOT_FOUND,
        },
        System::LibraryLoader::{GetModuleHandleW, GetProcAddress, LoadLibraryW},
    },
};

use crate::{d3d9_hooks, dxgi_hooks, hook_table::Detour, state::Agent};

/// A replacement function and where its trampoline goes once attached.
pub struct Handler {
    pub replacement: *const (),
    pub original: &'static AtomicUsize,
}

/// The function the trampoline in `slot` leads to.
///
/// # Safety
/// `F` must be the function pointer type the slot was filled for.
pub unsafe fn original<F: Copy>(slot: &AtomicUsize) -> Option<F> {
    let addr = slot.load(Ordering::Acquire);
    (addr != 0).then(|| transmute_copy(&addr))
}

fn handler_for(export: &ExportName) -> Option<Handler> {
    match export.module() {
        "D3D11.DLL" | "DXGI.DLL" => dxgi_hooks::handler(export.symbol()),
        "D3D9.DLL" => d3d9_hooks::handler(export.symbol()),
        _ => None,
    }
}

pub struct Win32Detour {
    export: ExportName,
    detour: RawDetour,
    original: &'static AtomicUsize,
}

unsafe impl Send for Win32Detour {}

impl Detour for Win32Detour {
    fn attach(&mut self) -> Result<(), ErrorCode> {
        let trampoline = self.detour.trampoline() as *const () as usize;
        self.original.store(trampoline, Ordering::Release);
        debug!("{} attached", self.export);
        Ok(())
    }

    fn enable(&mut self) -> Result<(), ErrorCode> {
        unsafe { self.detour.enable() }.map_err(|err| {
            warn!("could not enable {}: {}", self.export, err);
            ERROR_INVALID_FUNCTION.0
        })?;
        info!("{} armed", self.export);
        Ok(())
    }
}

/// Loads the module if the game has not yet.
fn resolve(export: &ExportName) -> Result<*const (), ErrorCode> {
    let module_name = HSTRING::from(export.module());
    let module = match unsafe { GetModuleHandleW(&module_name) } {
        Ok(module) => module,
        Err(_) => unsafe { LoadLibraryW(&module_name) }.map_err(|err| {
            warn!("could not load {}: {}", export.module(), err);
            error_code(&err)
        })?,
    };
    let symbol = CString::new(export.symbol()).map_err(|_| ERROR_INVALID_PARAMETER.0)?;
    let proc = unsafe { GetProcAddress(module, PCSTR(symbol.as_ptr() as *const u8)) }
        .ok_or(ERROR_PROC_NOT_FOUND.0)?;
    Ok(proc as *const ())
}

pub fn install(agent: &Agent, request: &HookRequest) -> Result<u32, ErrorCode> {
    let (export, policy) = request.decode().map_err(|err| {
        warn!("{}", err);
        ERROR_INVALID_PARAMETER.0
    })?;
    let mut hooks = agent.hooks();
    if let Some(id) = hooks.find(&export) {
        debug!("{} already installed as {}", export, id);
        return Ok(id);
    }
    let Some(handler) = handler_for(&export) else {
        warn!("no handler for {}", export);
        return Err(ERROR_NOT_SUPPORTED.0);
    };
    let target = resolve(&export)?;
    let detour = unsafe { RawDetour::new(target, handler.replacement) }.map_err(|err| {
        warn!("could not detour {}: {}", export, err);
        ERROR_INVALID_FUNCTION.0
    })?;
    let id = hooks.install(
        export.clone(),
        policy,
        Win32Detour {
            export: export.clone(),
            detour,
            original: handler.original,
        },
    );
    info!("{} installed as {} ({:?})", export, id, policy);
    Ok(id)
}
