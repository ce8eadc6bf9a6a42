//! Entry points the consumer runs with remote threads. Each takes one
//! pointer-sized argument and answers with a 32-bit thread exit code.

#![allow(non_snake_case)]

use std::ffi::c_void;

use katanga_lib::{
    abi::{encode_error, HookRequest},
    error::ErrorCode,
};
use tracing::warn;
use windows::Win32::Foundation::{ERROR_INVALID_PARAMETER, ERROR_NOT_READY};

use crate::{
    detours,
    state::{agent, Agent, PUBLISHED},
};

fn status(result: Result<u32, ErrorCode>) -> u32 {
    match result {
        Ok(value) => value,
        Err(code) => encode_error(code),
    }
}

fn with_agent(f: impl FnOnce(&Agent) -> Result<u32, ErrorCode>) -> u32 {
    status(agent().ok_or(ERROR_NOT_READY.0).and_then(f))
}

/// Remote thread parameters carry plain integers in the pointer.
fn param_value(param: *mut c_void) -> u32 {
    param as usize as u32
}

#[no_mangle]
pub extern "system" fn GetSharedHandle(_param: *mut c_void) -> u32 {
    PUBLISHED.handle().raw()
}

#[no_mangle]
pub extern "system" fn GetWidth(_param: *mut c_void) -> u32 {
    PUBLISHED.desc().width
}

#[no_mangle]
pub extern "system" fn GetHeight(_param: *mut c_void) -> u32 {
    PUBLISHED.desc().height
}

#[no_mangle]
pub extern "system" fn GetPixelFormat(_param: *mut c_void) -> u32 {
    PUBLISHED.desc().format
}

#[no_mangle]
pub extern "system" fn InstallHook(param: *mut c_void) -> u32 {
    with_agent(|agent| {
        if param.is_null() {
            warn!("InstallHook without a request");
            return Err(ERROR_INVALID_PARAMETER.0);
        }
        let request = unsafe { &*(param as *const HookRequest) };
        detours::install(agent, request)
    })
}

#[no_mangle]
pub extern "system" fn AttachHook(param: *mut c_void) -> u32 {
    with_agent(|agent| agent.hooks().attach(param_value(param)).map(|()| 0))
}

#[no_mangle]
pub extern "system" fn ArmHook(param: *mut c_void) -> u32 {
    with_agent(|agent| agent.hooks().arm(param_value(param)).map(|()| 0))
}
