#[cfg(target_os = "windows")]
mod capture;
#[cfg(target_os = "windows")]
mod d3d9_hooks;
#[cfg(target_os = "windows")]
mod detours;
#[cfg(target_os = "windows")]
mod dxgi_hooks;
#[cfg(target_os = "windows")]
mod exports;
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod formats;
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod hook_table;
#[cfg(target_os = "windows")]
mod state;
#[cfg(target_os = "windows")]
mod tracing_helper;
#[cfg(target_os = "windows")]
mod vtable;

#[cfg(target_os = "windows")]
pub use exports::*;

#[cfg(target_os = "windows")]
mod dll_main {
    use std::{ffi::c_void, path::PathBuf};

    use tracing::error;
    use windows::Win32::{
        Foundation::{HINSTANCE, HMODULE, MAX_PATH},
        System::{
            Console::AllocConsole, LibraryLoader::GetModuleFileNameW,
            SystemServices::DLL_PROCESS_ATTACH,
        },
    };

    use crate::{state, tracing_helper};

    fn dll_dir(inst_dll: HINSTANCE) -> Option<PathBuf> {
        let mut buf = [0u16; MAX_PATH as usize];
        let len = unsafe { GetModuleFileNameW(HMODULE(inst_dll.0), &mut buf) } as usize;
        if len == 0 {
            return None;
        }
        let path = PathBuf::from(String::from_utf16_lossy(&buf[..len]));
        path.parent().map(|x| x.to_owned())
    }

    /// Refusing to load reports the failure back through LoadLibraryW.
    #[no_mangle]
    pub extern "system" fn DllMain(
        inst_dll: HINSTANCE,
        reason: u32,
        _reserved: *mut c_void,
    ) -> bool {
        if reason != DLL_PROCESS_ATTACH {
            return true;
        }
        if cfg!(debug_assertions) {
            let _ = unsafe { AllocConsole() };
        }
        let Some(dir) = dll_dir(inst_dll) else {
            return false;
        };
        tracing_helper::init_tracing(&dir, concat!(env!("CARGO_PKG_NAME"), ".log"));
        if let Err(err) = state::init(&dir) {
            error!("{:#}", err);
            return false;
        }
        true
    }
}
