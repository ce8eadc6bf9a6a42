mod agent_host;
mod d3d11_import;
mod dialog;
mod export_address;
mod find_process_id;
mod named_event;
mod named_mutex;
mod process_control;
mod remote_memory;
mod safe_handle;

use windows::Win32::Foundation::GetLastError;

use crate::error::ErrorCode;

pub use agent_host::RemoteAgentHost;
pub use d3d11_import::{D3D11Importer, SharedTexture};
pub use dialog::show_fatal_dialog;
pub use export_address::{export_rvas, module_entry, module_path};
pub use find_process_id::find_process_id;
pub use named_event::NamedEvent;
pub use named_mutex::NamedMutex;
pub use process_control::Win32ProcessControl;
pub use safe_handle::SafeHandle;

/// The Win32 code inside an error, or the raw HRESULT when it isn't one.
pub fn error_code(err: &windows::core::Error) -> ErrorCode {
    let hr = err.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

pub fn last_error() -> ErrorCode {
    unsafe { GetLastError() }.0
}
