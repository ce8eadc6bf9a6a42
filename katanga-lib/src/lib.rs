pub mod abi;
pub mod config;
pub mod error;
pub mod frame_sync;
pub mod hooks;
pub mod launch_params;
pub mod launcher;
pub mod liveness;
pub mod pixel_format;
pub mod process;
pub mod session;
pub mod setup_lock;
pub mod surface;
#[cfg(target_os = "windows")]
pub mod win32;
