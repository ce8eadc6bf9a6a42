use std::{io, path::PathBuf};

use crate::hooks::ExportName;

/// Win32 style extended error code. Zero is never produced for a failure.
pub type ErrorCode = u32;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("No game specified to launch.")]
    NoGame,
    #[error("Game executable not found: {}", .0.display())]
    GameNotFound(PathBuf),
    #[error("Store launcher not found: {}", .0.display())]
    StoreLauncherNotFound(PathBuf),
    #[error("Store launch requires an app id")]
    MissingAppId,
    #[error("Deferred launch requires a process name to wait for")]
    MissingWaitFor,
    #[error("Could not start {}: 0x{code:X}", .path.display())]
    CreateProcess { path: PathBuf, code: ErrorCode },
    #[error("Could not open process {pid}: 0x{code:X}")]
    OpenProcess { pid: u32, code: ErrorCode },
    #[error("Could not resume process {pid}: 0x{code:X}")]
    Resume { pid: u32, code: ErrorCode },
    #[error("Waiting for {0} was cancelled")]
    WaitCancelled(String),
    #[error("{0} never appeared")]
    WaitTimedOut(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Could not load {}: 0x{code:X}", .path.display())]
    AgentLoad { path: PathBuf, code: ErrorCode },
    #[error("Could not call agent export {name}: 0x{code:X}")]
    AgentCall { name: &'static str, code: ErrorCode },
    #[error("Could not install hook {export}: 0x{code:X}")]
    Install { export: ExportName, code: ErrorCode },
    #[error("Could not attach hook {export}: 0x{code:X}")]
    Attach { export: ExportName, code: ErrorCode },
    #[error("Could not arm hook {export}: 0x{code:X}")]
    Arm { export: ExportName, code: ErrorCode },
    #[error("Hook {0} is not attached")]
    NotAttached(ExportName),
    #[error("Export name too long: {0}")]
    NameTooLong(String),
    #[error("Malformed export name: {0}")]
    MalformedName(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Unknown pixel format: {0}")]
    UnknownPixelFormat(u32),
    #[error("Surface has no area: {width}x{height}")]
    EmptySurface { width: u32, height: u32 },
    #[error("Could not query surface: 0x{0:X}")]
    Query(ErrorCode),
    #[error("Could not open shared surface 0x{handle:X}: 0x{code:X}")]
    Import { handle: u32, code: ErrorCode },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Could not create {name}: 0x{code:X}")]
    Create { name: String, code: ErrorCode },
    #[error("Could not open {name}: 0x{code:X}")]
    Open { name: String, code: ErrorCode },
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("{name} failed: 0x{code:X}")]
    Signal { name: String, code: ErrorCode },
}

/// Why the target could not swap in a new shared surface.
#[derive(Debug, thiserror::Error)]
pub enum ReplaceError<E> {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Could not create the shared surface: {0}")]
    Create(E),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Could not parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Every failure that ends the session. One handler at the top reports these.
#[derive(Debug, thiserror::Error)]
pub enum KatangaError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_load_message_carries_path_and_code() {
        let err = KatangaError::from(HookError::AgentLoad {
            path: PathBuf::from(r"C:\katanga\katanga_agent64.dll"),
            code: 0xC1,
        });
        let msg = err.to_string();
        assert!(msg.contains("katanga_agent64.dll"));
        assert!(msg.contains("0xC1"));
    }

    #[test]
    fn unknown_format_message_carries_code() {
        let msg = SurfaceError::UnknownPixelFormat(2).to_string();
        assert_eq!(msg, "Unknown pixel format: 2");
    }
}
