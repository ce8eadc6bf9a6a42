//! Contract between the consumer and the agent injected into the game.
//!
//! Every agent export has the thread-start shape
//! `extern "system" fn(*mut c_void) -> u32` so it can be run with a remote
//! thread and its 32-bit result read back as the thread exit code.

use crate::{
    error::{ErrorCode, HookError},
    hooks::{CallPolicy, ExportName},
};

pub const SETUP_MUTEX_NAME: &str = "KatangaSetupMutex";
pub const FRAME_EVENT_NAME: &str = "KatangaFrameEvent";

/// Results with this bit set carry a Win32 error code instead of a value.
pub const ERROR_BIT: u32 = 0x8000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentExport {
    GetSharedHandle,
    GetWidth,
    GetHeight,
    GetPixelFormat,
    InstallHook,
    AttachHook,
    ArmHook,
}

impl AgentExport {
    pub const ALL: [AgentExport; 7] = [
        AgentExport::GetSharedHandle,
        AgentExport::GetWidth,
        AgentExport::GetHeight,
        AgentExport::GetPixelFormat,
        AgentExport::InstallHook,
        AgentExport::AttachHook,
        AgentExport::ArmHook,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AgentExport::GetSharedHandle => "GetSharedHandle",
            AgentExport::GetWidth => "GetWidth",
            AgentExport::GetHeight => "GetHeight",
            AgentExport::GetPixelFormat => "GetPixelFormat",
            AgentExport::InstallHook => "InstallHook",
            AgentExport::AttachHook => "AttachHook",
            AgentExport::ArmHook => "ArmHook",
        }
    }
}

pub fn encode_error(code: ErrorCode) -> u32 {
    ERROR_BIT | (code & !ERROR_BIT)
}

pub fn decode_status(raw: u32) -> Result<u32, ErrorCode> {
    if raw & ERROR_BIT != 0 {
        Err(raw & !ERROR_BIT)
    } else {
        Ok(raw)
    }
}

pub const HOOK_NAME_CAPACITY: usize = 124;

/// Written into the target's memory and passed to `InstallHook` by address.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookRequest {
    pub policy: u32,
    pub name: [u8; HOOK_NAME_CAPACITY],
}

impl HookRequest {
    pub fn new(export: &ExportName, policy: CallPolicy) -> Result<Self, HookError> {
        let text = export.to_string();
        // keep room for the terminating NUL
        if text.len() >= HOOK_NAME_CAPACITY || text.contains('\0') {
            return Err(HookError::NameTooLong(text));
        }
        let mut name = [0u8; HOOK_NAME_CAPACITY];
        name[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self {
            policy: policy.to_raw(),
            name,
        })
    }

    pub fn decode(&self) -> Result<(ExportName, CallPolicy), HookError> {
        let lossy = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        let len = self
            .name
            .iter()
            .position(|&x| x == 0)
            .ok_or_else(|| HookError::NameTooLong(lossy(&self.name)))?;
        let text = std::str::from_utf8(&self.name[..len])
            .map_err(|_| HookError::MalformedName(lossy(&self.name[..len])))?;
        let export = text.parse()?;
        let policy = CallPolicy::from_raw(self.policy).ok_or_else(|| {
            HookError::MalformedName(format!("{} (policy {})", text, self.policy))
        })?;
        Ok((export, policy))
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C), plain integers, no padding between u32 and a u8 array of 4n bytes
        unsafe {
            std::slice::from_raw_parts(
                self as *const Self as *const u8,
                std::mem::size_of::<Self>(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_is_fixed() {
        assert_eq!(std::mem::size_of::<HookRequest>(), 128);
        let request = HookRequest::new(
            &ExportName::new("D3D9.DLL", "Direct3DCreate9"),
            CallPolicy::PreCall,
        )
        .unwrap();
        let bytes = request.as_bytes();
        assert_eq!(&bytes[..4], &1u32.to_ne_bytes());
        assert_eq!(&bytes[4..28], b"D3D9.DLL!Direct3DCreate9");
        assert_eq!(bytes[28], 0);
    }

    #[test]
    fn request_decodes_on_the_agent_side() {
        let export = ExportName::new("dxgi.dll", "CreateDXGIFactory1");
        let request = HookRequest::new(&export, CallPolicy::PostCall).unwrap();
        let (decoded, policy) = request.decode().unwrap();
        assert_eq!(decoded, export);
        assert_eq!(policy, CallPolicy::PostCall);
    }

    #[test]
    fn overlong_names_are_refused_up_front() {
        let export = ExportName::new("D3D11.DLL", &"x".repeat(HOOK_NAME_CAPACITY));
        assert!(matches!(
            HookRequest::new(&export, CallPolicy::Both),
            Err(HookError::NameTooLong(_))
        ));
    }

    #[test]
    fn garbage_requests_do_not_decode() {
        let mut request =
            HookRequest::new(&ExportName::new("A.DLL", "B"), CallPolicy::Both).unwrap();
        request.policy = 9;
        assert!(request.decode().is_err());
        request.name = [b'a'; HOOK_NAME_CAPACITY];
        assert!(request.decode().is_err());
    }

    #[test]
    fn status_separates_values_from_error_codes() {
        assert_eq!(decode_status(7), Ok(7));
        assert_eq!(decode_status(encode_error(127)), Err(127));
        assert_eq!(encode_error(127), 0x8000_007F);
    }

    #[test]
    fn export_names_are_unique() {
        let mut names = AgentExport::ALL.map(|x| x.name()).to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), AgentExport::ALL.len());
    }
}
