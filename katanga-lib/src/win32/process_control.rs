use std::{
    collections::HashMap,
    mem::size_of,
    os::windows::process::CommandExt,
    path::Path,
    process::Command,
};

use tracing::debug;
use windows::{
    core::{HSTRING, PWSTR},
    Win32::{
        Foundation::{BOOL, ERROR_INVALID_HANDLE, FALSE},
        System::Threading::{
            CreateProcessW, IsWow64Process, OpenProcess, ResumeThread, CREATE_SUSPENDED,
            PROCESS_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION, STARTUPINFOW,
        },
    },
};

use crate::{
    error::LaunchError,
    hooks::ArmedHooks,
    process::{Bitness, ProcessControl, ResumeToken, SuspendedChild},
};

use super::{error_code, find_process_id::find_process_id, last_error, safe_handle::SafeHandle};

pub fn own_bitness() -> Bitness {
    if cfg!(target_pointer_width = "64") {
        Bitness::X64
    } else {
        Bitness::X86
    }
}

/// Keeps the primary thread handle of every suspended child until it is
/// resumed; the [`ResumeToken`] only names it.
#[derive(Default)]
pub struct Win32ProcessControl {
    suspended: HashMap<usize, (u32, SafeHandle)>,
}

impl Win32ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }
}

fn command_line(exe: &Path, args: &str) -> Vec<u16> {
    let line = if args.is_empty() {
        format!("\"{}\"", exe.display())
    } else {
        format!("\"{}\" {}", exe.display(), args)
    };
    line.encode_utf16().chain([0]).collect()
}

impl ProcessControl for Win32ProcessControl {
    fn create_suspended(
        &mut self,
        exe: &Path,
        args: &str,
        working_dir: &Path,
    ) -> Result<SuspendedChild, LaunchError> {
        let mut cmd = command_line(exe, args);
        let startup_info = STARTUPINFOW {
            cb: size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut process_info = PROCESS_INFORMATION::default();
        unsafe {
            CreateProcessW(
                &HSTRING::from(exe),
                PWSTR(cmd.as_mut_ptr()),
                None,
                None,
                FALSE,
                CREATE_SUSPENDED,
                None,
                &HSTRING::from(working_dir),
                &startup_info,
                &mut process_info,
            )
        }
        .map_err(|err| LaunchError::CreateProcess {
            path: exe.to_owned(),
            code: error_code(&err),
        })?;
        drop(SafeHandle(process_info.hProcess));

        let pid = process_info.dwProcessId;
        let raw_thread = process_info.hThread.0 as usize;
        debug!("{} suspended, thread {:#x}", pid, raw_thread);
        self.suspended
            .insert(raw_thread, (pid, SafeHandle(process_info.hThread)));
        Ok(SuspendedChild {
            pid,
            token: ResumeToken::new(raw_thread),
        })
    }

    fn spawn_detached(
        &mut self,
        program: &Path,
        args: &str,
        working_dir: &Path,
    ) -> Result<(), LaunchError> {
        let child = Command::new(program)
            .raw_arg(args)
            .current_dir(working_dir)
            .spawn()
            .map_err(|err| LaunchError::CreateProcess {
                path: program.to_owned(),
                code: err.raw_os_error().unwrap_or_default() as u32,
            })?;
        debug!("started {} as {}", program.display(), child.id());
        Ok(())
    }

    fn find_process_id(&self, exe_name: &str) -> Option<u32> {
        find_process_id(exe_name)
    }

    fn bitness(&self, pid: u32) -> Result<Bitness, LaunchError> {
        let process = SafeHandle(
            unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) }.map_err(
                |err| LaunchError::OpenProcess {
                    pid,
                    code: error_code(&err),
                },
            )?,
        );
        let mut wow64 = BOOL::default();
        unsafe { IsWow64Process(process.0, &mut wow64) }.map_err(|err| {
            LaunchError::OpenProcess {
                pid,
                code: error_code(&err),
            }
        })?;
        Ok(if wow64.as_bool() {
            Bitness::X86
        } else {
            own_bitness()
        })
    }

    fn resume(&mut self, token: ResumeToken, armed: &ArmedHooks) -> Result<(), LaunchError> {
        let Some((pid, thread)) = self.suspended.remove(&token.raw_thread()) else {
            return Err(LaunchError::Resume {
                pid: 0,
                code: ERROR_INVALID_HANDLE.0,
            });
        };
        debug!("resuming {} with {} hooks armed", pid, armed.len());
        if unsafe { ResumeThread(thread.0) } == u32::MAX {
            return Err(LaunchError::Resume {
                pid,
                code: last_error(),
            });
        }
        Ok(())
    }
}
