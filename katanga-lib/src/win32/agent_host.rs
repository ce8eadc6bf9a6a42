use std::{
    collections::HashMap,
    ffi::c_void,
    mem::transmute,
    path::{Path, PathBuf},
    ptr,
    task::Poll,
    time::Duration,
};

use tracing::{debug, trace, warn};
use windows::{
    core::{s, w, HSTRING},
    Win32::{
        Foundation::{
            ERROR_BAD_EXE_FORMAT, ERROR_DLL_INIT_FAILED, ERROR_FILE_NOT_FOUND,
            ERROR_INVALID_HANDLE, ERROR_INVALID_STATE, ERROR_PROC_NOT_FOUND, ERROR_TIMEOUT, FALSE,
            WAIT_OBJECT_0, WAIT_TIMEOUT,
        },
        System::{
            LibraryLoader::{GetModuleHandleW, GetProcAddress},
            Threading::{
                CreateRemoteThread, GetExitCodeThread, OpenProcess, WaitForSingleObject,
                INFINITE, LPTHREAD_START_ROUTINE, PROCESS_ALL_ACCESS,
            },
        },
    },
};

use crate::{
    abi::AgentExport,
    error::{ErrorCode, HookError},
    hooks::{AgentHost, AgentModule, CallArg},
    process::{Bitness, TargetProcess},
};

use super::{
    error_code,
    export_address::{export_rvas, image_bitness, module_entry, module_path},
    last_error,
    process_control::own_bitness,
    remote_memory::VirtualAllocatedMem,
    safe_handle::SafeHandle,
};

struct Attached {
    pid: u32,
    process: SafeHandle,
    rvas: HashMap<AgentExport, u32>,
}

/// A `LoadLibraryW` thread still running in the target.
struct Loading {
    pid: u32,
    bitness: Bitness,
    path: PathBuf,
    process: SafeHandle,
    thread: SafeHandle,
    /// The path the thread reads. Left allocated if the load is abandoned.
    remote_path: usize,
}

/// Runs agent exports in the target on remote threads. One target at a time.
pub struct RemoteAgentHost {
    loading: Option<Loading>,
    attached: Option<Attached>,
    call_timeout: Duration,
}

impl RemoteAgentHost {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            loading: None,
            attached: None,
            call_timeout,
        }
    }
}

fn start_remote_thread(
    process: &SafeHandle,
    start: usize,
    param: *const c_void,
) -> Result<SafeHandle, ErrorCode> {
    let thread = SafeHandle(
        unsafe {
            CreateRemoteThread(
                process.0,
                None,
                0,
                transmute::<usize, LPTHREAD_START_ROUTINE>(start),
                Some(param),
                0,
                None,
            )
        }
        .map_err(|err| error_code(&err))?,
    );
    Ok(thread)
}

/// The thread's exit code, or `ERROR_TIMEOUT` while it still runs.
fn wait_remote_thread(thread: &SafeHandle, timeout_ms: u32) -> Result<u32, ErrorCode> {
    let wait = unsafe { WaitForSingleObject(thread.0, timeout_ms) };
    if wait == WAIT_TIMEOUT {
        return Err(ERROR_TIMEOUT.0);
    }
    if wait != WAIT_OBJECT_0 {
        return Err(last_error());
    }
    let mut exit_code = 0u32;
    unsafe { GetExitCodeThread(thread.0, &mut exit_code) }.map_err(|err| error_code(&err))?;
    Ok(exit_code)
}

fn run_remote_thread(
    process: &SafeHandle,
    start: usize,
    param: *const c_void,
    timeout_ms: u32,
) -> Result<u32, ErrorCode> {
    let thread = start_remote_thread(process, start, param)?;
    wait_remote_thread(&thread, timeout_ms)
}

/// Address of `LoadLibraryW` inside the target. A process created suspended
/// has no kernel32 in its module list yet; with matching bitness the system
/// maps it at the same address as ours.
fn load_library_w_addr(pid: u32, bitness: Bitness) -> windows::core::Result<usize> {
    match module_entry(pid, "KERNEL32.DLL") {
        Ok(me) => {
            let path = module_path(&me);
            let rva = export_rvas(Path::new(&path), &["LoadLibraryW"])?[0]
                .ok_or_else(|| windows::core::Error::from(ERROR_PROC_NOT_FOUND.to_hresult()))?;
            Ok(me.modBaseAddr as usize + rva as usize)
        }
        Err(err) if bitness == own_bitness() => {
            debug!("kernel32 not listed in {} yet ({}), using ours", pid, err);
            let kernel32 = unsafe { GetModuleHandleW(w!("kernel32.dll")) }?;
            unsafe { GetProcAddress(kernel32, s!("LoadLibraryW")) }
                .map(|x| x as usize)
                .ok_or_else(windows::core::Error::from_win32)
        }
        Err(err) => Err(err),
    }
}

/// Why the agent is missing from the target after `LoadLibraryW` returned.
/// The thread exit code carries no error.
fn load_failure_code(path: &Path, target: Bitness) -> ErrorCode {
    match image_bitness(path) {
        Ok(image) if image != target => ERROR_BAD_EXE_FORMAT.0,
        // it is loadable, so its initialization refused
        Ok(_) => ERROR_DLL_INIT_FAILED.0,
        Err(err) => error_code(&err),
    }
}

fn nul_terminated_wide_bytes(path: &Path) -> Vec<u8> {
    HSTRING::from(path)
        .as_wide()
        .iter()
        .chain([0u16].iter())
        .flat_map(|x| x.to_ne_bytes())
        .collect()
}

impl RemoteAgentHost {
    fn finish_load(
        &mut self,
        loading: Loading,
        exit_code: Result<u32, ErrorCode>,
    ) -> Result<AgentModule, HookError> {
        let fail = |code: ErrorCode| HookError::AgentLoad {
            path: loading.path.clone(),
            code,
        };
        // only the low half of the module handle survives as exit code
        let exit_code = exit_code.map_err(fail)?;
        trace!("LoadLibraryW exited with {:#x}", exit_code);
        let file_name = loading
            .path
            .file_name()
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_default();
        let me = match module_entry(loading.pid, &file_name) {
            Ok(me) => me,
            Err(err) => {
                debug!("{} is not loaded in {}: {}", file_name, loading.pid, err);
                return Err(fail(load_failure_code(&loading.path, loading.bitness)));
            }
        };
        let names: Vec<&str> = AgentExport::ALL.iter().map(|x| x.name()).collect();
        let found = export_rvas(&loading.path, &names).map_err(|err| fail(error_code(&err)))?;
        let mut rvas = HashMap::new();
        for (export, rva) in AgentExport::ALL.into_iter().zip(found) {
            let rva = rva.ok_or(HookError::AgentCall {
                name: export.name(),
                code: ERROR_PROC_NOT_FOUND.0,
            })?;
            trace!("{} at +{:#x}", export.name(), rva);
            rvas.insert(export, rva);
        }

        self.attached = Some(Attached {
            pid: loading.pid,
            process: loading.process,
            rvas,
        });
        Ok(AgentModule::new(
            loading.path,
            loading.pid,
            me.modBaseAddr as usize,
        ))
    }
}

impl AgentHost for RemoteAgentHost {
    fn start_load(&mut self, process: &TargetProcess, path: &Path) -> Result<(), HookError> {
        let fail = |code: ErrorCode| HookError::AgentLoad {
            path: path.to_owned(),
            code,
        };
        if !path.is_file() {
            return Err(fail(ERROR_FILE_NOT_FOUND.0));
        }
        let pid = process.pid();
        let handle = SafeHandle(
            unsafe { OpenProcess(PROCESS_ALL_ACCESS, FALSE, pid) }
                .map_err(|err| fail(error_code(&err)))?,
        );

        let load_library_w_addr =
            load_library_w_addr(pid, process.bitness()).map_err(|err| fail(error_code(&err)))?;
        let remote_path = VirtualAllocatedMem::with_bytes(&handle, &nul_terminated_wide_bytes(path))
            .map_err(|err| fail(error_code(&err)))?;
        let thread =
            start_remote_thread(&handle, load_library_w_addr, remote_path.addr).map_err(fail)?;
        let remote_path = remote_path.leak() as usize;

        self.attached = None;
        self.loading = Some(Loading {
            pid,
            bitness: process.bitness(),
            path: path.to_owned(),
            process: handle,
            thread,
            remote_path,
        });
        Ok(())
    }

    fn poll_load(&mut self) -> Poll<Result<AgentModule, HookError>> {
        let Some(loading) = self.loading.take() else {
            return Poll::Ready(Err(HookError::AgentLoad {
                path: PathBuf::new(),
                code: ERROR_INVALID_STATE.0,
            }));
        };
        // DllMain runs on this thread
        let exit_code = match wait_remote_thread(&loading.thread, 0) {
            Err(code) if code == ERROR_TIMEOUT.0 => {
                self.loading = Some(loading);
                return Poll::Pending;
            }
            other => other,
        };
        let remote_path = loading.remote_path as *mut c_void;
        drop(unsafe { VirtualAllocatedMem::from_leaked(&loading.process, remote_path) });
        Poll::Ready(self.finish_load(loading, exit_code))
    }

    fn call(
        &mut self,
        agent: &AgentModule,
        export: AgentExport,
        arg: CallArg<'_>,
    ) -> Result<u32, HookError> {
        let fail = |code: ErrorCode| HookError::AgentCall {
            name: export.name(),
            code,
        };
        let attached = self
            .attached
            .as_ref()
            .filter(|x| x.pid == agent.pid())
            .ok_or(fail(ERROR_INVALID_HANDLE.0))?;
        let rva = *attached
            .rvas
            .get(&export)
            .ok_or(fail(ERROR_PROC_NOT_FOUND.0))?;
        let start = agent.base() + rva as usize;
        let timeout_ms = u32::try_from(self.call_timeout.as_millis()).unwrap_or(INFINITE);
        match arg {
            CallArg::None => run_remote_thread(&attached.process, start, ptr::null(), timeout_ms),
            CallArg::Value(value) => run_remote_thread(
                &attached.process,
                start,
                value as usize as *const c_void,
                timeout_ms,
            ),
            CallArg::Request(request) => {
                let remote = VirtualAllocatedMem::with_bytes(&attached.process, request.as_bytes())
                    .map_err(|err| fail(error_code(&err)))?;
                let result = run_remote_thread(&attached.process, start, remote.addr, timeout_ms);
                if result == Err(ERROR_TIMEOUT.0) {
                    // the thread may still read the request
                    warn!("{} timed out, leaving its request in the target", export.name());
                    remote.leak();
                }
                result
            }
        }
        .map_err(fail)
    }
}

#[cfg(test)]
mod tests {
    use std::env::current_exe;

    use super::*;

    #[test]
    fn matching_image_reports_a_refused_initialization() {
        let exe = current_exe().unwrap();
        assert_eq!(load_failure_code(&exe, own_bitness()), ERROR_DLL_INIT_FAILED.0);
    }

    #[test]
    fn image_of_the_other_bitness_is_a_bad_format() {
        let exe = current_exe().unwrap();
        let other = match own_bitness() {
            Bitness::X86 => Bitness::X64,
            Bitness::X64 => Bitness::X86,
        };
        assert_eq!(load_failure_code(&exe, other), ERROR_BAD_EXE_FORMAT.0);
    }

    #[test]
    fn polling_without_a_load_is_an_error() {
        let mut host = RemoteAgentHost::new(Duration::from_secs(1));
        assert!(matches!(
            host.poll_load(),
            Poll::Ready(Err(HookError::AgentLoad { code, .. })) if code == ERROR_INVALID_STATE.0
        ));
    }
}
