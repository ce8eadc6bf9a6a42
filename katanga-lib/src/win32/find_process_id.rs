use std::mem::size_of;

use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};

use super::safe_handle::SafeHandle;

fn exe_file_name(pe: &PROCESSENTRY32W) -> String {
    let len = pe
        .szExeFile
        .iter()
        .position(|&x| x == 0)
        .unwrap_or(pe.szExeFile.len());
    String::from_utf16_lossy(&pe.szExeFile[..len])
}

fn find_process_id_in_snapshot(snapshot: SafeHandle, exe_file: &str) -> Option<u32> {
    let mut pe = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    unsafe { Process32FirstW(snapshot.0, &mut pe) }.ok()?;
    loop {
        if exe_file_name(&pe).eq_ignore_ascii_case(exe_file) {
            return Some(pe.th32ProcessID);
        }
        unsafe { Process32NextW(snapshot.0, &mut pe) }.ok()?;
    }
}

/// First process whose executable file name matches, ignoring case.
pub fn find_process_id(exe_file: &str) -> Option<u32> {
    let snapshot = SafeHandle(unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }.ok()?);
    find_process_id_in_snapshot(snapshot, exe_file)
}
