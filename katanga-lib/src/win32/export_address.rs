use std::{
    ffi::{c_char, CStr},
    mem::size_of,
    path::Path,
};

use tracing::warn;
use windows::{
    core::{Result, HSTRING, PCWSTR},
    Win32::{
        Foundation::{BOOLEAN, ERROR_BAD_EXE_FORMAT, ERROR_MOD_NOT_FOUND, HANDLE},
        Storage::FileSystem::{
            CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_READ, FILE_SHARE_READ, OPEN_EXISTING,
        },
        System::{
            Diagnostics::{
                Debug::{
                    ImageDirectoryEntryToDataEx, ImageNtHeader, ImageRvaToVa,
                    IMAGE_DIRECTORY_ENTRY_EXPORT,
                },
                ToolHelp::{
                    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W,
                    TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
                },
            },
            Memory::{
                CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ,
                MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READONLY,
            },
            SystemInformation::{IMAGE_FILE_MACHINE_AMD64, IMAGE_FILE_MACHINE_I386},
            SystemServices::IMAGE_EXPORT_DIRECTORY,
        },
    },
};

use crate::process::Bitness;

use super::safe_handle::SafeHandle;

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&x| x == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// A module loaded in another process, found by file name ignoring case.
pub fn module_entry(process_id: u32, module_name: &str) -> Result<MODULEENTRY32W> {
    let snapshot = SafeHandle(unsafe {
        CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, process_id)
    }?);

    let mut me = MODULEENTRY32W {
        dwSize: size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };

    unsafe { Module32FirstW(snapshot.0, &mut me) }?;
    loop {
        if wide_to_string(&me.szModule).eq_ignore_ascii_case(module_name) {
            return Ok(me);
        }
        if unsafe { Module32NextW(snapshot.0, &mut me) }.is_err() {
            return Err(ERROR_MOD_NOT_FOUND.to_hresult().into());
        }
    }
}

pub fn module_path(me: &MODULEENTRY32W) -> String {
    wide_to_string(&me.szExePath)
}

struct ViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS);

impl ViewOfFile {
    fn map(path: &Path) -> Result<Self> {
        let file = SafeHandle(unsafe {
            CreateFileW(
                &HSTRING::from(path),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                HANDLE::default(),
            )
        }?);
        let file_mapping = SafeHandle(unsafe {
            CreateFileMappingW(file.0, None, PAGE_READONLY, 0, 0, PCWSTR::null())
        }?);
        let view = unsafe { MapViewOfFile(file_mapping.0, FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            return Err(windows::core::Error::from_win32());
        }
        Ok(Self(view))
    }
}

impl Drop for ViewOfFile {
    fn drop(&mut self) {
        if let Err(err) = unsafe { UnmapViewOfFile(self.0) } {
            warn!("UnmapViewOfFile failed: {}", err);
        }
    }
}

fn bad_image() -> windows::core::Error {
    ERROR_BAD_EXE_FORMAT.to_hresult().into()
}

fn export_rvas_in_view(base: &ViewOfFile, names: &[&str]) -> Result<Vec<Option<u32>>> {
    let nt_hdrs = unsafe { ImageNtHeader(base.0.Value) };
    if nt_hdrs.is_null() {
        return Err(bad_image());
    }
    let mut exp_size: u32 = Default::default();
    let exp = unsafe {
        ImageDirectoryEntryToDataEx(
            base.0.Value,
            BOOLEAN::from(false),
            IMAGE_DIRECTORY_ENTRY_EXPORT,
            &mut exp_size,
            None,
        )
    } as *const IMAGE_EXPORT_DIRECTORY;
    if exp.is_null() {
        return Err(bad_image());
    }
    let exp = unsafe { *exp };
    let rva_to_va = |rva: u32| unsafe { ImageRvaToVa(nt_hdrs, base.0.Value, rva, None) };
    let addr_of_names = rva_to_va(exp.AddressOfNames) as *const u32;
    let addr_of_name_ordinals = rva_to_va(exp.AddressOfNameOrdinals) as *const u16;
    let addr_of_funcs = rva_to_va(exp.AddressOfFunctions) as *const u32;
    if addr_of_names.is_null() || addr_of_name_ordinals.is_null() || addr_of_funcs.is_null() {
        return Err(bad_image());
    }

    let exported: Vec<&[u8]> = (0..exp.NumberOfNames as usize)
        .map(|x| {
            let name = rva_to_va(unsafe { *addr_of_names.add(x) }) as *const c_char;
            if name.is_null() {
                return &[][..];
            }
            unsafe { CStr::from_ptr(name) }.to_bytes()
        })
        .collect();

    Ok(names
        .iter()
        .map(|wanted| {
            let idx = exported.iter().position(|x| *x == wanted.as_bytes())?;
            let ordinal = unsafe { *addr_of_name_ordinals.add(idx) } as usize;
            Some(unsafe { *addr_of_funcs.add(ordinal) })
        })
        .collect())
}

/// RVAs of named exports, read from the file on disk so the image does not
/// need to be loaded here. Works for 32-bit images from a 64-bit process.
pub fn export_rvas(path: &Path, names: &[&str]) -> Result<Vec<Option<u32>>> {
    let base = ViewOfFile::map(path)?;
    export_rvas_in_view(&base, names)
}

/// Which processes can load the image at `path`.
pub fn image_bitness(path: &Path) -> Result<Bitness> {
    let base = ViewOfFile::map(path)?;
    let nt_hdrs = unsafe { ImageNtHeader(base.0.Value) };
    if nt_hdrs.is_null() {
        return Err(bad_image());
    }
    // the file header sits at the same offset in 32 and 64-bit images
    match unsafe { (*nt_hdrs).FileHeader.Machine } {
        IMAGE_FILE_MACHINE_I386 => Ok(Bitness::X86),
        IMAGE_FILE_MACHINE_AMD64 => Ok(Bitness::X64),
        _ => Err(bad_image()),
    }
}
