use std::sync::Mutex;

use katanga_lib::surface::RawSurfaceDesc;
use windows::{
    core::{Error, Interface},
    Win32::{
        Foundation::{E_FAIL, HANDLE, RECT},
        Graphics::Direct3D9::{
            IDirect3DDevice9, IDirect3DSurface9, IDirect3DTexture9, D3DBACKBUFFER_TYPE_MONO,
            D3DERR_NOTAVAILABLE, D3DPOOL_DEFAULT, D3DSURFACE_DESC, D3DTEXF_NONE,
            D3DUSAGE_RENDERTARGET,
        },
    },
};

use crate::{
    formats::d3d9_to_dxgi,
    state::{agent, lock, Agent},
};

use super::{recovered, report, swap_surface, withdraw, Source};

struct SharedCopy {
    source: Source,
    // keeps the texture alive; the copies go through its top level
    _texture: IDirect3DTexture9,
    surface: IDirect3DSurface9,
}

unsafe impl Send for SharedCopy {}

static SHARED: Mutex<Option<SharedCopy>> = Mutex::new(None);

pub fn on_present(device: &IDirect3DDevice9) {
    let Some(agent) = agent() else {
        return;
    };
    agent.pace();
    match copy_frame(agent, device) {
        Ok(()) => recovered(),
        Err(err) => report(&err),
    }
}

/// Before the device resets. Default pool resources must be gone by then.
pub fn on_reset() {
    if let Some(agent) = agent() {
        withdraw(agent, &mut *lock(&SHARED));
    }
}

fn copy_frame(agent: &Agent, device: &IDirect3DDevice9) -> windows::core::Result<()> {
    let backbuffer = unsafe { device.GetBackBuffer(0, 0, D3DBACKBUFFER_TYPE_MONO) }?;
    let mut desc = D3DSURFACE_DESC::default();
    unsafe { backbuffer.GetDesc(&mut desc) }?;
    let format = d3d9_to_dxgi(desc.Format.0).ok_or(Error::from(D3DERR_NOTAVAILABLE))?;
    let source = Source {
        device: device.as_raw() as usize,
        width: desc.Width,
        height: desc.Height,
        format,
    };

    let mut shared = lock(&SHARED);
    if shared.as_ref().map(|x| x.source) != Some(source) {
        swap_surface(agent, &mut *shared, || create_shared(device, source, &desc))?;
    }
    let Some(copy) = shared.as_ref() else {
        return Ok(());
    };
    // StretchRect also resolves multisampled backbuffers
    for left in [0, desc.Width as i32] {
        let half = RECT {
            left,
            top: 0,
            right: left + desc.Width as i32,
            bottom: desc.Height as i32,
        };
        unsafe {
            device.StretchRect(
                &backbuffer,
                std::ptr::null(),
                &copy.surface,
                &half,
                D3DTEXF_NONE,
            )
        }?;
    }
    Ok(())
}

/// Only Ex devices hand out a share handle here.
fn create_shared(
    device: &IDirect3DDevice9,
    source: Source,
    backbuffer: &D3DSURFACE_DESC,
) -> windows::core::Result<(SharedCopy, HANDLE, RawSurfaceDesc)> {
    let mut texture = None::<IDirect3DTexture9>;
    let mut handle = HANDLE::default();
    unsafe {
        device.CreateTexture(
            source.width * 2,
            source.height,
            1,
            D3DUSAGE_RENDERTARGET as u32,
            backbuffer.Format,
            D3DPOOL_DEFAULT,
            &mut texture,
            &mut handle,
        )
    }?;
    let texture = texture.ok_or(Error::from(E_FAIL))?;
    if handle.is_invalid() {
        return Err(D3DERR_NOTAVAILABLE.into());
    }
    let surface = unsafe { texture.GetSurfaceLevel(0) }?;
    Ok((
        SharedCopy {
            source,
            _texture: texture,
            surface,
        },
        handle,
        RawSurfaceDesc {
            width: source.width * 2,
            height: source.height,
            format: source.format,
        },
    ))
}
