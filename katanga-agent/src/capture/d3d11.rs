use std::sync::Mutex;

use katanga_lib::surface::RawSurfaceDesc;
use windows::{
    core::{Error, Interface},
    Win32::{
        Foundation::{E_FAIL, HANDLE},
        Graphics::{
            Direct3D11::{
                ID3D11Device, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET,
                D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED, D3D11_TEXTURE2D_DESC,
                D3D11_USAGE_DEFAULT,
            },
            Dxgi::{Common::DXGI_SAMPLE_DESC, IDXGIResource, IDXGISwapChain, DXGI_ERROR_UNSUPPORTED},
        },
    },
};

use crate::{
    formats::shareable_dxgi,
    state::{agent, lock, Agent},
};

use super::{recovered, report, swap_surface, withdraw, Source};

struct SharedCopy {
    source: Source,
    texture: ID3D11Texture2D,
}

// only touched by whichever thread presents, under SHARED
unsafe impl Send for SharedCopy {}

static SHARED: Mutex<Option<SharedCopy>> = Mutex::new(None);

pub fn on_present(swap_chain: &IDXGISwapChain) {
    let Some(agent) = agent() else {
        return;
    };
    agent.pace();
    match copy_frame(agent, swap_chain) {
        Ok(()) => recovered(),
        Err(err) => report(&err),
    }
}

/// Before the swap chain buffers change size.
pub fn on_resize() {
    if let Some(agent) = agent() {
        withdraw(agent, &mut *lock(&SHARED));
    }
}

fn copy_frame(agent: &Agent, swap_chain: &IDXGISwapChain) -> windows::core::Result<()> {
    let backbuffer: ID3D11Texture2D = unsafe { swap_chain.GetBuffer(0) }?;
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { backbuffer.GetDesc(&mut desc) };
    // CopySubresourceRegion cannot resolve
    if desc.SampleDesc.Count > 1 {
        return Err(DXGI_ERROR_UNSUPPORTED.into());
    }
    let format = shareable_dxgi(desc.Format.0 as u32).ok_or(Error::from(DXGI_ERROR_UNSUPPORTED))?;
    let device: ID3D11Device = unsafe { swap_chain.GetDevice() }?;
    let source = Source {
        device: device.as_raw() as usize,
        width: desc.Width,
        height: desc.Height,
        format,
    };

    let mut shared = lock(&SHARED);
    if shared.as_ref().map(|x| x.source) != Some(source) {
        swap_surface(agent, &mut *shared, || create_shared(&device, source, desc))?;
    }
    let Some(copy) = shared.as_ref() else {
        return Ok(());
    };
    let context = unsafe { device.GetImmediateContext() }?;
    for left in [0, desc.Width] {
        unsafe {
            context.CopySubresourceRegion(&copy.texture, 0, left, 0, 0, &backbuffer, 0, None)
        };
    }
    // the consumer reads through another device
    unsafe { context.Flush() };
    Ok(())
}

fn create_shared(
    device: &ID3D11Device,
    source: Source,
    backbuffer: D3D11_TEXTURE2D_DESC,
) -> windows::core::Result<(SharedCopy, HANDLE, RawSurfaceDesc)> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: source.width * 2,
        Height: source.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: backbuffer.Format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
    };
    let mut texture = None::<ID3D11Texture2D>;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }?;
    let texture = texture.ok_or(Error::from(E_FAIL))?;
    let handle = unsafe { texture.cast::<IDXGIResource>()?.GetSharedHandle() }?;
    Ok((
        SharedCopy { source, texture },
        handle,
        RawSurfaceDesc {
            width: desc.Width,
            height: desc.Height,
            format: source.format,
        },
    ))
}
