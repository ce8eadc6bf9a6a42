use std::ffi::c_void;

use tracing::{info, warn};
use windows::Win32::{
    Foundation::{E_FAIL, ERROR_INVALID_HANDLE, HANDLE, HMODULE},
    Graphics::{
        Direct3D::{D3D11_SRV_DIMENSION_TEXTURE2D, D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_11_0},
        Direct3D11::{
            D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11ShaderResourceView,
            ID3D11Texture2D, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
            D3D11_SHADER_RESOURCE_VIEW_DESC, D3D11_SHADER_RESOURCE_VIEW_DESC_0,
            D3D11_TEX2D_SRV, D3D11_TEXTURE2D_DESC,
        },
        Dxgi::Common::DXGI_FORMAT,
    },
};

use crate::{
    error::SurfaceError,
    surface::{SharedSurfaceHandle, SurfaceDesc, TextureImporter},
};

use super::error_code;

/// A shared surface opened on the consumer device, with the view used to
/// sample it.
pub struct SharedTexture {
    pub texture: ID3D11Texture2D,
    pub view: ID3D11ShaderResourceView,
}

/// The consumer's own D3D11 device, used only to open what the agent shares.
pub struct D3D11Importer {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3D11Importer {
    pub fn new() -> windows::core::Result<Self> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&[D3D_FEATURE_LEVEL_11_0]),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }?;
        let (Some(device), Some(context)) = (device, context) else {
            return Err(E_FAIL.into());
        };
        info!("consumer device ready");
        Ok(Self { device, context })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }
}

impl TextureImporter for D3D11Importer {
    type Texture = SharedTexture;

    fn import(
        &mut self,
        handle: SharedSurfaceHandle,
        desc: &SurfaceDesc,
    ) -> Result<SharedTexture, SurfaceError> {
        let fail = |code| SurfaceError::Import {
            handle: handle.raw(),
            code,
        };
        let mut texture = None::<ID3D11Texture2D>;
        unsafe {
            self.device.OpenSharedResource(
                HANDLE(handle.raw() as usize as *mut c_void),
                &mut texture,
            )
        }
        .map_err(|err| fail(error_code(&err)))?;
        let texture = texture.ok_or_else(|| fail(ERROR_INVALID_HANDLE.0))?;

        let mut actual = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut actual) };
        if actual.Width != desc.width() || actual.Height != desc.height() {
            warn!(
                "surface {} is {}x{}, agent reported {}x{}",
                handle,
                actual.Width,
                actual.Height,
                desc.width(),
                desc.height()
            );
        }

        let view_desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT(desc.format().code() as i32),
            ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                },
            },
        };
        let mut view = None::<ID3D11ShaderResourceView>;
        unsafe {
            self.device
                .CreateShaderResourceView(&texture, Some(&view_desc), Some(&mut view))
        }
        .map_err(|err| fail(error_code(&err)))?;
        let view = view.ok_or_else(|| fail(ERROR_INVALID_HANDLE.0))?;
        Ok(SharedTexture { texture, view })
    }
}
