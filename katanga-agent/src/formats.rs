use katanga_lib::pixel_format::PixelFormat;

/// DXGI code for a D3D9 backbuffer format, when the consumer can open it.
pub fn d3d9_to_dxgi(d3dformat: u32) -> Option<u32> {
    let code = match d3dformat {
        21 => 87, // A8R8G8B8
        22 => 88, // X8R8G8B8
        32 => 28, // A8B8G8R8
        31 => 24, // A2B10G10R10
        _ => return None,
    };
    Some(code)
}

/// DXGI backbuffer formats are shared as they are, if known.
pub fn shareable_dxgi(code: u32) -> Option<u32> {
    PixelFormat::from_code(code).ok().map(|x| x.code())
}
