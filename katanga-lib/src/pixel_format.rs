use crate::error::SurfaceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgba8,
    Bgra8,
    /// Alpha byte present but meaningless.
    Bgrx8,
    Rgb10a2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    Linear,
    Srgb,
}

/// A shared surface format the consumer knows how to sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    code: u32,
    order: ChannelOrder,
    space: ColorSpace,
}

const fn entry(code: u32, order: ChannelOrder, space: ColorSpace) -> PixelFormat {
    PixelFormat { code, order, space }
}

/// DXGI_FORMAT values a game swap chain is shared with.
const TABLE: [PixelFormat; 7] = [
    entry(24, ChannelOrder::Rgb10a2, ColorSpace::Linear), // R10G10B10A2_UNORM
    entry(28, ChannelOrder::Rgba8, ColorSpace::Linear),   // R8G8B8A8_UNORM
    entry(29, ChannelOrder::Rgba8, ColorSpace::Srgb),     // R8G8B8A8_UNORM_SRGB
    entry(87, ChannelOrder::Bgra8, ColorSpace::Linear),   // B8G8R8A8_UNORM
    entry(88, ChannelOrder::Bgrx8, ColorSpace::Linear),   // B8G8R8X8_UNORM
    entry(91, ChannelOrder::Bgra8, ColorSpace::Srgb),     // B8G8R8A8_UNORM_SRGB
    entry(93, ChannelOrder::Bgrx8, ColorSpace::Srgb),     // B8G8R8X8_UNORM_SRGB
];

impl PixelFormat {
    pub fn from_code(code: u32) -> Result<Self, SurfaceError> {
        TABLE
            .iter()
            .find(|x| x.code == code)
            .copied()
            .ok_or(SurfaceError::UnknownPixelFormat(code))
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn space(&self) -> ColorSpace {
        self.space
    }

    /// The same layout with the sRGB flag dropped, for typeless views.
    pub fn linear_code(&self) -> u32 {
        match self.code {
            29 => 28,
            91 => 87,
            93 => 88,
            code => code,
        }
    }
}
