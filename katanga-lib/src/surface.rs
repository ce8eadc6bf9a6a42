mod broker;
mod publisher;

use std::fmt;

use getset::CopyGetters;

use crate::{
    error::{KatangaError, SurfaceError},
    pixel_format::PixelFormat,
};

pub use broker::{SurfaceBroker, SurfaceUpdate};
pub use publisher::{PublishedSurface, SurfacePublisher, Teardown};

/// Raw value of a cross-process shareable texture handle. Zero means nothing
/// is published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SharedSurfaceHandle(u32);

impl SharedSurfaceHandle {
    pub const NONE: Self = Self(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SharedSurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What the target reports about its surface before the format is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: u32,
}

/// A double-wide side-by-side surface: left eye in the left half.
#[derive(Clone, Copy, CopyGetters, Debug, PartialEq, Eq)]
#[getset(get_copy = "pub")]
pub struct SurfaceDesc {
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl SurfaceDesc {
    pub fn from_raw(raw: RawSurfaceDesc) -> Result<Self, SurfaceError> {
        if raw.width == 0 || raw.height == 0 {
            return Err(SurfaceError::EmptySurface {
                width: raw.width,
                height: raw.height,
            });
        }
        Ok(Self {
            width: raw.width,
            height: raw.height,
            format: PixelFormat::from_code(raw.format)?,
        })
    }

    pub fn eye_width(&self) -> u32 {
        self.width / 2
    }

    /// Per-eye aspect ratio, `(W/2)/H`.
    pub fn aspect_ratio(&self) -> f32 {
        (self.width as f32 / 2.0) / self.height as f32
    }
}

/// Where the consumer reads the published handle from.
pub trait SurfaceSource {
    fn shared_handle(&mut self) -> Result<SharedSurfaceHandle, KatangaError>;

    fn describe(&mut self) -> Result<RawSurfaceDesc, KatangaError>;
}

/// Source for runs without a game. Never publishes.
#[derive(Debug, Default)]
pub struct NoSurface;

impl SurfaceSource for NoSurface {
    fn shared_handle(&mut self) -> Result<SharedSurfaceHandle, KatangaError> {
        Ok(SharedSurfaceHandle::NONE)
    }

    fn describe(&mut self) -> Result<RawSurfaceDesc, KatangaError> {
        Ok(RawSurfaceDesc::default())
    }
}

/// Opens a shared handle on the consumer's device.
pub trait TextureImporter {
    type Texture;

    fn import(
        &mut self,
        handle: SharedSurfaceHandle,
        desc: &SurfaceDesc,
    ) -> Result<Self::Texture, SurfaceError>;
}

/// A consumer-side texture bound to exactly one published handle. Replaced,
/// never patched, when the handle changes.
#[derive(CopyGetters, Debug)]
pub struct ImportedTexture<T> {
    #[getset(get_copy = "pub")]
    handle: SharedSurfaceHandle,
    #[getset(get_copy = "pub")]
    desc: SurfaceDesc,
    #[getset(get_copy = "pub")]
    generation: u64,
    texture: T,
}

impl<T> ImportedTexture<T> {
    pub fn texture(&self) -> &T {
        &self.texture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_is_per_eye() {
        let desc = SurfaceDesc::from_raw(RawSurfaceDesc {
            width: 3200,
            height: 900,
            format: 28,
        })
        .unwrap();
        assert_eq!(desc.eye_width(), 1600);
        assert!((desc.aspect_ratio() - 1600.0 / 900.0).abs() < 1e-6);
    }

    #[test]
    fn zero_area_is_rejected() {
        let raw = RawSurfaceDesc {
            width: 0,
            height: 900,
            format: 28,
        };
        assert!(matches!(
            SurfaceDesc::from_raw(raw),
            Err(SurfaceError::EmptySurface { .. })
        ));
    }

    #[test]
    fn no_surface_is_always_zero() {
        let mut source = NoSurface;
        for _ in 0..3 {
            assert!(source.shared_handle().unwrap().is_none());
        }
    }
}
