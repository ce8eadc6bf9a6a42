use tracing::{debug, info};

use crate::error::KatangaError;

use super::{ImportedTexture, SurfaceDesc, SurfaceSource, TextureImporter};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SurfaceUpdate {
    /// Nothing is published. Show the placeholder.
    Placeholder,
    /// The bound texture is still current.
    Unchanged,
    /// A new handle was imported. Reported once per change.
    Rebuilt {
        generation: u64,
        desc: SurfaceDesc,
        aspect_ratio: f32,
    },
}

pub struct SurfaceBroker<I: TextureImporter> {
    importer: I,
    current: Option<ImportedTexture<I::Texture>>,
    generation: u64,
}

impl<I: TextureImporter> SurfaceBroker<I> {
    pub fn new(importer: I) -> Self {
        Self {
            importer,
            current: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&ImportedTexture<I::Texture>> {
        self.current.as_ref()
    }

    pub fn importer(&self) -> &I {
        &self.importer
    }

    /// Drops the bound texture, e.g. when the target has gone away.
    pub fn release(&mut self) {
        if let Some(old) = self.current.take() {
            debug!("released surface {} (gen {})", old.handle, old.generation);
        }
    }

    /// Runs once per consumer frame, with the setup lock held.
    pub fn tick(
        &mut self,
        source: &mut impl SurfaceSource,
    ) -> Result<SurfaceUpdate, KatangaError> {
        let handle = source.shared_handle()?;
        if handle.is_none() {
            // forgetting the handle makes a republished identical value count as new
            self.release();
            return Ok(SurfaceUpdate::Placeholder);
        }
        if self.current.as_ref().map(|x| x.handle) == Some(handle) {
            return Ok(SurfaceUpdate::Unchanged);
        }

        self.release();
        let desc = SurfaceDesc::from_raw(source.describe()?)?;
        let texture = self.importer.import(handle, &desc)?;
        self.generation += 1;
        info!(
            "imported surface {}: {}x{} format {} (gen {})",
            handle,
            desc.width(),
            desc.height(),
            desc.format().code(),
            self.generation
        );
        self.current = Some(ImportedTexture {
            handle,
            desc,
            generation: self.generation,
            texture,
        });
        Ok(SurfaceUpdate::Rebuilt {
            generation: self.generation,
            desc,
            aspect_ratio: desc.aspect_ratio(),
        })
    }
}
