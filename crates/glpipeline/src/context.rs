//! Abstraction over the GPU owned by the render thread.
//!
//! The trait is object safe so the rest of the pipeline can be written
//! against `&mut dyn GpuContext`; the wgpu backend lives in [`crate::gpu`]
//! and a deterministic software backend for tests in [`crate::software`].

use crate::frame::{DrawerId, TextureId, Transform};
use crate::surface::SurfaceBinding;
use crate::tier::RenderTier;

/// Colour effects a drawer can bake into its fragment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Grayscale,
    Sepia,
    Invert,
}

/// Errors raised by context operations. Callers on the render thread treat
/// these as transient: log, drop the frame, keep the loop alive.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),

    #[error("unknown drawer {0:?}")]
    UnknownDrawer(DrawerId),

    #[error("payload is {got} bytes, expected {expected} for {width}x{height} rgba")]
    PayloadSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    #[error("destination surface is no longer writable")]
    SurfaceGone,

    #[error("gpu error: {0}")]
    Gpu(String),
}

/// Everything a stage needs from the GPU. Implementations are moved onto
/// the render thread at startup and never leave it.
pub trait GpuContext: Send {
    fn tier(&self) -> RenderTier;

    /// Allocates an RGBA8 texture producers will stream frames into.
    fn create_source_texture(&mut self, width: u32, height: u32)
        -> Result<TextureId, ContextError>;

    fn delete_texture(&mut self, id: TextureId);

    /// Uploads tightly packed RGBA8 pixels, resizing the texture if the
    /// incoming frame dimensions changed.
    fn upload_frame(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), ContextError>;

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)>;

    /// Builds a drawer specialised on the source flavour and an optional
    /// colour effect. A drawer only ever draws frames matching its flavour.
    fn create_drawer(
        &mut self,
        external: bool,
        effect: Option<EffectKind>,
    ) -> Result<DrawerId, ContextError>;

    fn release_drawer(&mut self, id: DrawerId);

    /// Draws `src` through `drawer` into the binding's backing store.
    fn draw_to_binding(
        &mut self,
        drawer: DrawerId,
        src: TextureId,
        transform: &Transform,
        dst: &SurfaceBinding,
    ) -> Result<(), ContextError>;

    /// Reads the texture back as tightly packed RGBA8 into `out`, returning
    /// the dimensions.
    fn read_pixels(&mut self, src: TextureId, out: &mut Vec<u8>)
        -> Result<(u32, u32), ContextError>;
}

pub type BoxedContext = Box<dyn GpuContext>;
