/// Column-major 4x4 texture transform, OpenGL layout.
pub type Transform = [f32; 16];

/// Opaque handle to a texture owned by a [`GpuContext`](crate::GpuContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Opaque handle to a drawer (pipeline + uniforms) owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawerId(pub u64);

/// One frame travelling down the stage chain.
///
/// `external` tags frames sampled from the producer-facing input texture;
/// drawers are specialised on it and must be rebuilt when it flips.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub external: bool,
    pub texture: TextureId,
    pub transform: Transform,
}
