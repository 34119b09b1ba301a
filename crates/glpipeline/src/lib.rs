//! Texture processing stages for frames flowing through a render thread.
//!
//! A frame enters as an external texture, walks a linear chain of stages in
//! attachment order, and leaves through whichever stage consumes it:
//!
//! ```text
//!   source ──▶ proxy ──▶ effect ──▶ sink ──▶ surface / collector
//! ```
//!
//! Stages only ever run on the thread that owns the [`GpuContext`]; the
//! cross-thread surface types in [`surface`] are the only pieces shared with
//! producers and consumers.

pub mod context;
pub mod frame;
pub mod gpu;
pub mod matrix;
pub mod software;
pub mod stage;
pub mod surface;
pub mod target;
pub mod tier;

pub use context::{BoxedContext, ContextError, EffectKind, GpuContext};
pub use frame::{DrawerId, Frame, TextureId, Transform};
pub use gpu::{WgpuContext, WgpuFactory};
pub use software::{SoftwareContext, SoftwareFactory};
pub use stage::{
    EffectStage, Flow, FrameConsumer, FrameListener, ProxyStage, SinkOutput, SinkStage, Stage,
    StageChain, StageId,
};
pub use surface::{CollectedFrame, FrameCollector, FrameSurface, ProducerFrame, SurfaceBinding};
pub use target::RendererTarget;
pub use tier::{supported_render_tier, RenderTier};

/// Errors surfaced to pipeline callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The presentation surface is of an unsupported kind or already dead.
    #[error("unsupported or dead presentation surface")]
    UnsupportedSurface,

    /// A producer wrote to a surface whose consumer has been torn down.
    #[error("surface is detached from its consumer")]
    SurfaceDetached,

    /// A producer frame did not match the surface dimensions.
    #[error("frame payload is {got} bytes, expected {expected} for {width}x{height} rgba")]
    PayloadSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    #[error(transparent)]
    Context(#[from] ContextError),
}
