//! The linear stage chain frames travel through on the render thread.
//!
//! Stages form a closed set: a proxy that observes, an effect that draws a
//! styled copy to its own target, and a sink that presents or hands frames
//! to an in-process consumer. The chain is only ever mutated on the render
//! thread; control threads marshal closures over to do so.

use std::time::Instant;

use crate::context::{ContextError, EffectKind, GpuContext};
use crate::frame::{DrawerId, Frame};
use crate::surface::SurfaceBinding;
use crate::target::RendererTarget;

/// Observer invoked for every frame passing a proxy stage.
pub type FrameListener = Box<dyn FnMut(&Frame) + Send>;

/// Terminal consumer a sink can feed instead of a presentation target.
pub trait FrameConsumer: Send {
    fn on_frame(&mut self, ctx: &mut dyn GpuContext, frame: &Frame);
}

/// Whether a frame keeps travelling after a stage handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Propagate,
    Consume,
}

/// Stable identifier for a stage within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub u64);

/// A drawer together with the flavour it was built for. Drawers are
/// specialised on (external, effect); a frame with a different flavour
/// forces a rebuild.
struct Drawer {
    id: DrawerId,
    external: bool,
    effect: Option<EffectKind>,
}

impl Drawer {
    fn matches(&self, external: bool, effect: Option<EffectKind>) -> bool {
        self.external == external && self.effect == effect
    }
}

fn ensure_drawer(
    slot: &mut Option<Drawer>,
    ctx: &mut dyn GpuContext,
    external: bool,
    effect: Option<EffectKind>,
) -> Result<DrawerId, ContextError> {
    if let Some(drawer) = slot {
        if drawer.matches(external, effect) {
            return Ok(drawer.id);
        }
    }
    if let Some(old) = slot.take() {
        ctx.release_drawer(old.id);
    }
    let id = ctx.create_drawer(external, effect)?;
    *slot = Some(Drawer {
        id,
        external,
        effect,
    });
    Ok(id)
}

/// Pass-through stage with an optional observer.
pub struct ProxyStage {
    listener: Option<FrameListener>,
    released: bool,
}

impl ProxyStage {
    pub fn new(listener: Option<FrameListener>) -> Self {
        Self {
            listener,
            released: false,
        }
    }

    pub fn set_listener(&mut self, listener: Option<FrameListener>) {
        self.listener = listener;
    }

    fn on_frame(&mut self, frame: &Frame) -> Flow {
        if self.released {
            return Flow::Propagate;
        }
        if let Some(listener) = &mut self.listener {
            listener(frame);
        }
        Flow::Propagate
    }
}

/// Applies a colour effect and draws the result to its own target.
///
/// Without a usable target the stage runs effect-only: the drawer is still
/// kept in sync with the incoming flavour, but nothing is presented.
pub struct EffectStage {
    kind: EffectKind,
    default_kind: EffectKind,
    drawer: Option<Drawer>,
    target: Option<RendererTarget>,
    effect_only: bool,
    released: bool,
}

impl EffectStage {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            default_kind: kind,
            drawer: None,
            target: None,
            effect_only: true,
            released: false,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Swaps the active effect. The drawer is rebuilt lazily on the next
    /// frame.
    pub fn set_effect(&mut self, kind: EffectKind) {
        self.kind = kind;
    }

    /// Restores the effect the stage was attached with.
    pub fn reset_effect(&mut self) {
        self.kind = self.default_kind;
    }

    /// Rebinds the stage's output. Rebinding to the same surface is a
    /// no-op; a different one releases the old target first. An absent or
    /// dead binding switches the stage to effect-only mode.
    pub fn set_surface(&mut self, binding: Option<SurfaceBinding>, max_fps: Option<f32>) {
        let same = match (&self.target, &binding) {
            (Some(target), Some(binding)) => target.binding() == binding,
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        if let Some(mut old) = self.target.take() {
            old.release();
        }
        self.effect_only = true;
        if let Some(binding) = binding {
            match RendererTarget::new(binding, max_fps) {
                Ok(target) => {
                    self.target = Some(target);
                    self.effect_only = false;
                }
                Err(err) => {
                    // The binding died between validation and the hop.
                    tracing::warn!(error = %err, "effect target unavailable; running effect-only");
                }
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(target) = &mut self.target {
            target.set_enabled(enabled);
        }
    }

    fn on_frame(&mut self, ctx: &mut dyn GpuContext, frame: &Frame, now: Instant) -> Flow {
        if self.released {
            return Flow::Propagate;
        }
        // The drawer tracks the incoming flavour even in effect-only mode
        // so a later rebind presents without a stale pipeline.
        let drawer = match ensure_drawer(&mut self.drawer, ctx, frame.external, Some(self.kind)) {
            Ok(drawer) => drawer,
            Err(err) => {
                tracing::warn!(error = %err, "effect drawer unavailable; frame dropped");
                return Flow::Propagate;
            }
        };
        if !self.effect_only {
            if let Some(target) = &mut self.target {
                target.draw(ctx, drawer, frame.texture, &frame.transform, now);
            }
        }
        // TODO: render into an intermediate texture and forward that frame
        // downstream instead of the untouched original.
        Flow::Propagate
    }

    fn release(&mut self, ctx: &mut dyn GpuContext) {
        if let Some(drawer) = self.drawer.take() {
            ctx.release_drawer(drawer.id);
        }
        if let Some(mut target) = self.target.take() {
            target.release();
        }
        self.released = true;
    }
}

/// Where a sink sends its frames.
pub enum SinkOutput {
    None,
    Target(RendererTarget),
    Consumer(Box<dyn FrameConsumer>),
}

/// Terminal stage: presents to a target or feeds a consumer, then consumes
/// the frame.
pub struct SinkStage {
    drawer: Option<Drawer>,
    output: SinkOutput,
    released: bool,
}

impl SinkStage {
    pub fn new() -> Self {
        Self {
            drawer: None,
            output: SinkOutput::None,
            released: false,
        }
    }

    pub fn consumer(consumer: Box<dyn FrameConsumer>) -> Self {
        Self {
            drawer: None,
            output: SinkOutput::Consumer(consumer),
            released: false,
        }
    }

    /// Rebinds the sink's presentation surface; same semantics as
    /// [`EffectStage::set_surface`]. Replaces any installed consumer.
    pub fn set_surface(&mut self, binding: Option<SurfaceBinding>, max_fps: Option<f32>) {
        let same = match (&self.output, &binding) {
            (SinkOutput::Target(target), Some(binding)) => target.binding() == binding,
            (SinkOutput::None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        if let SinkOutput::Target(target) = &mut self.output {
            target.release();
        }
        self.output = SinkOutput::None;
        if let Some(binding) = binding {
            match RendererTarget::new(binding, max_fps) {
                Ok(target) => self.output = SinkOutput::Target(target),
                Err(err) => {
                    tracing::warn!(error = %err, "sink target unavailable; frames will drop");
                }
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if let SinkOutput::Target(target) = &mut self.output {
            target.set_enabled(enabled);
        }
    }

    fn on_frame(&mut self, ctx: &mut dyn GpuContext, frame: &Frame, now: Instant) -> Flow {
        if self.released {
            return Flow::Propagate;
        }
        match &mut self.output {
            SinkOutput::None => {}
            SinkOutput::Consumer(consumer) => consumer.on_frame(ctx, frame),
            SinkOutput::Target(target) => {
                if target.is_enabled() && target.is_valid() {
                    match ensure_drawer(&mut self.drawer, ctx, frame.external, None) {
                        Ok(drawer) => {
                            target.draw(ctx, drawer, frame.texture, &frame.transform, now);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "sink drawer unavailable; frame dropped");
                        }
                    }
                }
            }
        }
        Flow::Consume
    }

    fn release(&mut self, ctx: &mut dyn GpuContext) {
        if let Some(drawer) = self.drawer.take() {
            ctx.release_drawer(drawer.id);
        }
        if let SinkOutput::Target(target) = &mut self.output {
            target.release();
        }
        self.output = SinkOutput::None;
        self.released = true;
    }
}

impl Default for SinkStage {
    fn default() -> Self {
        Self::new()
    }
}

/// The closed set of stage kinds a chain can hold.
pub enum Stage {
    Proxy(ProxyStage),
    Effect(EffectStage),
    Sink(SinkStage),
}

impl Stage {
    fn on_frame(&mut self, ctx: &mut dyn GpuContext, frame: &Frame, now: Instant) -> Flow {
        match self {
            Stage::Proxy(stage) => stage.on_frame(frame),
            Stage::Effect(stage) => stage.on_frame(ctx, frame, now),
            Stage::Sink(stage) => stage.on_frame(ctx, frame, now),
        }
    }

    fn release(&mut self, ctx: &mut dyn GpuContext) {
        match self {
            Stage::Proxy(stage) => stage.released = true,
            Stage::Effect(stage) => stage.release(ctx),
            Stage::Sink(stage) => stage.release(ctx),
        }
    }
}

/// Ordered stage list. Render thread only.
pub struct StageChain {
    stages: Vec<(StageId, Stage)>,
}

impl StageChain {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push(&mut self, id: StageId, stage: Stage) {
        self.stages.push((id, stage));
    }

    /// Inserts ahead of `anchor`, or at the end when the anchor is gone.
    pub fn insert_before(&mut self, anchor: StageId, id: StageId, stage: Stage) {
        match self.stages.iter().position(|(sid, _)| *sid == anchor) {
            Some(index) => self.stages.insert(index, (id, stage)),
            None => self.stages.push((id, stage)),
        }
    }

    pub fn get_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages
            .iter_mut()
            .find(|(sid, _)| *sid == id)
            .map(|(_, stage)| stage)
    }

    /// Releases and removes a stage. Unknown ids are ignored.
    pub fn remove(&mut self, id: StageId, ctx: &mut dyn GpuContext) {
        if let Some(index) = self.stages.iter().position(|(sid, _)| *sid == id) {
            let (_, mut stage) = self.stages.remove(index);
            stage.release(ctx);
        }
    }

    /// Walks the chain in order until a stage consumes the frame.
    pub fn dispatch(&mut self, ctx: &mut dyn GpuContext, frame: &Frame) {
        self.dispatch_at(ctx, frame, Instant::now());
    }

    pub fn dispatch_at(&mut self, ctx: &mut dyn GpuContext, frame: &Frame, now: Instant) {
        for (_, stage) in &mut self.stages {
            if stage.on_frame(ctx, frame, now) == Flow::Consume {
                break;
            }
        }
    }

    pub fn release_all(&mut self, ctx: &mut dyn GpuContext) {
        for (_, stage) in &mut self.stages {
            stage.release(ctx);
        }
        self.stages.clear();
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageChain {
    fn default() -> Self {
        Self::new()
    }
}
