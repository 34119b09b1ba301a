//! The reader facade and its render-thread handler.
//!
//! `FrameReader` owns a [`RenderTask`] whose handler keeps the input
//! surface, the source texture and the stage chain. Every GPU-touching
//! operation is marshalled onto that thread; the facade itself only holds
//! the coarse shared lock around dimensions, surface handles and the
//! listener.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use glpipeline::{
    BoxedContext, EffectKind, EffectStage, Frame, FrameConsumer, FrameListener, FrameSurface,
    GpuContext, ProxyStage, SinkStage, Stage, StageChain, StageId, SurfaceBinding, TextureId,
    WgpuFactory,
};
use rendertask::{Command, ContextFactory, ReadyLatch, RenderTask, TaskHandler, TaskSender};

use crate::config::{ConfigError, ReaderConfig};
use crate::dispatch::{CallbackHandle, CallbackThread};
use crate::pool::{AcquisitionPool, CapacityError, Image};

/// Callback fired on the dispatch context when a new image is pending.
pub type ImageListener = Box<dyn FnMut(&AcquireHandle) + Send>;

type ReaderSender = TaskSender<ReaderHandler, BoxedContext>;
type ReaderCommand = Command<ReaderHandler, BoxedContext>;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The input surface does not exist yet or the reader was released.
    #[error("reader is not ready")]
    NotReady,

    #[error("reader already released")]
    AlreadyReleased,

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// The presentation surface is of an unsupported kind or already dead.
    #[error("unsupported or dead presentation surface")]
    UnsupportedSurface,

    #[error("render thread did not start within {timeout_ms} ms")]
    StartupTimeout { timeout_ms: u64 },

    #[error("input surface was not created within {timeout_ms} ms")]
    SurfaceTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] rendertask::TaskError),

    #[error("callback thread failed to start: {0}")]
    Dispatch(String),
}

struct SharedState {
    width: u32,
    height: u32,
    surface: Option<FrameSurface>,
    source_texture: Option<TextureId>,
    listener: Option<Arc<Mutex<ImageListener>>>,
    callback: Option<CallbackHandle>,
    own_callbacks: Option<CallbackThread>,
}

struct ReaderShared {
    /// One coarse lock for everything both sides mutate.
    state: Mutex<SharedState>,
    pool: Mutex<AcquisitionPool<Image>>,
    surface_gate: ReadyLatch,
    produced: AtomicU64,
    notify_pending: AtomicBool,
    released: AtomicBool,
    next_stage: AtomicU64,
    resizes: AtomicU64,
}

impl ReaderShared {
    fn new(config: &ReaderConfig) -> Self {
        Self {
            state: Mutex::new(SharedState {
                width: config.width,
                height: config.height,
                surface: None,
                source_texture: None,
                listener: None,
                callback: None,
                own_callbacks: None,
            }),
            pool: Mutex::new(AcquisitionPool::new(config.max_images)),
            surface_gate: ReadyLatch::new(),
            produced: AtomicU64::new(0),
            notify_pending: AtomicBool::new(false),
            released: AtomicBool::new(false),
            next_stage: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
        }
    }

    fn allocate_stage_id(&self) -> StageId {
        StageId(self.next_stage.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Edge-triggered listener notification: bursts of deposits between
    /// dispatches collapse into one callback.
    fn signal_image_available(self: &Arc<Self>) {
        if self.notify_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let (listener, callback) = {
            let state = self.state.lock();
            (state.listener.clone(), state.callback.clone())
        };
        let (Some(listener), Some(callback)) = (listener, callback) else {
            self.notify_pending.store(false, Ordering::Release);
            return;
        };
        let shared = Arc::clone(self);
        let posted = callback.post(move || {
            shared.notify_pending.store(false, Ordering::Release);
            let handle = AcquireHandle {
                shared: Arc::clone(&shared),
            };
            let mut listener = listener.lock();
            (listener.as_mut())(&handle);
        });
        if !posted {
            self.notify_pending.store(false, Ordering::Release);
        }
    }

    fn acquire_latest(&self) -> Result<Option<Image>, ReaderError> {
        if self.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        Ok(self.pool.lock().acquire_latest()?)
    }

    fn acquire_next(&self) -> Result<Option<Image>, ReaderError> {
        if self.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        Ok(self.pool.lock().acquire_next()?)
    }

    fn recycle(&self, image: Image) {
        self.pool.lock().recycle(image);
    }
}

/// Borrow handed to image listeners; acquire and recycle without touching
/// the reader itself.
pub struct AcquireHandle {
    shared: Arc<ReaderShared>,
}

impl AcquireHandle {
    pub fn acquire_latest(&self) -> Result<Option<Image>, ReaderError> {
        self.shared.acquire_latest()
    }

    pub fn acquire_next(&self) -> Result<Option<Image>, ReaderError> {
        self.shared.acquire_next()
    }

    pub fn recycle(&self, image: Image) {
        self.shared.recycle(image);
    }
}

/// Terminal sink depositing rendered frames into the acquisition pool.
struct PoolSink {
    shared: Arc<ReaderShared>,
}

impl FrameConsumer for PoolSink {
    fn on_frame(&mut self, ctx: &mut dyn GpuContext, frame: &Frame) {
        let mut pool = self.shared.pool.lock();
        let Some(mut image) = pool.writable_or(|| Image::new(1, 1)) else {
            tracing::warn!("every pooled image is acquired; dropping frame");
            return;
        };
        match ctx.read_pixels(frame.texture, &mut image.data) {
            Ok((width, height)) => {
                image.width = width;
                image.height = height;
                image.sequence = self.shared.produced.fetch_add(1, Ordering::AcqRel) + 1;
                pool.deposit(image);
                drop(pool);
                self.shared.signal_image_available();
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame readback failed; frame dropped");
                pool.restore(image);
            }
        }
    }
}

/// Render-thread side of the reader.
pub struct ReaderHandler {
    shared: Arc<ReaderShared>,
    sender: Option<ReaderSender>,
    surface: Option<FrameSurface>,
    source_texture: Option<TextureId>,
    chain: StageChain,
    tail: Option<StageId>,
}

impl ReaderHandler {
    fn new(shared: Arc<ReaderShared>) -> Self {
        Self {
            shared,
            sender: None,
            surface: None,
            source_texture: None,
            chain: StageChain::new(),
            tail: None,
        }
    }

    fn install_stage(&mut self, id: StageId, stage: Stage) {
        match self.tail {
            Some(tail) => self.chain.insert_before(tail, id, stage),
            None => self.chain.push(id, stage),
        }
    }

    fn release_input(&mut self, ctx: &mut BoxedContext) {
        if let Some(surface) = self.surface.take() {
            surface.detach();
        }
        if let Some(texture) = self.source_texture.take() {
            ctx.delete_texture(texture);
        }
        let mut state = self.shared.state.lock();
        state.surface = None;
        state.source_texture = None;
    }
}

impl TaskHandler<BoxedContext> for ReaderHandler {
    fn on_start(&mut self, _ctx: &mut BoxedContext) -> Result<(), rendertask::TaskError> {
        let tail = self.shared.allocate_stage_id();
        self.chain.push(
            tail,
            Stage::Sink(SinkStage::consumer(Box::new(PoolSink {
                shared: Arc::clone(&self.shared),
            }))),
        );
        self.tail = Some(tail);
        Ok(())
    }

    fn on_stop(&mut self, ctx: &mut BoxedContext) {
        self.release_input(ctx);
        self.chain.release_all(ctx.as_mut());
        tracing::debug!("reader torn down");
    }

    fn on_update(&mut self, ctx: &mut BoxedContext) {
        let Some(surface) = self.surface.clone() else {
            return;
        };
        let Some(texture) = self.source_texture else {
            return;
        };
        // The slot may be empty if a newer update already consumed it.
        let Some(pending) = surface.take_pending() else {
            return;
        };
        if let Err(err) = ctx.upload_frame(texture, pending.width, pending.height, &pending.data) {
            tracing::error!(error = %err, "texture update failed; frame dropped");
            return;
        }
        let frame = Frame {
            external: true,
            texture,
            transform: pending.transform,
        };
        self.chain
            .dispatch_at(ctx.as_mut(), &frame, Instant::now());
    }

    fn on_resize(&mut self, _ctx: &mut BoxedContext, width: u32, height: u32) {
        if let Some(surface) = &self.surface {
            surface.set_default_size(width, height);
        }
        self.shared.resizes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(width, height, "default buffer size changed");
    }

    fn on_recreate_surface(&mut self, ctx: &mut BoxedContext) {
        self.release_input(ctx);
        let (width, height) = {
            let state = self.shared.state.lock();
            (state.width, state.height)
        };
        let texture = match ctx.create_source_texture(width, height) {
            Ok(texture) => texture,
            Err(err) => {
                tracing::error!(error = %err, "source texture creation failed");
                self.shared.surface_gate.open(false);
                return;
            }
        };
        let surface = FrameSurface::new(width, height);
        if let Some(sender) = self.sender.clone() {
            surface.set_notifier(move || {
                sender.offer(Command::UpdateTexture);
            });
        }
        {
            let mut state = self.shared.state.lock();
            state.surface = Some(surface.clone());
            state.source_texture = Some(texture);
        }
        self.surface = Some(surface);
        self.source_texture = Some(texture);
        self.shared.surface_gate.open(true);
        tracing::debug!(width, height, "input surface created");
    }
}

/// Pull-based reader for GPU-processed video frames.
///
/// Construction blocks until the render thread is up and the input surface
/// exists; either wait timing out is fatal. All methods are callable from
/// any thread.
pub struct FrameReader {
    shared: Arc<ReaderShared>,
    task: RenderTask<ReaderHandler, BoxedContext>,
}

impl FrameReader {
    /// Creates a reader backed by the GPU.
    pub fn new(config: ReaderConfig) -> Result<Self, ReaderError> {
        Self::with_factory(config, WgpuFactory::default())
    }

    /// Creates a reader with an explicit context factory.
    pub fn with_factory<F>(config: ReaderConfig, factory: F) -> Result<Self, ReaderError>
    where
        F: ContextFactory<Ctx = BoxedContext>,
    {
        let config = config.validated()?;
        let shared = Arc::new(ReaderShared::new(&config));
        let handler = ReaderHandler::new(Arc::clone(&shared));
        let task = RenderTask::spawn(factory, handler)?;
        if !task.wait_ready(config.start_timeout()) {
            task.release();
            return Err(ReaderError::StartupTimeout {
                timeout_ms: config.start_timeout_ms,
            });
        }
        // The handler needs a sender before the surface exists so producer
        // writes can enqueue updates; FIFO order makes it visible first.
        let sender = task.sender();
        let own = sender.clone();
        task.offer(Command::Run(Box::new(
            move |handler: &mut ReaderHandler, _ctx: &mut BoxedContext| {
                handler.sender = Some(own);
            },
        )));
        task.offer(Command::RecreateSurface);
        if !shared.surface_gate.wait(config.surface_timeout()) {
            task.release();
            return Err(ReaderError::SurfaceTimeout {
                timeout_ms: config.surface_timeout_ms,
            });
        }
        Ok(Self { shared, task })
    }

    pub fn width(&self) -> u32 {
        self.shared.state.lock().width
    }

    pub fn height(&self) -> u32 {
        self.shared.state.lock().height
    }

    /// The producer-facing input surface.
    pub fn surface(&self) -> Result<FrameSurface, ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        self.shared
            .state
            .lock()
            .surface
            .clone()
            .ok_or(ReaderError::NotReady)
    }

    /// Handle of the texture producer frames land in.
    pub fn source_texture(&self) -> Result<TextureId, ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        self.shared
            .state
            .lock()
            .source_texture
            .ok_or(ReaderError::NotReady)
    }

    /// Changes the default buffer dimensions. Values below 1 are clamped;
    /// a call matching the current dimensions does nothing at all.
    pub fn resize(&self, width: u32, height: u32) {
        if self.shared.is_released() {
            return;
        }
        let width = width.max(1);
        let height = height.max(1);
        {
            let mut state = self.shared.state.lock();
            if state.width == width && state.height == height {
                return;
            }
            state.width = width;
            state.height = height;
        }
        self.task.offer(Command::Resize { width, height });
    }

    pub fn acquire_latest(&self) -> Result<Option<Image>, ReaderError> {
        self.shared.acquire_latest()
    }

    pub fn acquire_next(&self) -> Result<Option<Image>, ReaderError> {
        self.shared.acquire_next()
    }

    pub fn recycle(&self, image: Image) {
        self.shared.recycle(image);
    }

    /// Installs or clears the image-available listener. Without an explicit
    /// dispatch context the reader lazily spawns its own callback thread.
    pub fn set_on_image_available(
        &self,
        listener: Option<ImageListener>,
        context: Option<CallbackHandle>,
    ) -> Result<(), ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        let mut state = self.shared.state.lock();
        match listener {
            Some(listener) => {
                let callback = match context {
                    Some(handle) => handle,
                    None => {
                        if state.own_callbacks.is_none() {
                            let thread = CallbackThread::spawn()
                                .map_err(|err| ReaderError::Dispatch(err.to_string()))?;
                            state.own_callbacks = Some(thread);
                        }
                        state
                            .own_callbacks
                            .as_ref()
                            .map(CallbackThread::handle)
                            .ok_or_else(|| ReaderError::Dispatch("callback thread gone".into()))?
                    }
                };
                state.listener = Some(Arc::new(Mutex::new(listener)));
                state.callback = Some(callback);
            }
            None => {
                state.listener = None;
                state.callback = None;
            }
        }
        Ok(())
    }

    /// Adds an observing proxy stage ahead of the pool sink.
    pub fn attach_proxy(&self, listener: Option<FrameListener>) -> Result<ProxyHandle, ReaderError> {
        let control = self.attach(Stage::Proxy(ProxyStage::new(listener)))?;
        Ok(ProxyHandle { control })
    }

    /// Adds an effect stage ahead of the pool sink.
    pub fn attach_effect(&self, kind: EffectKind) -> Result<EffectHandle, ReaderError> {
        let control = self.attach(Stage::Effect(EffectStage::new(kind)))?;
        Ok(EffectHandle { control })
    }

    /// Adds a presentation sink ahead of the pool sink. With a binding the
    /// sink presents immediately; rebind later via the handle.
    pub fn attach_sink(
        &self,
        binding: Option<SurfaceBinding>,
        max_fps: Option<f32>,
    ) -> Result<SinkHandle, ReaderError> {
        validate_binding(binding.as_ref())?;
        let mut sink = SinkStage::new();
        let control = self.attach_with(move |_ctx| {
            sink.set_surface(binding, max_fps);
            Stage::Sink(sink)
        })?;
        Ok(SinkHandle { control })
    }

    fn attach(&self, stage: Stage) -> Result<StageControl, ReaderError> {
        self.attach_with(move |_ctx| stage)
    }

    fn attach_with(
        &self,
        build: impl FnOnce(&mut dyn GpuContext) -> Stage + Send + 'static,
    ) -> Result<StageControl, ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        let id = self.shared.allocate_stage_id();
        let offered = self.task.offer(Command::Run(Box::new(
            move |handler: &mut ReaderHandler, ctx: &mut BoxedContext| {
                let stage = build(ctx.as_mut());
                handler.install_stage(id, stage);
            },
        )));
        if !offered {
            return Err(ReaderError::AlreadyReleased);
        }
        Ok(StageControl {
            shared: Arc::clone(&self.shared),
            sender: self.task.sender(),
            id,
        })
    }

    /// Marshals a closure onto the render thread.
    pub fn run_on_render_thread(
        &self,
        job: impl FnOnce(&mut dyn GpuContext) + Send + 'static,
    ) -> Result<(), ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        let offered = self.task.offer(Command::Run(Box::new(
            move |_handler: &mut ReaderHandler, ctx: &mut BoxedContext| job(ctx.as_mut()),
        )));
        if offered {
            Ok(())
        } else {
            Err(ReaderError::AlreadyReleased)
        }
    }

    /// Total frames ever deposited into the pool.
    pub fn frames_produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        !self.shared.is_released() && self.task.is_running()
    }

    /// Stops the render thread and blocks until everything is torn down.
    /// Idempotent.
    pub fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.release();
        let (listener, callback, own) = {
            let mut state = self.shared.state.lock();
            (
                state.listener.take(),
                state.callback.take(),
                state.own_callbacks.take(),
            )
        };
        drop(listener);
        drop(callback);
        // Joins the callback thread after its backlog ran.
        drop(own);
    }

    #[cfg(test)]
    fn resizes_applied(&self) -> u64 {
        self.shared.resizes.load(Ordering::Relaxed)
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.release();
    }
}

fn validate_binding(binding: Option<&SurfaceBinding>) -> Result<(), ReaderError> {
    match binding {
        Some(binding) if !binding.is_supported() => Err(ReaderError::UnsupportedSurface),
        _ => Ok(()),
    }
}

/// Shared plumbing for stage handles: pre-hop validation plus a marshalled
/// closure addressing the stage by id.
struct StageControl {
    shared: Arc<ReaderShared>,
    sender: ReaderSender,
    id: StageId,
}

impl StageControl {
    fn with_stage(
        &self,
        apply: impl FnOnce(&mut Stage, &mut dyn GpuContext) + Send + 'static,
    ) -> Result<(), ReaderError> {
        if self.shared.is_released() {
            return Err(ReaderError::AlreadyReleased);
        }
        let id = self.id;
        let offered = self.sender.offer(command_for(id, apply));
        if offered {
            Ok(())
        } else {
            Err(ReaderError::AlreadyReleased)
        }
    }

    fn release(&self) {
        let id = self.id;
        let _ = self.sender.offer(Command::Run(Box::new(
            move |handler: &mut ReaderHandler, ctx: &mut BoxedContext| {
                handler.chain.remove(id, ctx.as_mut());
            },
        )));
    }
}

fn command_for(
    id: StageId,
    apply: impl FnOnce(&mut Stage, &mut dyn GpuContext) + Send + 'static,
) -> ReaderCommand {
    Command::Run(Box::new(
        move |handler: &mut ReaderHandler, ctx: &mut BoxedContext| {
            if let Some(stage) = handler.chain.get_mut(id) {
                apply(stage, ctx.as_mut());
            }
        },
    ))
}

/// Control handle for a proxy stage.
pub struct ProxyHandle {
    control: StageControl,
}

impl ProxyHandle {
    pub fn set_listener(&self, listener: Option<FrameListener>) -> Result<(), ReaderError> {
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Proxy(proxy) = stage {
                proxy.set_listener(listener);
            }
        })
    }

    pub fn release(&self) {
        self.control.release();
    }
}

/// Control handle for an effect stage.
pub struct EffectHandle {
    control: StageControl,
}

impl EffectHandle {
    /// Rebinds the effect's own presentation surface.
    pub fn set_surface(
        &self,
        binding: Option<SurfaceBinding>,
        max_fps: Option<f32>,
    ) -> Result<(), ReaderError> {
        validate_binding(binding.as_ref())?;
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Effect(effect) = stage {
                effect.set_surface(binding, max_fps);
            }
        })
    }

    pub fn set_effect(&self, kind: EffectKind) -> Result<(), ReaderError> {
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Effect(effect) = stage {
                effect.set_effect(kind);
            }
        })
    }

    /// Restores the effect the stage was attached with.
    pub fn reset_effect(&self) -> Result<(), ReaderError> {
        self.control.with_stage(|stage, _ctx| {
            if let Stage::Effect(effect) = stage {
                effect.reset_effect();
            }
        })
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), ReaderError> {
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Effect(effect) = stage {
                effect.set_enabled(enabled);
            }
        })
    }

    pub fn release(&self) {
        self.control.release();
    }
}

/// Control handle for a presentation sink.
pub struct SinkHandle {
    control: StageControl,
}

impl SinkHandle {
    pub fn set_surface(
        &self,
        binding: Option<SurfaceBinding>,
        max_fps: Option<f32>,
    ) -> Result<(), ReaderError> {
        validate_binding(binding.as_ref())?;
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Sink(sink) = stage {
                sink.set_surface(binding, max_fps);
            }
        })
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), ReaderError> {
        self.control.with_stage(move |stage, _ctx| {
            if let Stage::Sink(sink) = stage {
                sink.set_enabled(enabled);
            }
        })
    }

    pub fn release(&self) {
        self.control.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glpipeline::SoftwareFactory;
    use std::sync::mpsc;
    use std::time::Duration;

    fn reader(width: u32, height: u32, max_images: usize) -> FrameReader {
        let config = ReaderConfig::new(width, height, max_images);
        FrameReader::with_factory(config, SoftwareFactory::default()).unwrap()
    }

    fn sync(reader: &FrameReader) {
        let (tx, rx) = mpsc::channel();
        reader
            .run_on_render_thread(move |_ctx| {
                let _ = tx.send(());
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn construction_creates_surface_and_texture() {
        let reader = reader(4, 4, 2);
        assert!(reader.is_valid());
        let surface = reader.surface().unwrap();
        assert_eq!(surface.size(), (4, 4));
        reader.source_texture().unwrap();
        reader.release();
        assert!(matches!(reader.surface(), Err(ReaderError::AlreadyReleased)));
    }

    #[test]
    fn resize_clamps_and_skips_no_ops() {
        let reader = reader(4, 4, 2);
        reader.resize(0, 5);
        sync(&reader);
        assert_eq!((reader.width(), reader.height()), (1, 5));
        assert_eq!(reader.resizes_applied(), 1);

        // Same dimensions again: nothing is enqueued.
        reader.resize(1, 5);
        reader.resize(0, 5);
        sync(&reader);
        assert_eq!(reader.resizes_applied(), 1);

        reader.resize(8, 8);
        sync(&reader);
        assert_eq!(reader.resizes_applied(), 2);
        assert_eq!(reader.surface().unwrap().size(), (8, 8));
    }

    #[test]
    fn release_is_idempotent_and_blocks_until_stopped() {
        let reader = reader(2, 2, 1);
        reader.release();
        reader.release();
        assert!(!reader.is_valid());
        assert!(matches!(
            reader.acquire_latest(),
            Err(ReaderError::AlreadyReleased)
        ));
        assert!(matches!(
            reader.run_on_render_thread(|_| {}),
            Err(ReaderError::AlreadyReleased)
        ));
    }

    #[test]
    fn stalled_context_factory_is_a_fatal_startup_error() {
        struct StalledFactory;
        impl ContextFactory for StalledFactory {
            type Ctx = BoxedContext;
            fn create_context(&mut self) -> Result<BoxedContext, rendertask::TaskError> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Box::new(glpipeline::SoftwareContext::default()))
            }
        }
        let mut config = ReaderConfig::new(2, 2, 1);
        config.start_timeout_ms = 30;
        let Err(err) = FrameReader::with_factory(config, StalledFactory) else {
            panic!("a stalled context factory must not yield a reader");
        };
        assert!(matches!(err, ReaderError::StartupTimeout { timeout_ms: 30 }));
    }

    #[test]
    fn attaching_a_dead_surface_fails_before_the_thread_hop() {
        let reader = reader(2, 2, 1);
        let dead = FrameSurface::new(2, 2);
        dead.detach();
        let Err(err) = reader.attach_sink(Some(SurfaceBinding::Stream(dead)), None) else {
            panic!("a detached surface must be rejected");
        };
        assert!(matches!(err, ReaderError::UnsupportedSurface));
    }
}
