use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::latch::ReadyLatch;
use crate::queue::{CommandKind, CommandQueue, PendingCommand};
use crate::TaskError;

/// Closure marshalled onto the render thread with exclusive access to the
/// handler and the context.
pub type Job<H, C> = Box<dyn FnOnce(&mut H, &mut C) + Send>;

/// Commands a [`RenderTask`] understands.
pub enum Command<H, C> {
    /// Coalesced request to consume the latest pending producer frame.
    UpdateTexture,
    /// Change the default buffer dimensions.
    Resize { width: u32, height: u32 },
    /// Tear down and rebuild the input surface and its backing texture.
    RecreateSurface,
    /// Run an arbitrary closure on the render thread.
    Run(Job<H, C>),
    /// Leave the command loop and begin teardown.
    Stop,
}

impl<H, C> PendingCommand for Command<H, C> {
    fn kind(&self) -> CommandKind {
        match self {
            Command::UpdateTexture => CommandKind::UpdateTexture,
            Command::Resize { .. } => CommandKind::Resize,
            Command::RecreateSurface => CommandKind::RecreateSurface,
            Command::Run(_) => CommandKind::Run,
            Command::Stop => CommandKind::Stop,
        }
    }
}

impl<H, C> std::fmt::Debug for Command<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::UpdateTexture => f.write_str("UpdateTexture"),
            Command::Resize { width, height } => f
                .debug_struct("Resize")
                .field("width", width)
                .field("height", height)
                .finish(),
            Command::RecreateSurface => f.write_str("RecreateSurface"),
            Command::Run(_) => f.write_str("Run(..)"),
            Command::Stop => f.write_str("Stop"),
        }
    }
}

/// Builds the context on the render thread itself. `RenderTask` never moves
/// a context across threads after construction.
pub trait ContextFactory: Send + 'static {
    type Ctx: Send + 'static;

    fn create_context(&mut self) -> Result<Self::Ctx, TaskError>;
}

/// Callbacks the render thread drives. All methods run on that one thread.
pub trait TaskHandler<C>: Send + Sized + 'static {
    /// Runs once after the context exists; an error aborts startup.
    fn on_start(&mut self, ctx: &mut C) -> Result<(), TaskError>;

    /// Runs once before the context is dropped.
    fn on_stop(&mut self, ctx: &mut C);

    fn on_update(&mut self, ctx: &mut C);

    fn on_resize(&mut self, ctx: &mut C, width: u32, height: u32);

    fn on_recreate_surface(&mut self, ctx: &mut C);
}

/// Lifecycle of the render thread, observable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct TaskShared<H, C> {
    queue: CommandQueue<Command<H, C>>,
    lifecycle: Mutex<Lifecycle>,
    ready: ReadyLatch,
}

impl<H, C> TaskShared<H, C> {
    fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock() = next;
    }
}

/// Cloneable producer-side handle to the task's command queue.
pub struct TaskSender<H, C> {
    shared: Arc<TaskShared<H, C>>,
}

impl<H, C> Clone for TaskSender<H, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H, C> TaskSender<H, C> {
    /// Enqueues a command; `false` means the task was already released.
    pub fn offer(&self, command: Command<H, C>) -> bool {
        self.shared.queue.offer(command)
    }

    pub fn remove(&self, kind: CommandKind) {
        self.shared.queue.remove(kind);
    }

    pub fn is_running(&self) -> bool {
        *self.shared.lifecycle.lock() == Lifecycle::Running
    }
}

/// Owns the render thread. Dropping the task releases it.
pub struct RenderTask<H, C> {
    shared: Arc<TaskShared<H, C>>,
    join: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl<H, C> RenderTask<H, C>
where
    H: TaskHandler<C>,
    C: Send + 'static,
{
    /// Spawns the render thread. The context is created over there; use
    /// [`wait_ready`](Self::wait_ready) to learn whether startup succeeded.
    pub fn spawn<F>(factory: F, handler: H) -> Result<Self, TaskError>
    where
        F: ContextFactory<Ctx = C>,
    {
        let shared = Arc::new(TaskShared {
            queue: CommandQueue::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            ready: ReadyLatch::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("render-task".into())
            .spawn(move || run_loop(factory, handler, thread_shared))?;
        Ok(Self {
            shared,
            join: Mutex::new(Some(join)),
            released: AtomicBool::new(false),
        })
    }

    /// Blocks until the thread reports a startup outcome or `timeout`
    /// elapses. `false` is fatal: the task will never become usable and
    /// must be released.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.shared.ready.wait(timeout)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    pub fn sender(&self) -> TaskSender<H, C> {
        TaskSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn offer(&self, command: Command<H, C>) -> bool {
        self.shared.queue.offer(command)
    }

    pub fn remove(&self, kind: CommandKind) {
        self.shared.queue.remove(kind);
    }

    /// Commands waiting in the queue, counting a pending update as one.
    pub fn pending_commands(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Stops the render thread and blocks until teardown finished.
    /// Idempotent; later calls return immediately. Must not be called from
    /// the render thread itself.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.offer(Command::Stop);
        self.shared.queue.close();
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("render task thread panicked during teardown");
            }
        }
    }
}

impl<H, C> Drop for RenderTask<H, C> {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Acquire) {
            self.shared.queue.offer(Command::Stop);
            self.shared.queue.close();
            if let Some(handle) = self.join.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_loop<F, H>(mut factory: F, mut handler: H, shared: Arc<TaskShared<H, F::Ctx>>)
where
    F: ContextFactory,
    H: TaskHandler<F::Ctx>,
{
    shared.set_lifecycle(Lifecycle::Starting);
    let mut ctx = match factory.create_context() {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!(error = %err, "render context creation failed");
            shared.set_lifecycle(Lifecycle::Stopped);
            shared.ready.open(false);
            return;
        }
    };
    if let Err(err) = handler.on_start(&mut ctx) {
        tracing::error!(error = %err, "render task startup aborted");
        shared.set_lifecycle(Lifecycle::Stopped);
        shared.ready.open(false);
        return;
    }
    shared.set_lifecycle(Lifecycle::Running);
    shared.ready.open(true);
    tracing::debug!("render task running");

    while let Some(command) = shared.queue.take() {
        match command {
            Command::Stop => break,
            Command::UpdateTexture => handler.on_update(&mut ctx),
            Command::Resize { width, height } => handler.on_resize(&mut ctx, width, height),
            Command::RecreateSurface => handler.on_recreate_surface(&mut ctx),
            Command::Run(job) => job(&mut handler, &mut ctx),
        }
    }

    shared.set_lifecycle(Lifecycle::Stopping);
    handler.on_stop(&mut ctx);
    drop(ctx);
    shared.set_lifecycle(Lifecycle::Stopped);
    tracing::debug!("render task stopped");
}
