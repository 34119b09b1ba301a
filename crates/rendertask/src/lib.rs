//! Single-threaded command executor for code that must own a GPU context.
//!
//! A [`RenderTask`] spawns one dedicated thread, constructs the context on
//! that thread, and then drains a command queue until asked to stop. Every
//! other thread interacts with the context exclusively by enqueueing
//! commands; the queue keeps texture updates edge-triggered by coalescing
//! them into a single slot while ordinary commands stay strictly FIFO.
//!
//! ```text
//!   producer ──offer──▶ ┌────────────┐         ┌──────────────┐
//!   control  ──offer──▶ │CommandQueue│──take──▶│ render thread │──▶ context
//!   teardown ──stop───▶ └────────────┘         └──────────────┘
//! ```

mod latch;
mod queue;
mod task;

pub use latch::ReadyLatch;
pub use queue::{CommandKind, CommandQueue, PendingCommand};
pub use task::{Command, ContextFactory, Job, Lifecycle, RenderTask, TaskHandler, TaskSender};

/// Errors raised while starting or driving a render task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The context factory refused to produce a context.
    #[error("render context creation failed: {0}")]
    ContextInit(String),

    /// The OS would not give us a thread.
    #[error("failed to spawn render task thread: {0}")]
    Spawn(#[from] std::io::Error),
}
