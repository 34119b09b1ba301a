use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Discriminant a [`CommandQueue`] uses for coalescing and targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    UpdateTexture,
    Resize,
    RecreateSurface,
    Run,
    Stop,
}

/// Implemented by the command type a queue stores.
pub trait PendingCommand {
    fn kind(&self) -> CommandKind;
}

/// MPSC command queue with a single coalescing slot for texture updates.
///
/// FIFO commands always drain before the update slot, so a resize or a
/// marshalled closure offered before an update is handled first. Offering a
/// second update while one is still pending replaces it; the consumer sees
/// at most one update per burst of producer writes.
pub struct CommandQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

struct Inner<T> {
    fifo: VecDeque<T>,
    update_slot: Option<T>,
    closed: bool,
}

impl<T: PendingCommand> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                fifo: VecDeque::new(),
                update_slot: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueues a command. Returns `false` if the queue has been closed,
    /// in which case the command is dropped.
    pub fn offer(&self, command: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        match command.kind() {
            CommandKind::UpdateTexture => inner.update_slot = Some(command),
            _ => inner.fifo.push_back(command),
        }
        self.cond.notify_one();
        true
    }

    /// Drops every pending command of the given kind.
    pub fn remove(&self, kind: CommandKind) {
        let mut inner = self.inner.lock();
        if kind == CommandKind::UpdateTexture {
            inner.update_slot = None;
        } else {
            inner.fifo.retain(|c| c.kind() != kind);
        }
    }

    /// Blocks until a command is available, FIFO before the update slot.
    /// Returns `None` once the queue is closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(command) = inner.fifo.pop_front() {
                return Some(command);
            }
            if let Some(command) = inner.update_slot.take() {
                return Some(command);
            }
            if inner.closed {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Non-blocking variant of [`take`](Self::take).
    pub fn try_take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        inner
            .fifo
            .pop_front()
            .or_else(|| inner.update_slot.take())
    }

    /// Rejects further offers and wakes the consumer so it can drain and exit.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of commands waiting, counting the update slot as one.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock();
        inner.fifo.len() + usize::from(inner.update_slot.is_some())
    }
}

impl<T: PendingCommand> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
