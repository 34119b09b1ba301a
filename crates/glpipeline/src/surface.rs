//! Cross-thread surfaces: the producer-facing input surface and the
//! consumer-facing frame collector. Both are cheap handles around shared
//! state; identity is pointer identity, so two clones of the same surface
//! compare equal and independently created surfaces never do.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::Transform;
use crate::matrix::IDENTITY;
use crate::PipelineError;

/// One frame written by a producer, pending consumption by the render
/// thread. A surface holds at most one; a newer write replaces it.
#[derive(Debug, Clone)]
pub struct ProducerFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub transform: Transform,
}

type Notifier = Arc<dyn Fn() + Send + Sync>;

struct SurfaceState {
    width: u32,
    height: u32,
    pending: Option<ProducerFrame>,
    detached: bool,
    notifier: Option<Notifier>,
    writes: u64,
}

/// Producer handle to the render thread's input texture.
///
/// Writes are edge triggered: each successful write replaces any frame the
/// render thread has not consumed yet and fires the update notifier, so the
/// consumer sees the latest frame without queueing history.
#[derive(Clone)]
pub struct FrameSurface {
    shared: Arc<Mutex<SurfaceState>>,
}

impl FrameSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SurfaceState {
                width: width.max(1),
                height: height.max(1),
                pending: None,
                detached: false,
                notifier: None,
                writes: 0,
            })),
        }
    }

    /// Current default buffer dimensions.
    pub fn size(&self) -> (u32, u32) {
        let state = self.shared.lock();
        (state.width, state.height)
    }

    /// Stores a frame for the render thread, replacing any unconsumed one.
    /// `data` must be tightly packed RGBA8 matching the surface dimensions.
    pub fn write_frame(
        &self,
        data: &[u8],
        transform: Option<Transform>,
    ) -> Result<(), PipelineError> {
        let notifier = {
            let mut state = self.shared.lock();
            if state.detached {
                return Err(PipelineError::SurfaceDetached);
            }
            let expected = state.width as usize * state.height as usize * 4;
            if data.len() != expected {
                return Err(PipelineError::PayloadSize {
                    got: data.len(),
                    expected,
                    width: state.width,
                    height: state.height,
                });
            }
            state.pending = Some(ProducerFrame {
                width: state.width,
                height: state.height,
                data: data.to_vec(),
                transform: transform.unwrap_or(IDENTITY),
            });
            state.writes += 1;
            state.notifier.clone()
        };
        // Fired outside the lock; the notifier enqueues a render command.
        if let Some(notify) = notifier {
            notify();
        }
        Ok(())
    }

    /// Takes the pending frame, if any. Render thread only.
    pub fn take_pending(&self) -> Option<ProducerFrame> {
        self.shared.lock().pending.take()
    }

    /// Installs the closure fired after each write.
    pub fn set_notifier(&self, notify: impl Fn() + Send + Sync + 'static) {
        self.shared.lock().notifier = Some(Arc::new(notify));
    }

    /// Updates the default dimensions future writes must match.
    pub fn set_default_size(&self, width: u32, height: u32) {
        let mut state = self.shared.lock();
        state.width = width.max(1);
        state.height = height.max(1);
    }

    /// Severs the surface from its consumer. Writes fail from then on and
    /// any pending frame is dropped.
    pub fn detach(&self) {
        let mut state = self.shared.lock();
        state.detached = true;
        state.pending = None;
        state.notifier = None;
    }

    pub fn is_alive(&self) -> bool {
        !self.shared.lock().detached
    }

    /// Total successful writes, for diagnostics.
    pub fn writes(&self) -> u64 {
        self.shared.lock().writes
    }
}

impl PartialEq for FrameSurface {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for FrameSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("FrameSurface")
            .field("width", &state.width)
            .field("height", &state.height)
            .field("detached", &state.detached)
            .field("writes", &state.writes)
            .finish()
    }
}

/// One rendered frame delivered to a [`FrameCollector`].
#[derive(Debug, Clone)]
pub struct CollectedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

struct CollectorState {
    frames: VecDeque<CollectedFrame>,
    capacity: usize,
    received: u64,
    closed: bool,
}

/// Consumer handle receiving frames drawn by a sink or effect target.
/// Bounded; when full the oldest frame is dropped.
#[derive(Clone)]
pub struct FrameCollector {
    shared: Arc<Mutex<CollectorState>>,
}

impl FrameCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(CollectorState {
                frames: VecDeque::new(),
                capacity: capacity.max(1),
                received: 0,
                closed: false,
            })),
        }
    }

    /// Delivers a frame. Returns `false` if the collector has been closed.
    pub fn push(&self, frame: CollectedFrame) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        if state.frames.len() == state.capacity {
            state.frames.pop_front();
        }
        state.frames.push_back(frame);
        state.received += 1;
        true
    }

    /// Drains every buffered frame, oldest first.
    pub fn take_frames(&self) -> Vec<CollectedFrame> {
        self.shared.lock().frames.drain(..).collect()
    }

    /// Total frames ever delivered, including dropped ones.
    pub fn received(&self) -> u64 {
        self.shared.lock().received
    }

    /// Marks the collector dead; targets bound to it skip their draws.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.closed = true;
        state.frames.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl PartialEq for FrameCollector {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for FrameCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("FrameCollector")
            .field("buffered", &state.frames.len())
            .field("received", &state.received)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Destination a renderer target can draw into.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceBinding {
    Stream(FrameSurface),
    Collector(FrameCollector),
}

impl SurfaceBinding {
    /// Whether the binding can still accept frames.
    pub fn is_supported(&self) -> bool {
        match self {
            SurfaceBinding::Stream(surface) => surface.is_alive(),
            SurfaceBinding::Collector(collector) => !collector.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn write_replaces_pending_and_fires_notifier() {
        let surface = FrameSurface::new(1, 1);
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        surface.set_notifier(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        surface.write_frame(&[1, 1, 1, 1], None).unwrap();
        surface.write_frame(&[2, 2, 2, 2], None).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        let frame = surface.take_pending().unwrap();
        assert_eq!(frame.data, vec![2, 2, 2, 2]);
        assert!(surface.take_pending().is_none());
        assert_eq!(surface.writes(), 2);
    }

    #[test]
    fn write_rejects_mismatched_payload() {
        let surface = FrameSurface::new(2, 2);
        let err = surface.write_frame(&[0u8; 4], None).unwrap_err();
        assert!(matches!(err, PipelineError::PayloadSize { expected: 16, .. }));
    }

    #[test]
    fn detached_surface_rejects_writes_and_drops_pending() {
        let surface = FrameSurface::new(1, 1);
        surface.write_frame(&[9, 9, 9, 9], None).unwrap();
        surface.detach();
        assert!(!surface.is_alive());
        assert!(surface.take_pending().is_none());
        assert!(matches!(
            surface.write_frame(&[1, 1, 1, 1], None),
            Err(PipelineError::SurfaceDetached)
        ));
    }

    #[test]
    fn surface_identity_is_pointer_identity() {
        let a = FrameSurface::new(1, 1);
        let b = a.clone();
        let c = FrameSurface::new(1, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            SurfaceBinding::Stream(a),
            SurfaceBinding::Collector(FrameCollector::new(1))
        );
    }

    #[test]
    fn collector_bounds_its_buffer() {
        let collector = FrameCollector::new(2);
        for i in 0..3u8 {
            collector.push(CollectedFrame {
                width: 1,
                height: 1,
                data: vec![i; 4],
            });
        }
        let frames = collector.take_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![1; 4]);
        assert_eq!(frames[1].data, vec![2; 4]);
        assert_eq!(collector.received(), 3);
    }

    #[test]
    fn closed_collector_is_unsupported() {
        let collector = FrameCollector::new(1);
        let binding = SurfaceBinding::Collector(collector.clone());
        assert!(binding.is_supported());
        collector.close();
        assert!(!binding.is_supported());
        assert!(!collector.push(CollectedFrame {
            width: 1,
            height: 1,
            data: vec![0; 4],
        }));
    }
}
