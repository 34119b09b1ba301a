//! Paced output target wrapping a surface binding.

use std::time::{Duration, Instant};

use crate::context::GpuContext;
use crate::frame::{DrawerId, TextureId, Transform};
use crate::surface::SurfaceBinding;
use crate::PipelineError;

const PACING_SLACK: Duration = Duration::from_micros(250);

/// A presentation destination with an optional frame-rate ceiling.
///
/// Draws outside the pacing window, to a disabled target, or to a binding
/// that died after attachment are silently skipped; pacing state is shared
/// across every producer drawing into the same target.
pub struct RendererTarget {
    binding: SurfaceBinding,
    interval: Option<Duration>,
    accumulator: Duration,
    last_tick: Option<Instant>,
    enabled: bool,
    released: bool,
}

impl RendererTarget {
    /// Wraps a binding. Fails fast when the binding is already dead so the
    /// caller learns about it before any frame is dropped. A `max_fps` of
    /// zero or below means uncapped.
    pub fn new(binding: SurfaceBinding, max_fps: Option<f32>) -> Result<Self, PipelineError> {
        if !binding.is_supported() {
            return Err(PipelineError::UnsupportedSurface);
        }
        let interval = normalize_fps(max_fps).map(|fps| Duration::from_secs_f64(1.0 / fps as f64));
        Ok(Self {
            binding,
            interval,
            accumulator: Duration::ZERO,
            last_tick: None,
            enabled: true,
            released: false,
        })
    }

    pub fn binding(&self) -> &SurfaceBinding {
        &self.binding
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_valid(&self) -> bool {
        !self.released && self.binding.is_supported()
    }

    /// Draws a texture into the binding, honouring the pacing window.
    /// Returns `true` when a draw actually happened.
    pub fn draw(
        &mut self,
        ctx: &mut dyn GpuContext,
        drawer: DrawerId,
        src: TextureId,
        transform: &Transform,
        now: Instant,
    ) -> bool {
        if !self.enabled || !self.is_valid() {
            return false;
        }
        if !self.should_draw(now) {
            return false;
        }
        if let Err(err) = ctx.draw_to_binding(drawer, src, transform, &self.binding) {
            tracing::warn!(error = %err, "draw to target failed; frame dropped");
            return false;
        }
        true
    }

    /// Marks the target dead. The binding itself belongs to the caller and
    /// is left open.
    pub fn release(&mut self) {
        self.released = true;
    }

    fn should_draw(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return true;
        };
        let delta = now.saturating_duration_since(last);
        self.last_tick = Some(now);
        self.accumulator = self.accumulator.saturating_add(delta);
        if self.accumulator + PACING_SLACK < interval {
            return false;
        }
        // Subtract a single interval so a long stall cannot bank a burst.
        self.accumulator = self.accumulator.saturating_sub(interval);
        true
    }
}

fn normalize_fps(max_fps: Option<f32>) -> Option<f32> {
    match max_fps {
        Some(fps) if fps.is_finite() && fps > 0.0 => Some(fps),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareContext;
    use crate::surface::{FrameCollector, FrameSurface};
    use crate::matrix::IDENTITY;

    fn collector_target(max_fps: Option<f32>) -> (RendererTarget, FrameCollector) {
        let collector = FrameCollector::new(256);
        let target =
            RendererTarget::new(SurfaceBinding::Collector(collector.clone()), max_fps).unwrap();
        (target, collector)
    }

    #[test]
    fn dead_binding_is_rejected_at_construction() {
        let surface = FrameSurface::new(1, 1);
        surface.detach();
        let Err(err) = RendererTarget::new(SurfaceBinding::Stream(surface), None) else {
            panic!("a detached surface must be rejected");
        };
        assert!(matches!(err, PipelineError::UnsupportedSurface));
    }

    #[test]
    fn uncapped_target_draws_every_frame() {
        let mut ctx = SoftwareContext::default();
        let tex = ctx.create_source_texture(1, 1).unwrap();
        ctx.upload_frame(tex, 1, 1, &[8, 8, 8, 8]).unwrap();
        let drawer = ctx.create_drawer(true, None).unwrap();
        let (mut target, collector) = collector_target(None);

        let start = Instant::now();
        for i in 0..10 {
            let now = start + Duration::from_millis(i);
            assert!(target.draw(&mut ctx, drawer, tex, &IDENTITY, now));
        }
        assert_eq!(collector.received(), 10);
    }

    #[test]
    fn disabled_target_skips_silently() {
        let mut ctx = SoftwareContext::default();
        let tex = ctx.create_source_texture(1, 1).unwrap();
        ctx.upload_frame(tex, 1, 1, &[8, 8, 8, 8]).unwrap();
        let drawer = ctx.create_drawer(true, None).unwrap();
        let (mut target, collector) = collector_target(None);

        target.set_enabled(false);
        assert!(!target.draw(&mut ctx, drawer, tex, &IDENTITY, Instant::now()));
        target.set_enabled(true);
        assert!(target.draw(&mut ctx, drawer, tex, &IDENTITY, Instant::now()));
        assert_eq!(collector.received(), 1);
    }

    #[test]
    fn released_target_never_draws_again() {
        let mut ctx = SoftwareContext::default();
        let tex = ctx.create_source_texture(1, 1).unwrap();
        ctx.upload_frame(tex, 1, 1, &[8, 8, 8, 8]).unwrap();
        let drawer = ctx.create_drawer(true, None).unwrap();
        let (mut target, collector) = collector_target(None);

        target.release();
        assert!(!target.is_valid());
        assert!(!target.draw(&mut ctx, drawer, tex, &IDENTITY, Instant::now()));
        assert_eq!(collector.received(), 0);
    }

    #[test]
    fn fps_ceiling_bounds_draws_over_a_window() {
        let mut ctx = SoftwareContext::default();
        let tex = ctx.create_source_texture(1, 1).unwrap();
        ctx.upload_frame(tex, 1, 1, &[8, 8, 8, 8]).unwrap();
        let drawer = ctx.create_drawer(true, None).unwrap();

        // 30 fps ceiling, frames offered every 5 ms for one second: at most
        // floor(30 * 1) + 1 draws may land.
        let (mut target, collector) = collector_target(Some(30.0));
        let start = Instant::now();
        let mut offered = 0;
        let mut t = Duration::ZERO;
        while t < Duration::from_secs(1) {
            target.draw(&mut ctx, drawer, tex, &IDENTITY, start + t);
            offered += 1;
            t += Duration::from_millis(5);
        }
        let drawn = collector.received();
        assert!(offered as u64 > drawn, "ceiling had no effect");
        assert!(drawn <= 31, "drew {drawn} frames, ceiling allows 31");
        assert!(drawn >= 28, "drew only {drawn} frames under a 30 fps cap");
    }

    #[test]
    fn non_positive_fps_means_uncapped() {
        assert_eq!(normalize_fps(Some(0.0)), None);
        assert_eq!(normalize_fps(Some(-10.0)), None);
        assert_eq!(normalize_fps(Some(f32::NAN)), None);
        assert_eq!(normalize_fps(Some(24.0)), Some(24.0));
        assert_eq!(normalize_fps(None), None);
    }
}
