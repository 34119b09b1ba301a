//! One-time capability probe classifying the machine's GPU.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Ascending capability tiers. `Baseline` is always safe to assume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderTier {
    Baseline,
    Standard,
    Advanced,
}

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Probes the GPU once per process and caches the answer.
///
/// The probe runs on its own scratch thread with a bounded wait, so a driver
/// that hangs during adapter enumeration cannot wedge the caller; it is
/// abandoned and the tier degrades to [`RenderTier::Baseline`]. Failure here
/// is never fatal.
pub fn supported_render_tier() -> RenderTier {
    static TIER: OnceLock<RenderTier> = OnceLock::new();
    *TIER.get_or_init(probe_render_tier)
}

fn probe_render_tier() -> RenderTier {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("tier-probe".into())
        .spawn(move || {
            let _ = tx.send(classify_adapter());
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "could not spawn tier probe; assuming baseline");
        return RenderTier::Baseline;
    }
    match rx.recv_timeout(PROBE_TIMEOUT) {
        Ok(tier) => {
            tracing::debug!(?tier, "render tier probe finished");
            tier
        }
        Err(_) => {
            tracing::warn!("render tier probe timed out; assuming baseline");
            RenderTier::Baseline
        }
    }
}

fn classify_adapter() -> RenderTier {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    });
    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => adapter,
        Err(err) => {
            tracing::warn!(error = %err, "no GPU adapter available; assuming baseline");
            return RenderTier::Baseline;
        }
    };
    let info = adapter.get_info();
    let limits = adapter.limits();
    tracing::debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        max_texture_dimension_2d = limits.max_texture_dimension_2d,
        "probed GPU adapter"
    );
    if info.device_type == wgpu::DeviceType::Cpu {
        return RenderTier::Baseline;
    }
    if limits.max_texture_dimension_2d >= 8192 && limits.max_bind_groups >= 4 {
        RenderTier::Advanced
    } else {
        RenderTier::Standard
    }
}
