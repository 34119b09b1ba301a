//! Deterministic CPU implementation of [`GpuContext`].
//!
//! Renders with nearest-neighbour sampling through the frame transform and
//! applies effects as plain pixel math, so stage behaviour can be asserted
//! byte for byte without a GPU.

use std::collections::HashMap;

use rendertask::{ContextFactory, TaskError};

use crate::context::{BoxedContext, ContextError, EffectKind, GpuContext};
use crate::frame::{DrawerId, TextureId, Transform};
use crate::matrix;
use crate::surface::{CollectedFrame, SurfaceBinding};
use crate::tier::RenderTier;
use crate::PipelineError;

struct SoftTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

struct SoftDrawer {
    #[allow(dead_code)]
    external: bool,
    effect: Option<EffectKind>,
}

pub struct SoftwareContext {
    tier: RenderTier,
    textures: HashMap<u64, SoftTexture>,
    drawers: HashMap<u64, SoftDrawer>,
    next_texture: u64,
    next_drawer: u64,
    drawers_created: u64,
    draws: u64,
}

impl SoftwareContext {
    pub fn new(tier: RenderTier) -> Self {
        Self {
            tier,
            textures: HashMap::new(),
            drawers: HashMap::new(),
            next_texture: 0,
            next_drawer: 0,
            drawers_created: 0,
            draws: 0,
        }
    }

    /// Drawers ever built, including replaced ones.
    pub fn drawers_created(&self) -> u64 {
        self.drawers_created
    }

    pub fn live_drawers(&self) -> usize {
        self.drawers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    fn render(
        texture: &SoftTexture,
        effect: Option<EffectKind>,
        transform: &Transform,
        out_width: u32,
        out_height: u32,
    ) -> Vec<u8> {
        let mut out = vec![0u8; out_width as usize * out_height as usize * 4];
        for y in 0..out_height {
            for x in 0..out_width {
                let u = (x as f32 + 0.5) / out_width as f32;
                let v = (y as f32 + 0.5) / out_height as f32;
                let (su, sv) = matrix::apply(transform, u, v);
                let sx = ((su * texture.width as f32) as i64)
                    .clamp(0, texture.width as i64 - 1) as usize;
                let sy = ((sv * texture.height as f32) as i64)
                    .clamp(0, texture.height as i64 - 1) as usize;
                let src = (sy * texture.width as usize + sx) * 4;
                let dst = (y as usize * out_width as usize + x as usize) * 4;
                let pixel = apply_effect(effect, &texture.data[src..src + 4]);
                out[dst..dst + 4].copy_from_slice(&pixel);
            }
        }
        out
    }
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new(RenderTier::Baseline)
    }
}

fn apply_effect(effect: Option<EffectKind>, rgba: &[u8]) -> [u8; 4] {
    let [r, g, b, a] = [rgba[0], rgba[1], rgba[2], rgba[3]];
    match effect {
        None => [r, g, b, a],
        Some(EffectKind::Grayscale) => {
            let luma =
                (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8;
            [luma, luma, luma, a]
        }
        Some(EffectKind::Sepia) => {
            let (rf, gf, bf) = (r as f32, g as f32, b as f32);
            let sr = (0.393 * rf + 0.769 * gf + 0.189 * bf).min(255.0) as u8;
            let sg = (0.349 * rf + 0.686 * gf + 0.168 * bf).min(255.0) as u8;
            let sb = (0.272 * rf + 0.534 * gf + 0.131 * bf).min(255.0) as u8;
            [sr, sg, sb, a]
        }
        Some(EffectKind::Invert) => [255 - r, 255 - g, 255 - b, a],
    }
}

impl GpuContext for SoftwareContext {
    fn tier(&self) -> RenderTier {
        self.tier
    }

    fn create_source_texture(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TextureId, ContextError> {
        let width = width.max(1);
        let height = height.max(1);
        self.next_texture += 1;
        self.textures.insert(
            self.next_texture,
            SoftTexture {
                width,
                height,
                data: vec![0; width as usize * height as usize * 4],
            },
        );
        Ok(TextureId(self.next_texture))
    }

    fn delete_texture(&mut self, id: TextureId) {
        self.textures.remove(&id.0);
    }

    fn upload_frame(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), ContextError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ContextError::PayloadSize {
                got: data.len(),
                expected,
                width,
                height,
            });
        }
        let texture = self
            .textures
            .get_mut(&id.0)
            .ok_or(ContextError::UnknownTexture(id))?;
        texture.width = width;
        texture.height = height;
        texture.data = data.to_vec();
        Ok(())
    }

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&id.0).map(|t| (t.width, t.height))
    }

    fn create_drawer(
        &mut self,
        external: bool,
        effect: Option<EffectKind>,
    ) -> Result<DrawerId, ContextError> {
        self.next_drawer += 1;
        self.drawers_created += 1;
        self.drawers
            .insert(self.next_drawer, SoftDrawer { external, effect });
        Ok(DrawerId(self.next_drawer))
    }

    fn release_drawer(&mut self, id: DrawerId) {
        self.drawers.remove(&id.0);
    }

    fn draw_to_binding(
        &mut self,
        drawer: DrawerId,
        src: TextureId,
        transform: &Transform,
        dst: &SurfaceBinding,
    ) -> Result<(), ContextError> {
        let effect = self
            .drawers
            .get(&drawer.0)
            .ok_or(ContextError::UnknownDrawer(drawer))?
            .effect;
        let texture = self
            .textures
            .get(&src.0)
            .ok_or(ContextError::UnknownTexture(src))?;
        match dst {
            SurfaceBinding::Collector(collector) => {
                let data = Self::render(texture, effect, transform, texture.width, texture.height);
                if !collector.push(CollectedFrame {
                    width: texture.width,
                    height: texture.height,
                    data,
                }) {
                    return Err(ContextError::SurfaceGone);
                }
            }
            SurfaceBinding::Stream(surface) => {
                let (width, height) = surface.size();
                let data = Self::render(texture, effect, transform, width, height);
                surface.write_frame(&data, None).map_err(|err| match err {
                    PipelineError::SurfaceDetached => ContextError::SurfaceGone,
                    other => ContextError::Gpu(other.to_string()),
                })?;
            }
        }
        self.draws += 1;
        Ok(())
    }

    fn read_pixels(
        &mut self,
        src: TextureId,
        out: &mut Vec<u8>,
    ) -> Result<(u32, u32), ContextError> {
        let texture = self
            .textures
            .get(&src.0)
            .ok_or(ContextError::UnknownTexture(src))?;
        out.clear();
        out.extend_from_slice(&texture.data);
        Ok((texture.width, texture.height))
    }
}

/// Builds a boxed [`SoftwareContext`] on the render thread. Test double for
/// the wgpu factory.
#[derive(Default)]
pub struct SoftwareFactory {
    tier: Option<RenderTier>,
}

impl SoftwareFactory {
    pub fn with_tier(tier: RenderTier) -> Self {
        Self { tier: Some(tier) }
    }
}

impl ContextFactory for SoftwareFactory {
    type Ctx = BoxedContext;

    fn create_context(&mut self) -> Result<BoxedContext, TaskError> {
        let tier = self.tier.unwrap_or(RenderTier::Baseline);
        Ok(Box::new(SoftwareContext::new(tier)))
    }
}
