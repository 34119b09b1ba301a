//! wgpu implementation of [`GpuContext`].
//!
//! All rendering is offscreen: frames are uploaded into RGBA8 textures,
//! drawn through a fullscreen triangle with the frame transform and effect
//! applied in the shader, then read back and handed to the binding.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

use rendertask::{ContextFactory, TaskError};

use crate::context::{BoxedContext, ContextError, EffectKind, GpuContext};
use crate::frame::{DrawerId, TextureId, Transform};
use crate::surface::{CollectedFrame, SurfaceBinding};
use crate::tier::{supported_render_tier, RenderTier};
use crate::PipelineError;

const RENDER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const MAP_TIMEOUT: Duration = Duration::from_secs(5);

const SHADER_SOURCE: &str = r#"
struct Uniforms {
    transform: mat4x4<f32>,
    effect: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    var out: VsOut;
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = (uniforms.transform * vec4<f32>(corner, 0.0, 1.0)).xy;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let color = textureSample(source, source_sampler, in.uv);
    switch uniforms.effect {
        case 1u: {
            let luma = dot(color.rgb, vec3<f32>(0.299, 0.587, 0.114));
            return vec4<f32>(vec3<f32>(luma), color.a);
        }
        case 2u: {
            let sepia = vec3<f32>(
                dot(color.rgb, vec3<f32>(0.393, 0.769, 0.189)),
                dot(color.rgb, vec3<f32>(0.349, 0.686, 0.168)),
                dot(color.rgb, vec3<f32>(0.272, 0.534, 0.131)),
            );
            return vec4<f32>(min(sepia, vec3<f32>(1.0)), color.a);
        }
        case 3u: {
            return vec4<f32>(vec3<f32>(1.0) - color.rgb, color.a);
        }
        default: {
            return color;
        }
    }
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniforms {
    transform: [f32; 16],
    effect: u32,
    _pad: [u32; 3],
}

fn effect_index(effect: Option<EffectKind>) -> u32 {
    match effect {
        None => 0,
        Some(EffectKind::Grayscale) => 1,
        Some(EffectKind::Sepia) => 2,
        Some(EffectKind::Invert) => 3,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

struct GpuDrawer {
    effect: Option<EffectKind>,
    uniform_buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
}

pub struct WgpuContext {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    tier: RenderTier,
    pipeline: wgpu::RenderPipeline,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    textures: HashMap<u64, GpuTexture>,
    drawers: HashMap<u64, GpuDrawer>,
    next_texture: u64,
    next_drawer: u64,
}

impl WgpuContext {
    pub fn new(power_preference: wgpu::PowerPreference) -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
            .map_err(|err| ContextError::Gpu(format!("no suitable adapter: {err}")))?;
        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("pipeline device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::default(),
            }))
            .map_err(|err| ContextError::Gpu(format!("device creation failed: {err}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frame shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame uniforms layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frame pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("frame pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: RENDER_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..wgpu::SamplerDescriptor::default()
        });

        Ok(Self {
            _instance: instance,
            device,
            queue,
            tier: supported_render_tier(),
            pipeline,
            uniform_layout,
            texture_layout,
            sampler,
            textures: HashMap::new(),
            drawers: HashMap::new(),
            next_texture: 0,
            next_drawer: 0,
        })
    }

    fn allocate_texture(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: RENDER_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
    }

    /// Renders `src` through `drawer` into a scratch texture of the given
    /// size and reads the result back as tightly packed RGBA8.
    fn render_to_pixels(
        &mut self,
        drawer: DrawerId,
        src: TextureId,
        transform: &Transform,
        out_width: u32,
        out_height: u32,
    ) -> Result<Vec<u8>, ContextError> {
        let drawer = self
            .drawers
            .get(&drawer.0)
            .ok_or(ContextError::UnknownDrawer(drawer))?;
        let source = self
            .textures
            .get(&src.0)
            .ok_or(ContextError::UnknownTexture(src))?;

        let uniforms = DrawUniforms {
            transform: *transform,
            effect: effect_index(drawer.effect),
            _pad: [0; 3],
        };
        self.queue
            .write_buffer(&drawer.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let target = self.allocate_texture(out_width, out_height);
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let source_view = source
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame texture bind group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &drawer.uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));

        self.read_texture_pixels(&target, out_width, out_height)
    }

    fn read_texture_pixels(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ContextError> {
        let unpadded_bpr = width * 4;
        let padded_bpr = unpadded_bpr.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame readback"),
            size: padded_bpr as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        match receiver.recv_timeout(MAP_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(ContextError::Gpu(format!("buffer map failed: {err}"))),
            Err(_) => return Err(ContextError::Gpu("buffer map timed out".into())),
        }

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(unpadded_bpr as usize * height as usize);
        for row in 0..height as usize {
            let start = row * padded_bpr as usize;
            pixels.extend_from_slice(&mapped[start..start + unpadded_bpr as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Ok(pixels)
    }
}

impl GpuContext for WgpuContext {
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
        let texture = self.allocate_texture(width, height);
        self.next_texture += 1;
        self.textures.insert(
            self.next_texture,
            GpuTexture {
                texture,
                width,
                height,
            },
        );
        Ok(TextureId(self.next_texture))
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(entry) = self.textures.remove(&id.0) {
            entry.texture.destroy();
        }
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
        if !self.textures.contains_key(&id.0) {
            return Err(ContextError::UnknownTexture(id));
        }
        let needs_realloc = {
            let entry = &self.textures[&id.0];
            entry.width != width || entry.height != height
        };
        if needs_realloc {
            let texture = self.allocate_texture(width, height);
            if let Some(entry) = self.textures.get_mut(&id.0) {
                entry.texture.destroy();
                entry.texture = texture;
                entry.width = width;
                entry.height = height;
            }
        }
        let entry = &self.textures[&id.0];
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&id.0).map(|t| (t.width, t.height))
    }

    fn create_drawer(
        &mut self,
        _external: bool,
        effect: Option<EffectKind>,
    ) -> Result<DrawerId, ContextError> {
        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("drawer uniforms"),
            size: std::mem::size_of::<DrawUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("drawer uniform bind group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        self.next_drawer += 1;
        self.drawers.insert(
            self.next_drawer,
            GpuDrawer {
                effect,
                uniform_buffer,
                uniform_group,
            },
        );
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
        let (out_width, out_height) = match dst {
            SurfaceBinding::Stream(surface) => surface.size(),
            SurfaceBinding::Collector(_) => self
                .textures
                .get(&src.0)
                .map(|t| (t.width, t.height))
                .ok_or(ContextError::UnknownTexture(src))?,
        };
        let pixels = self.render_to_pixels(drawer, src, transform, out_width, out_height)?;
        match dst {
            SurfaceBinding::Stream(surface) => {
                surface.write_frame(&pixels, None).map_err(|err| match err {
                    PipelineError::SurfaceDetached => ContextError::SurfaceGone,
                    other => ContextError::Gpu(other.to_string()),
                })?;
            }
            SurfaceBinding::Collector(collector) => {
                if !collector.push(CollectedFrame {
                    width: out_width,
                    height: out_height,
                    data: pixels,
                }) {
                    return Err(ContextError::SurfaceGone);
                }
            }
        }
        Ok(())
    }

    fn read_pixels(
        &mut self,
        src: TextureId,
        out: &mut Vec<u8>,
    ) -> Result<(u32, u32), ContextError> {
        let (texture, width, height) = {
            let entry = self
                .textures
                .get(&src.0)
                .ok_or(ContextError::UnknownTexture(src))?;
            (&entry.texture, entry.width, entry.height)
        };
        let pixels = self.read_texture_pixels(texture, width, height)?;
        out.clear();
        out.extend_from_slice(&pixels);
        Ok((width, height))
    }
}

/// Builds a boxed [`WgpuContext`] on the render thread.
pub struct WgpuFactory {
    pub power_preference: wgpu::PowerPreference,
}

impl Default for WgpuFactory {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl ContextFactory for WgpuFactory {
    type Ctx = BoxedContext;

    fn create_context(&mut self) -> Result<BoxedContext, TaskError> {
        WgpuContext::new(self.power_preference)
            .map(|ctx| Box::new(ctx) as BoxedContext)
            .map_err(|err| TaskError::ContextInit(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::IDENTITY;

    #[test]
    fn effect_indices_are_stable() {
        assert_eq!(effect_index(None), 0);
        assert_eq!(effect_index(Some(EffectKind::Grayscale)), 1);
        assert_eq!(effect_index(Some(EffectKind::Sepia)), 2);
        assert_eq!(effect_index(Some(EffectKind::Invert)), 3);
    }

    #[test]
    fn draw_uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 80);
        let uniforms = DrawUniforms {
            transform: IDENTITY,
            effect: 3,
            _pad: [0; 3],
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 80);
        // The effect index sits right after the matrix.
        assert_eq!(bytes[64], 3);
    }
}
