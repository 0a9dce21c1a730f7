// SPDX-License-Identifier: GPL-3.0-only

//! wgpu off-screen backend
//!
//! Render targets are `Rgba8Unorm` textures. Each quad is drawn in its own render
//! pass that loads the previous contents, so draws compose exactly like the
//! immediate-mode calls of the software backend. Readbacks come back RGBA with
//! the top row first.

use super::{
    ContextId, EXTERNAL_TEXTURE_EXTENSION, GpuApi, GpuDevice, PixelOrder, ProgramId, ProgramKind,
    QuadDraw, Readback, RowOrigin, SurfaceId, TextureId, TextureKind, Viewport,
};
use crate::errors::{GpuError, GpuResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform block of `quad.wgsl`
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadUniforms {
    mvp: [f32; 16],
    tex: [f32; 16],
}

/// wgpu adapter + device
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
}

impl WgpuDevice {
    /// Open the first suitable adapter.
    ///
    /// Blocks until the device is ready.
    pub fn open(label: &str) -> GpuResult<Self> {
        pollster::block_on(Self::open_async(label))
    }

    async fn open_async(label: &str) -> GpuResult<Self> {
        info!(label = label, "Creating GPU device for rendering");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::Backend(format!("No suitable GPU adapter: {}", e)))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| GpuError::Backend(format!("Failed to create GPU device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: adapter_info.name,
        })
    }
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn create_context(
        &self,
        id: ContextId,
        share_with: Option<&Arc<dyn GpuApi>>,
    ) -> GpuResult<Arc<dyn GpuApi>> {
        if let Some(api) = share_with {
            return Ok(Arc::clone(api));
        }
        debug!(context = id, "Creating wgpu object namespace");
        Ok(Arc::new(WgpuApi::new(
            Arc::clone(&self.device),
            Arc::clone(&self.queue),
        )))
    }

    fn destroy_context(&self, id: ContextId) {
        debug!(context = id, "wgpu context destroyed");
    }
}

struct TextureEntry {
    kind: TextureKind,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct SurfaceEntry {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

#[derive(Default)]
struct State {
    next_id: u32,
    textures: HashMap<TextureId, TextureEntry>,
    programs: HashMap<ProgramId, ProgramKind>,
    surfaces: HashMap<SurfaceId, SurfaceEntry>,
}

impl State {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Object namespace of one wgpu share group
pub struct WgpuApi {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    state: Mutex<State>,
}

impl WgpuApi {
    fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("quad.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quad_bind_group_layout"),
            entries: &[
                // Matrices
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Source texture
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("quad_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quad_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_uniforms"),
            size: std::mem::size_of::<QuadUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_texture_object(
        &self,
        label: &str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_target(&self, width: u32, height: u32) -> SurfaceEntry {
        let (texture, view) = self.create_texture_object(
            "render_target",
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        SurfaceEntry {
            width,
            height,
            texture,
            view,
        }
    }

    fn empty_texture(&self, kind: TextureKind) -> TextureEntry {
        let (texture, view) = self.create_texture_object(
            "quad_source",
            1,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        TextureEntry {
            kind,
            texture,
            view,
        }
    }
}

impl GpuApi for WgpuApi {
    fn extensions(&self) -> Vec<String> {
        // Capture frames arrive as plain RGBA uploads, sampled like any texture
        vec![EXTERNAL_TEXTURE_EXTENSION.to_string()]
    }

    fn create_texture(&self, kind: TextureKind) -> GpuResult<TextureId> {
        let entry = self.empty_texture(kind);
        let mut state = self.state();
        let id = state.alloc_id();
        state.textures.insert(id, entry);
        Ok(id)
    }

    fn upload_texture(
        &self,
        texture: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> GpuResult<()> {
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(GpuError::Backend(format!(
                "texture upload of {} bytes for {}x{}",
                rgba.len(),
                width,
                height
            )));
        }
        let mut state = self.state();
        let entry = state
            .textures
            .get_mut(&texture)
            .ok_or(GpuError::InvalidTexture(texture))?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let size = entry.texture.size();
        if size.width != width || size.height != height {
            let (tex, view) = self.create_texture_object(
                "quad_source",
                width,
                height,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            );
            entry.texture = tex;
            entry.view = view;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
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

    fn delete_texture(&self, texture: TextureId) {
        self.state().textures.remove(&texture);
    }

    fn create_program(&self, kind: ProgramKind) -> GpuResult<ProgramId> {
        let mut state = self.state();
        let id = state.alloc_id();
        state.programs.insert(id, kind);
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        self.state().programs.remove(&program);
    }

    fn create_surface(&self, width: u32, height: u32) -> GpuResult<SurfaceId> {
        let entry = self.create_target(width, height);
        let mut state = self.state();
        let id = state.alloc_id();
        state.surfaces.insert(id, entry);
        Ok(id)
    }

    fn resize_surface(&self, surface: SurfaceId, width: u32, height: u32) -> GpuResult<()> {
        let entry = self.create_target(width, height);
        let mut state = self.state();
        let slot = state
            .surfaces
            .get_mut(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;
        *slot = entry;
        Ok(())
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        self.state().surfaces.remove(&surface);
    }

    fn clear(&self, surface: SurfaceId, color: [f32; 4]) -> GpuResult<()> {
        let state = self.state();
        let target = state
            .surfaces
            .get(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear_encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn draw_quad(
        &self,
        surface: SurfaceId,
        viewport: Viewport,
        draw: &QuadDraw<'_>,
    ) -> GpuResult<()> {
        let state = self.state();
        let program_kind = *state
            .programs
            .get(&draw.program)
            .ok_or(GpuError::InvalidProgram(draw.program))?;
        let source = state
            .textures
            .get(&draw.texture)
            .ok_or(GpuError::InvalidTexture(draw.texture))?;
        if ProgramKind::for_texture(source.kind) != program_kind {
            return Err(GpuError::Backend(format!(
                "program {:?} cannot sample {:?} texture",
                program_kind, source.kind
            )));
        }
        let target = state
            .surfaces
            .get(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;

        // Viewport is bottom-left based; wgpu wants the top edge
        let top = target.height as i32 - (viewport.y + viewport.height as i32);
        let scissor_x0 = viewport.x.clamp(0, target.width as i32);
        let scissor_y0 = top.clamp(0, target.height as i32);
        let scissor_x1 = (viewport.x + viewport.width as i32).clamp(0, target.width as i32);
        let scissor_y1 = (top + viewport.height as i32).clamp(0, target.height as i32);
        if scissor_x1 <= scissor_x0 || scissor_y1 <= scissor_y0 {
            return Ok(());
        }

        let uniforms = QuadUniforms {
            mvp: *draw.mvp,
            tex: *draw.tex_matrix,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quad_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(
                viewport.x as f32,
                top as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(
                scissor_x0 as u32,
                scissor_y0 as u32,
                (scissor_x1 - scissor_x0) as u32,
                (scissor_y1 - scissor_y0) as u32,
            );
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&self, surface: SurfaceId, rect: Viewport) -> GpuResult<Readback> {
        let state = self.state();
        let target = state
            .surfaces
            .get(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;
        if rect.x < 0
            || rect.y < 0
            || rect.width == 0
            || rect.height == 0
            || rect.x as u32 + rect.width > target.width
            || rect.y as u32 + rect.height > target.height
        {
            return Err(GpuError::Readback(format!(
                "rect {:?} outside {}x{} surface",
                rect, target.width, target.height
            )));
        }

        let (width, height) = (rect.width, rect.height);
        let top = target.height - (rect.y as u32 + height);
        let padded_bytes_per_row = (width * 4 + 255) & !255; // Align to 256 bytes

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x as u32,
                    y: top,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        drop(state);

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());

        pollster::block_on(receiver)
            .map_err(|_| GpuError::Readback("Failed to receive buffer mapping result".into()))?
            .map_err(|e| GpuError::Readback(format!("Failed to map buffer: {:?}", e)))?;

        let mapped = buffer_slice.get_mapped_range();
        let row_bytes = (width * 4) as usize;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * padded_bytes_per_row as usize;
            data.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        staging_buffer.unmap();

        Ok(Readback {
            width,
            height,
            order: PixelOrder::Rgba,
            origin: RowOrigin::TopLeft,
            data,
        })
    }

    fn flush(&self, surface: SurfaceId) -> GpuResult<()> {
        if !self.state().surfaces.contains_key(&surface) {
            return Err(GpuError::InvalidSurface(surface));
        }
        let _ = self.device.poll(wgpu::PollType::Poll);
        Ok(())
    }
}
