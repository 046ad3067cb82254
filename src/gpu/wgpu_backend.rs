//! wgpu implementation of [`GpuContext`].
//!
//! Surfaces are storage buffers (RGB sums padded to `vec4<f32>`, RNG state as
//! `u32`), constant blocks are uniform buffers attached by index, the trace
//! program is a compute pipeline and the display / normals programs draw a
//! fullscreen triangle into an offscreen `Rgba8Unorm` frame texture.
//!
//! ## Usage
//! ```ignore
//! let mut ctx = WgpuContext::new()?;
//! let mut renderer = Renderer::new(&mut ctx, 1280, 720, Scene::default())?;
//! renderer.render(&mut ctx)?;
//! // present ctx.frame_view()
//! ```

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, RenderTarget, SurfaceFormat, SurfaceInit};
use super::program::{Program, ProgramKind, ProgramSource, ProgramStages};
use super::{BlockHandle, ProgramHandle, SurfaceHandle};
use crate::util::{Error, Resolution, Result};

/// Format of the offscreen frame the display and normals programs write.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform block shared by the trace and normals programs (matches WGSL `CameraParams`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraParams {
    pub resolution: [u32; 2],
    pub resolution_y_inv: f32,
    pub tan_half_fov: f32,
    pub cam_pos: [f32; 3],
    pub max_bounces: u32,
    pub cam_forward: [f32; 3],
    pub material_count: u32,
    pub cam_right: [f32; 3],
    pub primitive_count: u32,
    pub cam_up: [f32; 3],
    pub _pad: u32,
}

impl CameraParams {
    /// Pack from a program's uniform table. Material fields are only read for
    /// programs that bind the material block.
    fn from_program(program: &Program, with_materials: bool) -> Result<Self> {
        let (max_bounces, material_count) = if with_materials {
            (program.uniform_u32("maxBounces")?, program.uniform_u32("materialCount")?)
        } else {
            (0, 0)
        };
        Ok(Self {
            resolution: program.uniform_uvec2("resolution")?,
            resolution_y_inv: program.uniform_f32("resolutionYInv")?,
            tan_half_fov: program.uniform_f32("tanHalfFov")?,
            cam_pos: program.uniform_vec3("camPos")?,
            max_bounces,
            cam_forward: program.uniform_vec3("camForward")?,
            material_count,
            cam_right: program.uniform_vec3("camRight")?,
            primitive_count: program.uniform_u32("primitiveCount")?,
            cam_up: program.uniform_vec3("camUp")?,
            _pad: 0,
        })
    }
}

/// Uniform block of the display program (matches WGSL `DisplayParams`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DisplayParams {
    pub resolution: [u32; 2],
    pub samples_inv: f32,
    pub _pad: f32,
}

struct GpuSurface {
    buffer: wgpu::Buffer,
    resolution: Resolution,
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Raster(wgpu::RenderPipeline),
}

struct GpuProgram {
    kind: ProgramKind,
    pipeline: Pipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    workgroup: (u32, u32),
}

struct FrameTarget {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: Resolution,
}

/// GPU context on a wgpu device.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: Vec<GpuProgram>,
    surfaces: Vec<Option<GpuSurface>>,
    blocks: Vec<Option<wgpu::Buffer>>,
    block_bindings: HashMap<u32, usize>,
    target: Option<RenderTarget>,
    frame: Option<FrameTarget>,
}

impl WgpuContext {
    /// Request a high-performance adapter and a device with default limits.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::allocation(format!("no compatible GPU adapter: {e}")))?;

        let info = adapter.get_info();
        tracing::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("progressive-tracer device"),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::allocation(format!("request_device failed: {e}")))?;

        Ok(Self::from_device(device, queue))
    }

    /// Wrap a device owned by a host application (e.g. a windowing layer).
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            programs: Vec::new(),
            surfaces: Vec::new(),
            blocks: Vec::new(),
            block_bindings: HashMap::new(),
            target: None,
            frame: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The last frame written by the display or normals program.
    pub fn frame_view(&self) -> Option<&wgpu::TextureView> {
        self.frame.as_ref().map(|f| &f.view)
    }

    /// Run `f` inside validation + out-of-memory error scopes.
    fn capture<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> std::result::Result<T, wgpu::Error> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match oom.or(validation) {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }

    fn surface(&self, handle: SurfaceHandle) -> Result<&GpuSurface> {
        self.surfaces
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Error::UnknownHandle { kind: "surface", id: handle.0 })
    }

    /// Block attached to `index`, after checking the program expects it there.
    fn block_for(&self, program: &Program, name: &str, index: u32) -> Result<&wgpu::Buffer> {
        let bound = program.block(name)?;
        if bound != index {
            return Err(Error::program(format!("{name} bound at {bound}, expected {index}")));
        }
        self.block_bindings
            .get(&index)
            .and_then(|&i| self.blocks.get(i).and_then(|b| b.as_ref()))
            .ok_or_else(|| Error::program(format!("no block attached at index {index}")))
    }

    fn ensure_frame(&mut self, resolution: Resolution) -> Result<()> {
        if self.frame.as_ref().is_some_and(|f| f.resolution == resolution) {
            return Ok(());
        }
        let texture = self
            .capture(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("pt_frame"),
                    size: wgpu::Extent3d {
                        width: resolution.width(),
                        height: resolution.height(),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: FRAME_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(|e| Error::allocation(format!("frame {resolution}: {e}")))?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(FrameTarget { texture, view, resolution });
        Ok(())
    }

    fn bind_group_layout(&self, kind: ProgramKind) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = match kind {
            ProgramKind::Trace => {
                let vis = wgpu::ShaderStages::COMPUTE;
                vec![
                    uniform_entry(0, vis),
                    uniform_entry(1, vis),
                    uniform_entry(2, vis),
                    storage_entry(3, vis, false),
                    storage_entry(4, vis, false),
                ]
            }
            ProgramKind::Display => {
                let vis = wgpu::ShaderStages::FRAGMENT;
                vec![uniform_entry(2, vis), storage_entry(3, vis, true)]
            }
            ProgramKind::Normals => {
                let vis = wgpu::ShaderStages::FRAGMENT;
                vec![uniform_entry(1, vis), uniform_entry(2, vis)]
            }
        };
        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pt_bind_group_layout"),
            entries: &entries,
        })
    }

    fn dispatch_trace(
        &self,
        gp: &GpuProgram,
        program: &Program,
        accum: SurfaceHandle,
        state: SurfaceHandle,
    ) -> Result<()> {
        let Pipeline::Compute(pipeline) = &gp.pipeline else {
            return Err(Error::program("trace program is not a compute pipeline"));
        };
        if program.texture("accumTexture")?.surface != accum
            || program.texture("stateTexture")?.surface != state
        {
            return Err(Error::program("trace textures do not match the bound target"));
        }
        let params = CameraParams::from_program(program, true)?;
        let materials = self.block_for(program, "MaterialBlock", 0)?;
        let primitives = self.block_for(program, "PrimitiveBlock", 1)?;
        let accum = self.surface(accum)?;
        let state = self.surface(state)?;
        if accum.resolution.as_array() != params.resolution || state.resolution != accum.resolution {
            return Err(Error::program("resolution uniform does not match surfaces"));
        }

        self.queue.write_buffer(&gp.params, 0, bytemuck::bytes_of(&params));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_trace_bg"),
            layout: &gp.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: materials.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: primitives.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: gp.params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: accum.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: state.buffer.as_entire_binding() },
            ],
        });

        let (wg_x, wg_y) = gp.workgroup;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pt_trace_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("pt_trace_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                params.resolution[0].div_ceil(wg_x),
                params.resolution[1].div_ceil(wg_y),
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw_fullscreen(&self, gp: &GpuProgram, bind_group: &wgpu::BindGroup, label: &str) -> Result<()> {
        let Pipeline::Raster(pipeline) = &gp.pipeline else {
            return Err(Error::program(format!("{:?} is not a raster pipeline", gp.kind)));
        };
        let frame = self.frame.as_ref().ok_or(Error::NoTarget)?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1); // fullscreen triangle
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw_display(&self, gp: &GpuProgram, program: &Program, frame: Resolution) -> Result<()> {
        let params = DisplayParams {
            resolution: program.uniform_uvec2("resolution")?,
            samples_inv: program.uniform_f32("samplesInv")?,
            _pad: 0.0,
        };
        if params.resolution != frame.as_array() {
            return Err(Error::program("display resolution does not match frame"));
        }
        let accum = self.surface(program.texture("accumTexture")?.surface)?;

        self.queue.write_buffer(&gp.params, 0, bytemuck::bytes_of(&params));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_display_bg"),
            layout: &gp.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 2, resource: gp.params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: accum.buffer.as_entire_binding() },
            ],
        });
        self.draw_fullscreen(gp, &bind_group, "pt_display_pass")
    }

    fn draw_normals(&self, gp: &GpuProgram, program: &Program, frame: Resolution) -> Result<()> {
        let params = CameraParams::from_program(program, false)?;
        if params.resolution != frame.as_array() {
            return Err(Error::program("normals resolution does not match frame"));
        }
        let primitives = self.block_for(program, "PrimitiveBlock", 1)?;

        self.queue.write_buffer(&gp.params, 0, bytemuck::bytes_of(&params));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_normals_bg"),
            layout: &gp.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 1, resource: primitives.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: gp.params.as_entire_binding() },
            ],
        });
        self.draw_fullscreen(gp, &bind_group, "pt_normals_pass")
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bytes per pixel on the device (RGB sums are padded to vec4).
fn device_texel_size(format: SurfaceFormat) -> u64 {
    match format {
        SurfaceFormat::Rgb32Float => 16,
        SurfaceFormat::R32Uint => 4,
    }
}

impl GpuContext for WgpuContext {
    #[tracing::instrument(skip_all, fields(program = source.label))]
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle> {
        let wgsl = source.wgsl();
        let layout = self.bind_group_layout(source.kind);
        let params_size = match source.kind {
            ProgramKind::Display => std::mem::size_of::<DisplayParams>(),
            ProgramKind::Trace | ProgramKind::Normals => std::mem::size_of::<CameraParams>(),
        } as u64;

        let built = self.capture(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label),
                source: wgpu::ShaderSource::Wgsl(wgsl.as_str().into()),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let (pipeline, workgroup) = match source.stages {
                ProgramStages::Compute { entry, workgroup } => {
                    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(source.label),
                        layout: Some(&pipeline_layout),
                        module: &module,
                        entry_point: Some(entry),
                        compilation_options: Default::default(),
                        cache: None,
                    });
                    (Pipeline::Compute(pipeline), workgroup)
                }
                ProgramStages::Raster { vertex, fragment } => {
                    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(source.label),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: Some(vertex),
                            compilation_options: Default::default(),
                            buffers: &[],
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: Some(fragment),
                            compilation_options: Default::default(),
                            targets: &[Some(wgpu::ColorTargetState {
                                format: FRAME_FORMAT,
                                blend: Some(wgpu::BlendState::REPLACE),
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                        }),
                        primitive: wgpu::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    });
                    (Pipeline::Raster(pipeline), (1, 1))
                }
            };
            let params = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("pt_params"),
                size: params_size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (pipeline, workgroup, params)
        });
        let (pipeline, workgroup, params) =
            built.map_err(|e| Error::program(format!("{}: {e}", source.label)))?;

        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push(GpuProgram {
            kind: source.kind,
            pipeline,
            layout,
            params,
            workgroup,
        });
        Ok(handle)
    }

    fn create_surface(
        &mut self,
        label: &str,
        format: SurfaceFormat,
        resolution: Resolution,
        init: SurfaceInit<'_>,
    ) -> Result<SurfaceHandle> {
        let size = resolution.pixel_count() as u64 * device_texel_size(format);
        let limits = self.device.limits();
        if size > limits.max_storage_buffer_binding_size as u64 || size > limits.max_buffer_size {
            return Err(Error::allocation(format!(
                "{label}: {size} bytes for {resolution} exceeds device limits"
            )));
        }
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;

        let values = match (format, init) {
            (_, SurfaceInit::Zeroed) => None,
            (SurfaceFormat::R32Uint, SurfaceInit::U32(values)) if values.len() == resolution.pixel_count() => {
                Some(values)
            }
            (_, SurfaceInit::U32(values)) => {
                return Err(Error::allocation(format!(
                    "{label}: {} u32 values for a {format:?} {resolution} surface",
                    values.len()
                )));
            }
        };

        let buffer = self
            .capture(|device| match values {
                Some(values) => device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(values),
                    usage,
                }),
                // wgpu zero-initializes buffers
                None => device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage,
                    mapped_at_creation: false,
                }),
            })
            .map_err(|e| Error::allocation(format!("{label}: {e}")))?;

        let handle = SurfaceHandle(self.surfaces.len() as u32);
        self.surfaces.push(Some(GpuSurface { buffer, resolution }));
        Ok(handle)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        if let Some(s) = self.surfaces.get_mut(surface.0 as usize).and_then(|s| s.take()) {
            s.buffer.destroy();
        }
    }

    fn clear_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        let s = self.surface(surface)?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pt_clear_encoder"),
        });
        encoder.clear_buffer(&s.buffer, 0, None);
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn create_block(&mut self, name: &str, capacity: usize, contents: &[u8]) -> Result<BlockHandle> {
        if contents.len() > capacity {
            return Err(Error::allocation(format!(
                "{name}: {} bytes do not fit in {capacity}",
                contents.len()
            )));
        }
        // Uniform bindings must be non-empty and 16-byte sized
        let size = (capacity.max(16) as u64).next_multiple_of(16);
        let buffer = self
            .capture(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(name),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .map_err(|e| Error::allocation(format!("{name}: {e}")))?;
        if !contents.is_empty() {
            self.queue.write_buffer(&buffer, 0, contents);
        }

        let handle = BlockHandle(self.blocks.len() as u32);
        self.blocks.push(Some(buffer));
        Ok(handle)
    }

    fn bind_block(&mut self, block: BlockHandle, index: u32) -> Result<()> {
        if !self.blocks.get(block.0 as usize).is_some_and(|b| b.is_some()) {
            return Err(Error::UnknownHandle { kind: "block", id: block.0 });
        }
        self.block_bindings.insert(index, block.0 as usize);
        Ok(())
    }

    fn release_block(&mut self, block: BlockHandle) {
        if let Some(buffer) = self.blocks.get_mut(block.0 as usize).and_then(|b| b.take()) {
            buffer.destroy();
            self.block_bindings.retain(|_, bound| *bound != block.0 as usize);
        }
    }

    fn bind_target(&mut self, target: RenderTarget) -> Result<()> {
        match target {
            RenderTarget::Accumulation { accum, state } => {
                self.surface(accum)?;
                self.surface(state)?;
            }
            RenderTarget::Frame(resolution) => self.ensure_frame(resolution)?,
        }
        self.target = Some(target);
        Ok(())
    }

    fn unbind_target(&mut self) {
        self.target = None;
    }

    fn draw(&mut self, program: &Program) -> Result<()> {
        let target = self.target.ok_or(Error::NoTarget)?;
        let gp = self
            .programs
            .get(program.handle().0 as usize)
            .ok_or(Error::UnknownHandle { kind: "program", id: program.handle().0 })?;

        match (gp.kind, target) {
            (ProgramKind::Trace, RenderTarget::Accumulation { accum, state }) => {
                self.dispatch_trace(gp, program, accum, state)
            }
            (ProgramKind::Display, RenderTarget::Frame(res)) => self.draw_display(gp, program, res),
            (ProgramKind::Normals, RenderTarget::Frame(res)) => self.draw_normals(gp, program, res),
            (kind, target) => Err(Error::program(format!("{kind:?} cannot draw into {target:?}"))),
        }
    }
}
