//! wgpu rendering for the viewer scene.
//!
//! The scene (ground grid plus the loaded model) is drawn into an offscreen
//! sRGB colour target with depth, then blitted into egui's render pass.
//! Vertex buffers are rewritten every frame from CPU-posed data.

use std::sync::{Arc, Mutex, MutexGuard};

use bytemuck::{Pod, Zeroable};
use eframe::wgpu;
use eframe::wgpu::util::DeviceExt;
use glam::{Mat4, Vec3};
use tracing::{debug, warn};

use super::stage::Disposable;
use crate::config::SceneConfig;
use crate::vrm::loader::AlphaMode;
use crate::vrm::{Pose, VrmModel};

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Per-frame vertex data, rewritten from the CPU pose.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct PosedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl PosedVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

const UV_ATTRIBS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];

fn uv_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &UV_ATTRIBS,
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl LineVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Scene-wide uniforms (group 0). Colours are linear and pre-multiplied by
/// their light intensity.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub sky_color: [f32; 4],
    pub ground_color: [f32; 4],
    /// Unit vector toward the directional light
    pub light_dir: [f32; 4],
    pub light_color: [f32; 4],
    /// x: tone-mapping exposure
    pub params: [f32; 4],
}

impl SceneUniforms {
    pub fn new(view_proj: Mat4, camera_pos: Vec3, scene: &SceneConfig) -> Self {
        let light_dir = Vec3::from(scene.light_position).normalize_or(Vec3::Y);
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: camera_pos.extend(1.0).to_array(),
            sky_color: scaled(scene.sky_color, scene.hemisphere_intensity),
            ground_color: scaled(scene.ground_color, scene.hemisphere_intensity),
            light_dir: light_dir.extend(0.0).to_array(),
            light_color: scaled(scene.light_color, scene.light_intensity),
            params: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

fn scaled(hex: u32, intensity: f32) -> [f32; 4] {
    let [r, g, b] = srgb_hex_to_linear(hex);
    [r * intensity, g * intensity, b * intensity, 1.0]
}

/// Per-primitive material uniforms (group 1, binding 0).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct MaterialUniforms {
    base_color: [f32; 4],
    /// x: alpha cutoff, y: 1.0 when masked
    alpha: [f32; 4],
}

impl MaterialUniforms {
    fn new(base_color: [f32; 4], mode: AlphaMode) -> Self {
        let alpha = match mode {
            AlphaMode::Mask(cutoff) => [cutoff, 1.0, 0.0, 0.0],
            AlphaMode::Opaque | AlphaMode::Blend => [0.0, 0.0, 0.0, 0.0],
        };
        let base_color = match mode {
            AlphaMode::Opaque => [base_color[0], base_color[1], base_color[2], 1.0],
            _ => base_color,
        };
        Self { base_color, alpha }
    }
}

/// Convert a 0xRRGGBB sRGB colour to linear RGB.
pub fn srgb_hex_to_linear(hex: u32) -> [f32; 3] {
    let channel = |shift: u32| {
        let c = ((hex >> shift) & 0xff) as f32 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    [channel(16), channel(8), channel(0)]
}

/// Line list for a square ground grid on the XZ plane, centred at the
/// origin. The two centre lines use `center_color`.
pub fn grid_vertices(size: f32, divisions: u32, center_color: u32, color: u32) -> Vec<LineVertex> {
    let center = divisions / 2;
    let step = size / divisions as f32;
    let half = size / 2.0;
    let center_color = srgb_hex_to_linear(center_color);
    let color = srgb_hex_to_linear(color);

    let mut out = Vec::with_capacity((divisions as usize + 1) * 4);
    for i in 0..=divisions {
        let k = -half + i as f32 * step;
        let c = if i == center { center_color } else { color };
        out.push(LineVertex { position: [-half, 0.0, k], color: c });
        out.push(LineVertex { position: [half, 0.0, k], color: c });
        out.push(LineVertex { position: [k, 0.0, -half], color: c });
        out.push(LineVertex { position: [k, 0.0, half], color: c });
    }
    out
}

/// GPU resources of one primitive.
pub struct DrawCall {
    mesh: usize,
    primitive: usize,
    vertex_buffer: wgpu::Buffer,
    uv_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    vertex_count: usize,
    material_buffer: wgpu::Buffer,
    material_bind_group: wgpu::BindGroup,
    blend: bool,
}

/// Everything uploaded for one model. Released by [`Disposable::dispose`].
pub struct ModelGpu {
    draws: Arc<Vec<DrawCall>>,
    textures: Vec<wgpu::Texture>,
    disposed: bool,
}

impl ModelGpu {
    /// Shared draw list for the paint callback.
    pub fn draws(&self) -> Arc<Vec<DrawCall>> {
        Arc::clone(&self.draws)
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }
}

impl Disposable for ModelGpu {
    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for draw in self.draws.iter() {
            draw.vertex_buffer.destroy();
            draw.uv_buffer.destroy();
            draw.index_buffer.destroy();
            draw.material_buffer.destroy();
        }
        for texture in &self.textures {
            texture.destroy();
        }
        debug!(
            "Released {} draw calls and {} textures",
            self.draws.len(),
            self.textures.len()
        );
    }
}

struct OffscreenState {
    _color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    blit_bind_group: wgpu::BindGroup,
    size: [u32; 2],
}

pub struct SceneRenderer {
    opaque_pipeline: wgpu::RenderPipeline,
    blend_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    blit_pipeline: wgpu::RenderPipeline,
    scene_buffer: wgpu::Buffer,
    scene_bind_group: wgpu::BindGroup,
    material_layout: wgpu::BindGroupLayout,
    blit_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    white_view: wgpu::TextureView,
    _white_texture: wgpu::Texture,
    grid_buffer: wgpu::Buffer,
    grid_vertex_count: u32,
    clear_color: wgpu::Color,
    offscreen: Mutex<OffscreenState>,
}

impl SceneRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target_format: wgpu::TextureFormat,
        scene: &SceneConfig,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("viewer_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("viewer_blit_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer_scene_bgl"),
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

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer_material_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
            ],
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer_blit_bgl"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });

        let mesh_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer_mesh_pl"),
            bind_group_layouts: &[&scene_layout, &material_layout],
            push_constant_ranges: &[],
        });
        let line_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer_line_pl"),
            bind_group_layouts: &[&scene_layout],
            push_constant_ranges: &[],
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer_blit_pl"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });

        let opaque_pipeline = mesh_pipeline(device, &mesh_pipeline_layout, &shader, true);
        let blend_pipeline = mesh_pipeline(device, &mesh_pipeline_layout, &shader, false);

        let line_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("viewer_line_pipeline"),
            layout: Some(&line_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_line"),
                buffers: &[LineVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_line"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: OFFSCREEN_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: Some(depth_state(true)),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        // Non-sRGB swapchains get the encode done in the shader.
        let blit_entry = if target_format.is_srgb() {
            "fs_blit"
        } else {
            "fs_blit_encode"
        };
        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("viewer_blit_pipeline"),
            layout: Some(&blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &blit_shader,
                entry_point: Some("vs_blit"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &blit_shader,
                entry_point: Some(blit_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let scene_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("viewer_scene_ub"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viewer_scene_bg"),
            layout: &scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("viewer_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white_texture = upload_texture(device, queue, &[255, 255, 255, 255], 1, 1, "viewer_white");
        let white_view = white_texture.create_view(&Default::default());

        let grid = grid_vertices(
            scene.grid_size,
            scene.grid_divisions,
            scene.grid_center_color,
            scene.grid_color,
        );
        let grid_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer_grid_vb"),
            contents: bytemuck::cast_slice(&grid),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let [r, g, b] = srgb_hex_to_linear(scene.background);
        let clear_color = wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: 1.0,
        };

        let offscreen = create_offscreen(device, &blit_layout, &sampler, [1, 1]);

        Self {
            opaque_pipeline,
            blend_pipeline,
            line_pipeline,
            blit_pipeline,
            scene_buffer,
            scene_bind_group,
            material_layout,
            blit_layout,
            sampler,
            white_view,
            _white_texture: white_texture,
            grid_buffer,
            grid_vertex_count: grid.len() as u32,
            clear_color,
            offscreen: Mutex::new(offscreen),
        }
    }

    fn offscreen(&self) -> MutexGuard<'_, OffscreenState> {
        self.offscreen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create buffers, textures and bind groups for every drawable primitive
    /// of `model`. Vertex contents are filled by [`update_vertices`](Self::update_vertices).
    pub fn upload_model(&self, device: &wgpu::Device, queue: &wgpu::Queue, model: &VrmModel) -> ModelGpu {
        let max_dim = device.limits().max_texture_dimension_2d;
        let mut textures = Vec::with_capacity(model.textures.len());
        let views: Vec<Option<wgpu::TextureView>> = model
            .textures
            .iter()
            .enumerate()
            .map(|(i, img)| {
                if !texture_fits(img.width, img.height, img.pixels.len(), max_dim) {
                    warn!(
                        "Texture {} is {}x{} ({} bytes), device limit is {}; drawing untextured",
                        i,
                        img.width,
                        img.height,
                        img.pixels.len(),
                        max_dim
                    );
                    return None;
                }
                let texture =
                    upload_texture(device, queue, &img.pixels, img.width, img.height, &format!("viewer_tex_{i}"));
                let view = texture.create_view(&Default::default());
                textures.push(texture);
                Some(view)
            })
            .collect();

        let mut draws = Vec::new();
        for (mesh_idx, mesh) in model.meshes.iter().enumerate() {
            for (prim_idx, prim) in mesh.primitives.iter().enumerate() {
                if prim.positions.is_empty() || prim.indices.is_empty() {
                    continue;
                }

                let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("viewer_vb_{mesh_idx}_{prim_idx}")),
                    size: (prim.positions.len() * std::mem::size_of::<PosedVertex>()) as u64,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

                let uvs = if prim.uvs.len() == prim.positions.len() {
                    prim.uvs.clone()
                } else {
                    vec![[0.0, 0.0]; prim.positions.len()]
                };
                let uv_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("viewer_uv_{mesh_idx}_{prim_idx}")),
                    contents: bytemuck::cast_slice(&uvs),
                    usage: wgpu::BufferUsages::VERTEX,
                });

                let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("viewer_ib_{mesh_idx}_{prim_idx}")),
                    contents: bytemuck::cast_slice(&prim.indices),
                    usage: wgpu::BufferUsages::INDEX,
                });

                let material = MaterialUniforms::new(prim.base_color, prim.alpha_mode);
                let material_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("viewer_mat_{mesh_idx}_{prim_idx}")),
                    contents: bytemuck::bytes_of(&material),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

                let view = prim
                    .texture
                    .and_then(|t| views.get(t))
                    .and_then(Option::as_ref)
                    .unwrap_or(&self.white_view);
                let material_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("viewer_mat_bg_{mesh_idx}_{prim_idx}")),
                    layout: &self.material_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: material_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                });

                draws.push(DrawCall {
                    mesh: mesh_idx,
                    primitive: prim_idx,
                    vertex_buffer,
                    uv_buffer,
                    index_buffer,
                    index_count: prim.indices.len() as u32,
                    vertex_count: prim.positions.len(),
                    material_buffer,
                    material_bind_group,
                    blend: prim.alpha_mode == AlphaMode::Blend,
                });
            }
        }

        // Blended primitives draw after everything opaque.
        draws.sort_by_key(|d| d.blend);
        debug!("Uploaded {} draw calls, {} textures", draws.len(), textures.len());

        ModelGpu {
            draws: Arc::new(draws),
            textures,
            disposed: false,
        }
    }

    /// Write posed positions and normals into the vertex buffers.
    pub fn update_vertices(&self, queue: &wgpu::Queue, gpu: &ModelGpu, pose: &Pose) {
        for draw in gpu.draws.iter() {
            let Some(posed) = pose.meshes.get(draw.mesh).and_then(|m| m.get(draw.primitive)) else {
                continue;
            };
            if posed.positions.len() != draw.vertex_count || posed.normals.len() != draw.vertex_count {
                continue;
            }

            let vertices: Vec<PosedVertex> = posed
                .positions
                .iter()
                .zip(&posed.normals)
                .map(|(p, n)| PosedVertex {
                    position: p.to_array(),
                    normal: n.to_array(),
                })
                .collect();
            queue.write_buffer(&draw.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        }
    }

    /// Recreate the offscreen targets when the viewport size changed.
    pub fn resize(&self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut state = self.offscreen();
        if state.size == [width, height] {
            return;
        }
        *state = create_offscreen(device, &self.blit_layout, &self.sampler, [width, height]);
    }

    /// Draw the grid and `draws` into the offscreen target. Call from `prepare()`.
    pub fn render_offscreen(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        uniforms: &SceneUniforms,
        draws: Option<&[DrawCall]>,
    ) -> wgpu::CommandBuffer {
        queue.write_buffer(&self.scene_buffer, 0, bytemuck::bytes_of(uniforms));

        let state = self.offscreen();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("viewer_offscreen_encoder"),
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("viewer_offscreen_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &state.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &state.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            pass.set_bind_group(0, &self.scene_bind_group, &[]);

            pass.set_pipeline(&self.line_pipeline);
            pass.set_vertex_buffer(0, self.grid_buffer.slice(..));
            pass.draw(0..self.grid_vertex_count, 0..1);

            let mut blending = None;
            for draw in draws.unwrap_or_default() {
                if blending != Some(draw.blend) {
                    pass.set_pipeline(if draw.blend {
                        &self.blend_pipeline
                    } else {
                        &self.opaque_pipeline
                    });
                    blending = Some(draw.blend);
                }
                pass.set_bind_group(1, &draw.material_bind_group, &[]);
                pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                pass.set_vertex_buffer(1, draw.uv_buffer.slice(..));
                pass.set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }

        encoder.finish()
    }

    /// Blit the offscreen image into egui's pass. Call from `paint()`.
    pub fn blit(&self, render_pass: &mut wgpu::RenderPass<'static>) {
        let state = self.offscreen();
        render_pass.set_pipeline(&self.blit_pipeline);
        render_pass.set_bind_group(0, &state.blit_bind_group, &[]);
        drop(state);
        render_pass.draw(0..3, 0..1);
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn depth_state(write: bool) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: write,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: Default::default(),
        bias: Default::default(),
    }
}

/// Mesh pipeline. Opaque/masked geometry writes depth; blended geometry
/// only tests against it.
fn mesh_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    opaque: bool,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(if opaque {
            "viewer_opaque_pipeline"
        } else {
            "viewer_blend_pipeline"
        }),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[PosedVertex::layout(), uv_layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: OFFSCREEN_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            // Avatar materials are frequently double-sided.
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(depth_state(opaque)),
        multisample: Default::default(),
        multiview: None,
        cache: None,
    })
}

/// Whether an RGBA8 image can be uploaded as-is: non-empty, within the
/// device's 2D size limit, and carrying exactly `width * height * 4` bytes.
fn texture_fits(width: u32, height: u32, byte_len: usize, max_dim: u32) -> bool {
    if width == 0 || height == 0 || width > max_dim || height > max_dim {
        return false;
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        == Some(byte_len)
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    rgba: &[u8],
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::Texture {
    device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        rgba,
    )
}

fn create_offscreen(
    device: &wgpu::Device,
    blit_layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    size: [u32; 2],
) -> OffscreenState {
    let extent = wgpu::Extent3d {
        width: size[0],
        height: size[1],
        depth_or_array_layers: 1,
    };

    let color_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("viewer_offscreen_color"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let color_view = color_texture.create_view(&Default::default());

    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("viewer_offscreen_depth"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&Default::default());

    let blit_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("viewer_blit_bg"),
        layout: blit_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&color_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });

    OffscreenState {
        _color_texture: color_texture,
        color_view,
        _depth_texture: depth_texture,
        depth_view,
        blit_bind_group,
        size,
    }
}
