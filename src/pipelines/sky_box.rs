use cgmath::{Matrix, Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::pipelines::{
    cube_map::{CubeMap, quad_buffers, quad_layout},
    depth_state, mk_render_pipeline, sampler_entry, texture_entry, unculled_triangles,
};

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SkyBoxUniform {
    it_model_view: [[f32; 4]; 4],
    z_depth: f32,
    aspect_ratio: f32,
    _padding: [f32; 2],
}

/// Draws a [`CubeMap`] as the background of the frame.
///
/// View rays are reconstructed per vertex of a full-screen quad from the
/// field of view and aspect ratio, then rotated by the inverse transpose of
/// the view matrix.
#[derive(Debug)]
pub struct SkyBoxRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    uniform_buffer: wgpu::Buffer,
    positions: wgpu::Buffer,
    indices: wgpu::Buffer,
    z_depth: f32,
    aspect_ratio: f32,
}

impl SkyBoxRenderer {
    pub fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sky_box_bind_group_layout"),
            entries: &[
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
                texture_entry(1, wgpu::TextureViewDimension::Cube),
                sampler_entry(2),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sky Box Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sky Box Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("sky_box.wgsl").into()),
        });
        // Drawn first without touching depth so the model always covers it.
        let pipeline = mk_render_pipeline(
            device,
            "Sky Box Pipeline",
            &layout,
            color_format,
            Some(depth_state(false, wgpu::CompareFunction::Always)),
            unculled_triangles(),
            &[quad_layout()],
            &shader,
        );
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sky Box Uniforms"),
            contents: bytemuck::cast_slice(&[SkyBoxUniform {
                it_model_view: Matrix4::identity().into(),
                z_depth: 1.0,
                aspect_ratio: 1.0,
                _padding: [0.0; 2],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let (positions, indices) = quad_buffers(device);
        Self {
            pipeline,
            bind_group_layout,
            bind_group: None,
            uniform_buffer,
            positions,
            indices,
            z_depth: 1.0,
            aspect_ratio: 1.0,
        }
    }

    pub fn set_cube_map(&mut self, device: &wgpu::Device, cube_map: &CubeMap) {
        let Some(sampler) = cube_map.texture.sampler.as_ref() else {
            log::warn!("Cube map {} has no sampler and cannot be drawn", cube_map.id());
            return;
        };
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sky_box_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&cube_map.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        }));
    }

    /// `fov` is the vertical field of view in radians.
    pub fn set_fov(&mut self, fov: f32) {
        self.z_depth = 1.0 / (fov / 2.0).sin();
    }

    pub fn set_aspect(&mut self, ratio: f32) {
        self.aspect_ratio = ratio;
    }

    pub fn z_depth(&self) -> f32 {
        self.z_depth
    }

    /// Uploads this frame's uniforms. `view` is the camera's view matrix.
    pub fn prepare(&self, queue: &wgpu::Queue, view: Matrix4<f32>) {
        let it_model_view = view.invert().unwrap_or(view).transpose();
        queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::cast_slice(&[SkyBoxUniform {
                it_model_view: it_model_view.into(),
                z_depth: self.z_depth,
                aspect_ratio: self.aspect_ratio,
                _padding: [0.0; 2],
            }]),
        );
    }

    /// Records the background draw; a no-op until a cube map is set.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, self.positions.slice(..));
        pass.set_index_buffer(self.indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..6, 0, 0..1);
    }
}
