//! Baking a cross-layout sky image into an environment cube map.
//!
//! ```text
//!    +--+
//!    |+z|
//! +--+--+--+--+
//! |-x|-y|+x|+y|
//! +--+--+--+--+
//!    |-z|
//!    +--+
//! ```
//!
//! Each cube face is rendered from its region of the source image, then the
//! mip chain is generated so the model shader can sample blurred lighting
//! from the lower levels.

use std::sync::atomic::{AtomicU64, Ordering};

use wgpu::util::DeviceExt;

use crate::{
    data_structures::{
        gpu_model::TextureFiltering,
        texture::{self, Texture},
    },
    error::Result,
    pipelines::{
        mipmap::MipmapGenerator, mk_render_pipeline, sampler_entry, texture_entry,
        unculled_triangles,
    },
};

pub const DEFAULT_CUBE_MAP_SIZE: u32 = 2048;

const POSITIONS: [f32; 8] = [-1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0];

const INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Source image UVs of the four quad corners, one row per cube layer.
#[rustfmt::skip]
const FACE_UVS: [[f32; 8]; 6] = [
    [1.0 / 2.0, 2.0 / 3.0, 1.0 / 2.0, 1.0 / 3.0, 3.0 / 4.0, 1.0 / 3.0, 3.0 / 4.0, 2.0 / 3.0],
    [0.0,       2.0 / 3.0, 0.0,       1.0 / 3.0, 1.0 / 4.0, 1.0 / 3.0, 1.0 / 4.0, 2.0 / 3.0],
    [1.0 / 4.0, 1.0 / 3.0, 1.0 / 4.0, 0.0,       1.0 / 2.0, 0.0,       1.0 / 2.0, 1.0 / 3.0],
    [1.0 / 4.0, 1.0,       1.0 / 4.0, 2.0 / 3.0, 1.0 / 2.0, 2.0 / 3.0, 1.0 / 2.0, 1.0],
    [1.0 / 4.0, 2.0 / 3.0, 1.0 / 4.0, 1.0 / 3.0, 1.0 / 2.0, 1.0 / 3.0, 1.0 / 2.0, 2.0 / 3.0],
    [3.0 / 4.0, 2.0 / 3.0, 3.0 / 4.0, 1.0 / 3.0, 1.0,       1.0 / 3.0, 1.0,       2.0 / 3.0],
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

static NEXT_CUBE_MAP_ID: AtomicU64 = AtomicU64::new(0);

/// A baked environment, shared by the sky box and the model renderer.
#[derive(Debug)]
pub struct CubeMap {
    id: u64,
    pub texture: Texture,
}

impl CubeMap {
    /// Identity of this cube map, stable for its lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) fn quad_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

pub(crate) fn quad_buffers(device: &wgpu::Device) -> (wgpu::Buffer, wgpu::Buffer) {
    let positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Quad Positions"),
        contents: bytemuck::cast_slice(&POSITIONS),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Quad Indices"),
        contents: bytemuck::cast_slice(&INDICES),
        usage: wgpu::BufferUsages::INDEX,
    });
    (positions, indices)
}

#[derive(Debug)]
pub struct CubeMapBuilder {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    positions: wgpu::Buffer,
    indices: wgpu::Buffer,
    face_uvs: wgpu::Buffer,
}

impl CubeMapBuilder {
    pub fn new(device: &wgpu::Device) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cube_map_bake_bind_group_layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2),
                sampler_entry(1),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cube Map Bake Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cube Map Bake Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("cube_map.wgsl").into()),
        });
        let uv_attributes = wgpu::vertex_attr_array![1 => Float32x2];
        let uv_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &uv_attributes,
        };
        let pipeline = mk_render_pipeline(
            device,
            "Cube Map Bake Pipeline",
            &layout,
            Texture::COLOR_FORMAT,
            None,
            unculled_triangles(),
            &[quad_layout(), uv_layout],
            &shader,
        );
        let (positions, indices) = quad_buffers(device);
        let face_uvs = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cube Map Face UVs"),
            contents: bytemuck::cast_slice(&FACE_UVS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self {
            pipeline,
            bind_group_layout,
            positions,
            indices,
            face_uvs,
        }
    }

    /// Renders `image` into a new `size` x `size` cube map and generates
    /// its mip chain.
    pub fn bake(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        mipmaps: &MipmapGenerator,
        image: &image::RgbaImage,
        size: u32,
    ) -> Result<CubeMap> {
        let source = Texture::from_image(
            device,
            queue,
            mipmaps,
            image,
            TextureFiltering::ClampLinear,
            "sky box source",
        )?;
        let cube = Texture::create_cube_map(device, Texture::COLOR_FORMAT, size, "environment")?;
        let sampler = texture::create_sampler(device, TextureFiltering::ClampLinear);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cube_map_bake_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Cube Map Bake Encoder"),
        });
        let face_stride = std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress;
        for face in 0..6u32 {
            let view = cube.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("cube map face"),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: 0,
                mip_level_count: Some(1),
                base_array_layer: face,
                array_layer_count: Some(1),
                ..Default::default()
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Cube Map Bake Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            let offset = face as wgpu::BufferAddress * face_stride;
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.positions.slice(..));
            pass.set_vertex_buffer(1, self.face_uvs.slice(offset..offset + face_stride));
            pass.set_index_buffer(self.indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..INDICES.len() as u32, 0, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
        mipmaps.generate(device, queue, &cube.texture);

        log::info!("Baked {}x{} environment cube map", size, size);
        Ok(CubeMap {
            id: NEXT_CUBE_MAP_ID.fetch_add(1, Ordering::Relaxed),
            texture: cube,
        })
    }
}
