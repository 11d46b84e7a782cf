use std::collections::HashMap;

use crate::pipelines::{depth_state, mk_render_pipeline, sampler_entry, texture_entry};

/// Shader locations of the per-vertex inputs, each fed from its own buffer.
pub const POSITION_LOCATION: u32 = 0;
pub const NORMAL_LOCATION: u32 = 1;
pub const TEX_COORD_LOCATION: u32 = 2;
pub const TANGENT_LOCATION: u32 = 3;
pub const BITANGENT_LOCATION: u32 = 4;

pub const VERTEX_INPUTS: usize = 5;

/// Per-draw uniforms, bound at a dynamic offset into one shared buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    pub projection: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub it_model_view: [[f32; 4]; 4],
    pub emissive_factor: [f32; 4],
}

impl DrawUniforms {
    pub const SIZE: wgpu::BufferAddress = std::mem::size_of::<Self>() as wgpu::BufferAddress;
}

/// How one vertex input is laid out in its buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeLayout {
    pub format: wgpu::VertexFormat,
    pub stride: wgpu::BufferAddress,
}

/// Everything that distinguishes one model pipeline from another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub attributes: [AttributeLayout; VERTEX_INPUTS],
    pub topology: wgpu::PrimitiveTopology,
    pub strip_index_format: Option<wgpu::IndexFormat>,
}

/// The PBR pipeline family. Pipelines are compiled lazily, one per distinct
/// [`PipelineKey`], and kept for the life of the device.
#[derive(Debug)]
pub struct ModelPipeline {
    color_format: wgpu::TextureFormat,
    layout: wgpu::PipelineLayout,
    shader: wgpu::ShaderModule,
    pub draw_layout: wgpu::BindGroupLayout,
    pub material_layout: wgpu::BindGroupLayout,
    pub environment_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl ModelPipeline {
    pub fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat) -> Self {
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("model_draw_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(DrawUniforms::SIZE),
                },
                count: None,
            }],
        });
        let d2 = wgpu::TextureViewDimension::D2;
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("model_material_bind_group_layout"),
            entries: &[
                texture_entry(0, d2),
                sampler_entry(1),
                texture_entry(2, d2),
                sampler_entry(3),
                texture_entry(4, d2),
                sampler_entry(5),
                texture_entry(6, d2),
                sampler_entry(7),
            ],
        });
        let environment_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("model_environment_bind_group_layout"),
                entries: &[
                    texture_entry(0, wgpu::TextureViewDimension::Cube),
                    sampler_entry(1),
                    texture_entry(2, d2),
                    sampler_entry(3),
                ],
            });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Model Pipeline Layout"),
            bind_group_layouts: &[&draw_layout, &material_layout, &environment_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Model Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("model.wgsl").into()),
        });
        Self {
            color_format,
            layout,
            shader,
            draw_layout,
            material_layout,
            environment_layout,
            pipelines: HashMap::new(),
        }
    }

    /// Compiles the pipeline for `key` unless it already exists.
    pub fn prepare(&mut self, device: &wgpu::Device, key: &PipelineKey) {
        if self.pipelines.contains_key(key) {
            return;
        }
        log::debug!("Compiling model pipeline for {:?}", key);
        let attributes: [[wgpu::VertexAttribute; 1]; VERTEX_INPUTS] =
            std::array::from_fn(|location| {
                [wgpu::VertexAttribute {
                    format: key.attributes[location].format,
                    offset: 0,
                    shader_location: location as u32,
                }]
            });
        let layouts: Vec<wgpu::VertexBufferLayout> = key
            .attributes
            .iter()
            .zip(attributes.iter())
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();
        let primitive = wgpu::PrimitiveState {
            topology: key.topology,
            strip_index_format: key.strip_index_format,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        };
        let pipeline = mk_render_pipeline(
            device,
            "Model Pipeline",
            &self.layout,
            self.color_format,
            Some(depth_state(true, wgpu::CompareFunction::LessEqual)),
            primitive,
            &layouts,
            &self.shader,
        );
        self.pipelines.insert(*key, pipeline);
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
