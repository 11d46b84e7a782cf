//! Frame rendering of registered models.
//!
//! Drawing a model happens in two steps. [`plan_draws`] walks the active
//! scene of a [`GpuModel`] and turns every drawable primitive into a
//! [`DrawCall`]: which buffers feed which vertex inputs, which textures the
//! material binds, the per-node model-view matrix and the pipeline it needs.
//! Planning touches no GPU API, so it works for any [`ResourceFactory`]
//! and can be tested without an adapter.
//!
//! [`ModelRenderer`] owns the wgpu side: registered models, the cached
//! pipelines, default textures, bind groups and the per-draw uniform buffer.
//! Its [`ModelRenderer::render`] brings a model up to date, plans it and
//! records the plan into a render pass.
//!
//! [`ResourceFactory`]: crate::data_structures::gpu_model::ResourceFactory

use std::collections::{HashMap, HashSet};

use cgmath::{InnerSpace, Matrix, Matrix4, Rad, SquareMatrix, Vector3, Zero};

use crate::{
    data_structures::{
        accessor::ComponentType,
        document::{Document, Material, Primitive, Topology},
        gpu_model::{GpuModel, ModelState, TextureFiltering},
        texture::{self, Texture},
    },
    error::{Result, ViewerError},
    pipelines::{
        cube_map::CubeMap,
        mipmap::MipmapGenerator,
        model::{
            AttributeLayout, BITANGENT_LOCATION, DrawUniforms, ModelPipeline, NORMAL_LOCATION,
            POSITION_LOCATION, PipelineKey, TANGENT_LOCATION, TEX_COORD_LOCATION, VERTEX_INPUTS,
        },
    },
    resources::gpu::WgpuFactory,
};

/// Index of a registered model, dense and in registration order.
pub type ModelHandle = usize;

/// Solid 1x1 textures standing in for absent material textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DefaultTexture {
    White,
    FlatNormal,
    Black,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    /// The uploaded texture of this image index.
    Image(usize),
    Default(DefaultTexture),
}

/// The four textures the model program samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialTextures {
    pub base_color: TextureSlot,
    pub metallic_roughness: TextureSlot,
    pub normal: TextureSlot,
    pub emissive: TextureSlot,
}

impl Default for MaterialTextures {
    fn default() -> Self {
        Self {
            base_color: TextureSlot::Default(DefaultTexture::White),
            metallic_roughness: TextureSlot::Default(DefaultTexture::White),
            normal: TextureSlot::Default(DefaultTexture::FlatNormal),
            emissive: TextureSlot::Default(DefaultTexture::Black),
        }
    }
}

/// Values bound for vertex inputs a primitive does not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstantAttribute {
    Normal,
    TexCoord,
    Tangent,
    Bitangent,
}

impl ConstantAttribute {
    /// Layout of the shared constant buffer: normal, uv, tangent, bitangent.
    pub const CONTENTS: [f32; 11] = [
        0.0, 0.0, 1.0, //
        0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0,
    ];

    pub fn offset(self) -> wgpu::BufferAddress {
        match self {
            Self::Normal => 0,
            Self::TexCoord => 12,
            Self::Tangent => 20,
            Self::Bitangent => 32,
        }
    }

    pub fn format(self) -> wgpu::VertexFormat {
        match self {
            Self::TexCoord => wgpu::VertexFormat::Float32x2,
            _ => wgpu::VertexFormat::Float32x3,
        }
    }

    /// Stride 0 repeats the single value for every vertex.
    pub fn layout(self) -> AttributeLayout {
        AttributeLayout {
            format: self.format(),
            stride: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexSource {
    /// The vertex buffer created from source buffer `buffer`, from `offset`.
    Buffer {
        buffer: usize,
        offset: wgpu::BufferAddress,
    },
    Tangents,
    Bitangents,
    Constant(ConstantAttribute),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub source: VertexSource,
    pub layout: AttributeLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexSource {
    Buffer {
        buffer: usize,
        offset: wgpu::BufferAddress,
    },
    /// 8-bit indices re-encoded by the model, keyed by accessor.
    Widened { accessor: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBinding {
    pub source: IndexSource,
    pub format: wgpu::IndexFormat,
    pub count: u32,
}

/// One primitive of one node, ready to be recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub node: usize,
    pub mesh: usize,
    pub primitive: usize,
    pub model_view: Matrix4<f32>,
    pub attributes: [VertexBinding; VERTEX_INPUTS],
    pub indices: Option<IndexBinding>,
    pub vertex_count: u32,
    pub topology: wgpu::PrimitiveTopology,
    pub material: Option<usize>,
    pub textures: MaterialTextures,
    pub emissive_factor: [f32; 3],
}

impl DrawCall {
    pub fn pipeline_key(&self) -> PipelineKey {
        let strip_index_format = match self.topology {
            wgpu::PrimitiveTopology::LineStrip | wgpu::PrimitiveTopology::TriangleStrip => {
                self.indices.map(|indices| indices.format)
            }
            _ => None,
        };
        PipelineKey {
            attributes: self.attributes.map(|binding| binding.layout),
            topology: self.topology,
            strip_index_format,
        }
    }
}

/// A primitive that cannot be drawn, and why.
#[derive(Debug)]
pub struct SkippedPrimitive {
    pub mesh: usize,
    pub primitive: usize,
    pub reason: ViewerError,
}

#[derive(Debug, Default)]
pub struct DrawPlan {
    pub draws: Vec<DrawCall>,
    pub skipped: Vec<SkippedPrimitive>,
}

/// GPU vertex format of an accessor element, if it has one.
pub fn vertex_format(
    component_type: ComponentType,
    components: usize,
    normalized: bool,
) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    let format = match (component_type, components, normalized) {
        (ComponentType::F32, 2, _) => F::Float32x2,
        (ComponentType::F32, 3, _) => F::Float32x3,
        (ComponentType::F32, 4, _) => F::Float32x4,
        (ComponentType::U8, 2, true) => F::Unorm8x2,
        (ComponentType::U8, 4, true) => F::Unorm8x4,
        (ComponentType::I8, 2, true) => F::Snorm8x2,
        (ComponentType::I8, 4, true) => F::Snorm8x4,
        (ComponentType::U16, 2, true) => F::Unorm16x2,
        (ComponentType::U16, 4, true) => F::Unorm16x4,
        (ComponentType::I16, 2, true) => F::Snorm16x2,
        (ComponentType::I16, 4, true) => F::Snorm16x4,
        _ => return None,
    };
    Some(format)
}

pub fn primitive_topology(topology: Topology) -> Result<wgpu::PrimitiveTopology> {
    match topology {
        Topology::Points => Ok(wgpu::PrimitiveTopology::PointList),
        Topology::Lines => Ok(wgpu::PrimitiveTopology::LineList),
        Topology::LineStrip => Ok(wgpu::PrimitiveTopology::LineStrip),
        Topology::Triangles => Ok(wgpu::PrimitiveTopology::TriangleList),
        Topology::TriangleStrip => Ok(wgpu::PrimitiveTopology::TriangleStrip),
        Topology::LineLoop | Topology::TriangleFan => Err(ViewerError::Unsupported {
            what: "primitive topology",
            detail: format!("{:?}", topology),
        }),
    }
}

/// The transform of one node: the incoming model-view, re-centered on the
/// model's center, then the node's own axis-angle rotation.
pub fn node_model_view(
    model_view: Matrix4<f32>,
    center: Vector3<f32>,
    rotation: Option<[f32; 4]>,
) -> Matrix4<f32> {
    let recentered = model_view * Matrix4::from_translation(-center);
    match rotation {
        Some([x, y, z, angle]) => {
            let axis = Vector3::new(x, y, z);
            if axis.is_zero() {
                recentered
            } else {
                recentered * Matrix4::from_axis_angle(axis.normalize(), Rad(angle))
            }
        }
        None => recentered,
    }
}

/// Plans the draws of every mesh node in the model's active scene.
///
/// Nothing is planned until the model's buffers exist. Primitives that
/// cannot be drawn end up in [`DrawPlan::skipped`] instead of failing the
/// whole model.
pub fn plan_draws<B, T>(model: &GpuModel<B, T>, model_view: Matrix4<f32>) -> DrawPlan {
    let mut plan = DrawPlan::default();
    if !model.state().has_buffers() {
        return plan;
    }
    let document = model.document();
    for node_index in document.scene_nodes() {
        let node = &document.nodes[node_index];
        let Some(mesh_index) = node.mesh else {
            continue;
        };
        let mesh = match document.mesh(mesh_index) {
            Ok(mesh) => mesh,
            Err(reason) => {
                plan.skipped.push(SkippedPrimitive {
                    mesh: mesh_index,
                    primitive: 0,
                    reason,
                });
                continue;
            }
        };
        let node_view = node_model_view(model_view, model.center(), node.rotation);
        for (primitive_index, primitive) in mesh.primitives.iter().enumerate() {
            match plan_primitive(model, mesh_index, primitive_index, primitive) {
                Ok(mut draw) => {
                    draw.node = node_index;
                    draw.model_view = node_view;
                    plan.draws.push(draw);
                }
                Err(reason) => plan.skipped.push(SkippedPrimitive {
                    mesh: mesh_index,
                    primitive: primitive_index,
                    reason,
                }),
            }
        }
    }
    plan
}

fn plan_primitive<B, T>(
    model: &GpuModel<B, T>,
    mesh: usize,
    primitive_index: usize,
    primitive: &Primitive,
) -> Result<DrawCall> {
    let document = model.document();
    let topology = primitive_topology(primitive.mode)?;
    let position_accessor =
        primitive
            .attributes
            .position
            .ok_or_else(|| ViewerError::Unsupported {
                what: "primitive",
                detail: "no POSITION attribute".to_string(),
            })?;
    let position = vertex_binding(document, position_accessor, &[wgpu::VertexFormat::Float32x3])?;
    let normal = match primitive.attributes.normal {
        Some(accessor) => vertex_binding(document, accessor, &[wgpu::VertexFormat::Float32x3])?,
        None => constant_binding(ConstantAttribute::Normal),
    };
    let tex_coord = match primitive.attributes.tex_coord {
        Some(accessor) => vertex_binding(
            document,
            accessor,
            &[
                wgpu::VertexFormat::Float32x2,
                wgpu::VertexFormat::Unorm8x2,
                wgpu::VertexFormat::Unorm16x2,
                wgpu::VertexFormat::Snorm8x2,
                wgpu::VertexFormat::Snorm16x2,
            ],
        )?,
        None => constant_binding(ConstantAttribute::TexCoord),
    };
    let (tangent, bitangent) = match model.tangent_buffers(mesh, primitive_index) {
        Some(_) => {
            let packed = AttributeLayout {
                format: ConstantAttribute::Tangent.format(),
                stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            };
            (
                VertexBinding {
                    source: VertexSource::Tangents,
                    layout: packed,
                },
                VertexBinding {
                    source: VertexSource::Bitangents,
                    layout: packed,
                },
            )
        }
        None => (
            constant_binding(ConstantAttribute::Tangent),
            constant_binding(ConstantAttribute::Bitangent),
        ),
    };

    let mut attributes = [position; VERTEX_INPUTS];
    attributes[POSITION_LOCATION as usize] = position;
    attributes[NORMAL_LOCATION as usize] = normal;
    attributes[TEX_COORD_LOCATION as usize] = tex_coord;
    attributes[TANGENT_LOCATION as usize] = tangent;
    attributes[BITANGENT_LOCATION as usize] = bitangent;

    let vertex_count = document.accessor(position_accessor)?.count as u32;
    let indices = match primitive.indices {
        Some(accessor) => Some(index_binding(model, accessor)?),
        None => None,
    };

    let material = match primitive.material {
        Some(index) => Some(document.material(index)?),
        None => None,
    };
    let textures = match material {
        Some(material) => material_textures(model, material)?,
        None => MaterialTextures::default(),
    };
    let emissive_factor = material
        .and_then(|material| material.emissive_factor)
        .unwrap_or([0.0; 3]);

    Ok(DrawCall {
        node: 0,
        mesh,
        primitive: primitive_index,
        model_view: Matrix4::identity(),
        attributes,
        indices,
        vertex_count,
        topology,
        material: primitive.material,
        textures,
        emissive_factor,
    })
}

fn constant_binding(attribute: ConstantAttribute) -> VertexBinding {
    VertexBinding {
        source: VertexSource::Constant(attribute),
        layout: attribute.layout(),
    }
}

fn vertex_binding(
    document: &Document,
    accessor_index: usize,
    accepted: &[wgpu::VertexFormat],
) -> Result<VertexBinding> {
    let accessor = document.accessor(accessor_index)?;
    let view_index = accessor
        .buffer_view
        .ok_or_else(|| ViewerError::Unsupported {
            what: "vertex attribute",
            detail: format!("accessor {} has no bufferView", accessor_index),
        })?;
    let view = document.buffer_view(view_index)?;
    let format = vertex_format(
        accessor.component_type,
        accessor.kind.components(),
        accessor.normalized,
    )
    .filter(|format| accepted.contains(format))
    .ok_or_else(|| ViewerError::Unsupported {
        what: "vertex format",
        detail: format!(
            "accessor {} holds {:?} {:?}{}",
            accessor_index,
            accessor.kind,
            accessor.component_type,
            if accessor.normalized { " (normalized)" } else { "" }
        ),
    })?;
    let offset = (view.byte_offset + accessor.byte_offset) as wgpu::BufferAddress;
    let stride = view.byte_stride.unwrap_or_else(|| accessor.element_size()) as wgpu::BufferAddress;
    if offset % 4 != 0 || stride % 4 != 0 {
        return Err(ViewerError::Unsupported {
            what: "vertex alignment",
            detail: format!(
                "accessor {} starts at byte {} with stride {}",
                accessor_index, offset, stride
            ),
        });
    }
    Ok(VertexBinding {
        source: VertexSource::Buffer {
            buffer: view.buffer,
            offset,
        },
        layout: AttributeLayout { format, stride },
    })
}

fn index_binding<B, T>(model: &GpuModel<B, T>, accessor_index: usize) -> Result<IndexBinding> {
    let document = model.document();
    let accessor = document.accessor(accessor_index)?;
    let count = accessor.count as u32;
    let (format, size) = match accessor.component_type {
        ComponentType::U8 => {
            if model.widened_indices(accessor_index).is_none() {
                return Err(ViewerError::missing(
                    "widened index buffer",
                    accessor_index,
                    0,
                    document.label.clone(),
                ));
            }
            return Ok(IndexBinding {
                source: IndexSource::Widened {
                    accessor: accessor_index,
                },
                format: wgpu::IndexFormat::Uint16,
                count,
            });
        }
        ComponentType::U16 => (wgpu::IndexFormat::Uint16, 2),
        ComponentType::U32 => (wgpu::IndexFormat::Uint32, 4),
        other => {
            return Err(ViewerError::Unsupported {
                what: "index component type",
                detail: format!("accessor {} holds {:?}", accessor_index, other),
            });
        }
    };
    let view_index = accessor
        .buffer_view
        .ok_or_else(|| ViewerError::Unsupported {
            what: "index accessor",
            detail: format!("accessor {} has no bufferView", accessor_index),
        })?;
    let view = document.buffer_view(view_index)?;
    let offset = (view.byte_offset + accessor.byte_offset) as wgpu::BufferAddress;
    if offset % size != 0 {
        return Err(ViewerError::Unsupported {
            what: "index alignment",
            detail: format!("accessor {} starts at byte {}", accessor_index, offset),
        });
    }
    Ok(IndexBinding {
        source: IndexSource::Buffer {
            buffer: view.buffer,
            offset,
        },
        format,
        count,
    })
}

fn material_textures<B, T>(model: &GpuModel<B, T>, material: &Material) -> Result<MaterialTextures> {
    let slot = |texture: Option<usize>, fallback: DefaultTexture| -> Result<TextureSlot> {
        let Some(texture) = texture else {
            return Ok(TextureSlot::Default(fallback));
        };
        let image = model.document().texture_image(texture)?;
        Ok(match model.texture(image) {
            Some(_) => TextureSlot::Image(image),
            None => TextureSlot::Default(fallback),
        })
    };
    Ok(MaterialTextures {
        base_color: slot(material.base_color_texture, DefaultTexture::White)?,
        metallic_roughness: slot(material.metallic_roughness_texture, DefaultTexture::White)?,
        normal: slot(material.normal_texture, DefaultTexture::FlatNormal)?,
        emissive: slot(material.emissive_texture, DefaultTexture::Black)?,
    })
}

struct DefaultTextures {
    white: Texture,
    flat_normal: Texture,
    black: Texture,
    sampler: wgpu::Sampler,
}

impl DefaultTextures {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            white: Texture::create_solid(device, queue, [255, 255, 255, 255], "default white"),
            flat_normal: Texture::create_default_normal_map(device, queue),
            black: Texture::create_solid(device, queue, [0, 0, 0, 255], "default black"),
            sampler: texture::create_sampler(device, TextureFiltering::ClampLinear),
        }
    }

    fn get(&self, texture: DefaultTexture) -> &Texture {
        match texture {
            DefaultTexture::White => &self.white,
            DefaultTexture::FlatNormal => &self.flat_normal,
            DefaultTexture::Black => &self.black,
        }
    }
}

/// Per-draw uniforms, written at increasing aligned offsets during a frame.
struct UniformRing {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: wgpu::BufferAddress,
    capacity: usize,
    cursor: usize,
}

impl UniformRing {
    const INITIAL_CAPACITY: usize = 64;

    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: usize) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as wgpu::BufferAddress;
        let stride = DrawUniforms::SIZE.div_ceil(alignment) * alignment;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Model Draw Uniforms"),
            size: stride * capacity as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("model_draw_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(DrawUniforms::SIZE),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
            cursor: 0,
        }
    }

    /// Makes room for `additional` more draws in this frame. Draws already
    /// recorded keep the previous buffer alive through the render pass.
    fn reserve(&mut self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout, additional: usize) {
        let needed = self.cursor + additional;
        if needed <= self.capacity {
            return;
        }
        let capacity = needed.max(self.capacity * 2);
        log::debug!("Growing draw uniform buffer to {} draws", capacity);
        let cursor = self.cursor;
        *self = Self::new(device, layout, capacity);
        self.cursor = cursor;
    }

    fn push(&mut self, queue: &wgpu::Queue, uniforms: &DrawUniforms) -> wgpu::DynamicOffset {
        let offset = self.cursor as wgpu::BufferAddress * self.stride;
        queue.write_buffer(&self.buffer, offset, bytemuck::bytes_of(uniforms));
        self.cursor += 1;
        offset as wgpu::DynamicOffset
    }
}

/// Draws registered glTF models with image-based PBR lighting.
pub struct ModelRenderer {
    pipeline: ModelPipeline,
    mipmaps: MipmapGenerator,
    models: Vec<GpuModel<wgpu::Buffer, Texture>>,
    materials: HashMap<(ModelHandle, Option<usize>), (MaterialTextures, wgpu::BindGroup)>,
    environment: Option<(u64, wgpu::BindGroup)>,
    defaults: DefaultTextures,
    brdf: Texture,
    constants: wgpu::Buffer,
    uniforms: UniformRing,
    reported: HashSet<(ModelHandle, usize, usize)>,
}

impl ModelRenderer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, color_format: wgpu::TextureFormat) -> Self {
        use wgpu::util::DeviceExt;

        let pipeline = ModelPipeline::new(device, color_format);
        let uniforms = UniformRing::new(device, &pipeline.draw_layout, UniformRing::INITIAL_CAPACITY);
        let constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Constant Vertex Attributes"),
            contents: bytemuck::cast_slice(&ConstantAttribute::CONTENTS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self {
            pipeline,
            mipmaps: MipmapGenerator::new(device, Texture::COLOR_FORMAT),
            models: Vec::new(),
            materials: HashMap::new(),
            environment: None,
            defaults: DefaultTextures::new(device, queue),
            brdf: Texture::create_solid(device, queue, [255, 0, 0, 255], "default brdf"),
            constants,
            uniforms,
            reported: HashSet::new(),
        }
    }

    /// The generator every colour texture of this renderer goes through.
    pub fn mipmaps(&self) -> &MipmapGenerator {
        &self.mipmaps
    }

    /// Takes ownership of a loaded document. GPU resources are created on
    /// the first render.
    pub fn register_model(&mut self, document: Document) -> ModelHandle {
        let handle = self.models.len();
        log::info!("Registered model {} as {}", document.label, handle);
        self.models.push(GpuModel::new(document));
        handle
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_state(&self, handle: ModelHandle) -> Option<ModelState> {
        self.models.get(handle).map(GpuModel::state)
    }

    /// Replaces the BRDF lookup texture.
    pub fn set_brdf(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &image::RgbaImage,
    ) -> Result<()> {
        self.brdf = Texture::from_image(
            device,
            queue,
            &self.mipmaps,
            image,
            TextureFiltering::ClampLinear,
            "brdf",
        )?;
        self.environment = None;
        Ok(())
    }

    /// Rewinds the per-draw uniforms; call once per frame before `render`.
    pub fn begin_frame(&mut self) {
        self.uniforms.cursor = 0;
    }

    /// Draws model `handle` into `pass`.
    ///
    /// Outstanding GPU initialisation of the model runs first. A model
    /// without buffers, or one that failed, draws nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pass: &mut wgpu::RenderPass<'_>,
        handle: ModelHandle,
        projection: Matrix4<f32>,
        model_view: Matrix4<f32>,
        environment: &CubeMap,
    ) {
        let Some(model) = self.models.get_mut(handle) else {
            log::warn!("No model registered as {}", handle);
            return;
        };
        if model.state() == ModelState::Failed {
            return;
        }
        let label = model.document().label.clone();
        let factory = WgpuFactory {
            device,
            queue,
            mipmaps: &self.mipmaps,
            model: &label,
        };
        if model.ensure_all(&factory).is_err() || !model.state().has_buffers() {
            return;
        }

        let model = &self.models[handle];
        let plan = plan_draws(model, model_view);
        for skipped in &plan.skipped {
            if self
                .reported
                .insert((handle, skipped.mesh, skipped.primitive))
            {
                log::warn!(
                    "Skipping mesh {} primitive {} of {}: {}",
                    skipped.mesh,
                    skipped.primitive,
                    label,
                    skipped.reason
                );
            }
        }
        if plan.draws.is_empty() {
            return;
        }

        if self.environment.as_ref().map(|(id, _)| *id) != Some(environment.id()) {
            let group = environment_bind_group(
                device,
                &self.pipeline.environment_layout,
                environment,
                &self.brdf,
                &self.defaults.sampler,
            );
            self.environment = Some((environment.id(), group));
        }
        let Some((_, environment_group)) = &self.environment else {
            return;
        };

        for draw in &plan.draws {
            self.pipeline.prepare(device, &draw.pipeline_key());
            let key = (handle, draw.material);
            let stale = match self.materials.get(&key) {
                Some((textures, _)) => *textures != draw.textures,
                None => true,
            };
            if stale {
                let group = material_bind_group(
                    device,
                    &self.pipeline.material_layout,
                    model,
                    &self.defaults,
                    &draw.textures,
                );
                self.materials.insert(key, (draw.textures, group));
            }
        }

        self.uniforms
            .reserve(device, &self.pipeline.draw_layout, plan.draws.len());
        pass.set_bind_group(2, environment_group, &[]);
        for draw in &plan.draws {
            let (Some(pipeline), Some((_, material_group))) = (
                self.pipeline.get(&draw.pipeline_key()),
                self.materials.get(&(handle, draw.material)),
            ) else {
                continue;
            };
            let it_model_view = draw
                .model_view
                .invert()
                .unwrap_or(draw.model_view)
                .transpose();
            let [r, g, b] = draw.emissive_factor;
            let offset = self.uniforms.push(
                queue,
                &DrawUniforms {
                    projection: projection.into(),
                    model_view: draw.model_view.into(),
                    it_model_view: it_model_view.into(),
                    emissive_factor: [r, g, b, 0.0],
                },
            );

            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.uniforms.bind_group, &[offset]);
            pass.set_bind_group(1, material_group, &[]);
            let mut bound = true;
            for (location, binding) in draw.attributes.iter().enumerate() {
                let slice = match binding.source {
                    VertexSource::Buffer { buffer, offset } => model
                        .buffer_pair(buffer)
                        .map(|pair| pair.vertex.slice(offset..)),
                    VertexSource::Tangents => model
                        .tangent_buffers(draw.mesh, draw.primitive)
                        .map(|buffers| buffers.tangents.slice(..)),
                    VertexSource::Bitangents => model
                        .tangent_buffers(draw.mesh, draw.primitive)
                        .map(|buffers| buffers.bitangents.slice(..)),
                    VertexSource::Constant(attribute) => {
                        let start = attribute.offset();
                        let end = start + attribute.format().size();
                        Some(self.constants.slice(start..end))
                    }
                };
                match slice {
                    Some(slice) => pass.set_vertex_buffer(location as u32, slice),
                    None => bound = false,
                }
            }
            if !bound {
                continue;
            }
            match draw.indices {
                Some(indices) => {
                    let slice = match indices.source {
                        IndexSource::Buffer { buffer, offset } => model
                            .buffer_pair(buffer)
                            .map(|pair| pair.index.slice(offset..)),
                        IndexSource::Widened { accessor } => model
                            .widened_indices(accessor)
                            .map(|buffer| buffer.slice(..)),
                    };
                    let Some(slice) = slice else {
                        continue;
                    };
                    pass.set_index_buffer(slice, indices.format);
                    pass.draw_indexed(0..indices.count, 0, 0..1);
                }
                None => pass.draw(0..draw.vertex_count, 0..1),
            }
        }
    }
}

fn view_and_sampler<'a>(
    texture: &'a Texture,
    fallback: &'a wgpu::Sampler,
) -> (&'a wgpu::TextureView, &'a wgpu::Sampler) {
    (&texture.view, texture.sampler.as_ref().unwrap_or(fallback))
}

fn material_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    model: &GpuModel<wgpu::Buffer, Texture>,
    defaults: &DefaultTextures,
    textures: &MaterialTextures,
) -> wgpu::BindGroup {
    let resolve = |slot: TextureSlot, fallback: DefaultTexture| {
        let fallback = defaults.get(fallback);
        let texture = match slot {
            TextureSlot::Image(image) => model.texture(image).unwrap_or(fallback),
            TextureSlot::Default(texture) => defaults.get(texture),
        };
        view_and_sampler(texture, &defaults.sampler)
    };
    let slots = [
        resolve(textures.base_color, DefaultTexture::White),
        resolve(textures.metallic_roughness, DefaultTexture::White),
        resolve(textures.normal, DefaultTexture::FlatNormal),
        resolve(textures.emissive, DefaultTexture::Black),
    ];
    let entries: Vec<wgpu::BindGroupEntry> = slots
        .iter()
        .enumerate()
        .flat_map(|(i, &(view, sampler))| {
            [
                wgpu::BindGroupEntry {
                    binding: 2 * i as u32,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2 * i as u32 + 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ]
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("model_material_bind_group"),
        layout,
        entries: &entries,
    })
}

fn environment_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    environment: &CubeMap,
    brdf: &Texture,
    fallback: &wgpu::Sampler,
) -> wgpu::BindGroup {
    let (brdf_view, brdf_sampler) = view_and_sampler(brdf, fallback);
    let (environment_view, environment_sampler) =
        view_and_sampler(&environment.texture, fallback);
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("model_environment_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(environment_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(environment_sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(brdf_view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(brdf_sampler),
            },
        ],
    })
}
