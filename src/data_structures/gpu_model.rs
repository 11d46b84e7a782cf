//! GPU-side state of a loaded document.
//!
//! A [`GpuModel`] owns a [`Document`] together with everything created from
//! it on the GPU: one vertex and one index buffer per source buffer, one
//! texture per image and a tangent/bitangent buffer pair for every primitive
//! that uses a normal map. Creation goes through a [`ResourceFactory`] so the
//! same bookkeeping drives wgpu in the app and plain counters in tests.
//!
//! Initialisation is lazy and incremental. Each `ensure_*` call is
//! idempotent and advances [`ModelState`]; the renderer calls all three
//! every frame and draws as soon as the buffers exist.

use std::collections::HashMap;

use cgmath::{Vector3, Zero};

use crate::{
    data_structures::{
        accessor::{ComponentType, Scalar},
        document::{Document, ImageSlot},
        tangents::{self, Bounds},
    },
    error::Result,
};

/// How a buffer is going to be bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Vertex,
    Index,
}

/// Sampling policy of an uploaded image.
///
/// Power-of-two images get a mip chain and repeat wrapping; anything else is
/// sampled linearly without mips and clamped to the edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFiltering {
    Mipmapped,
    ClampLinear,
}

impl TextureFiltering {
    pub fn for_size(width: u32, height: u32) -> Self {
        if is_power_of_two(width) && is_power_of_two(height) {
            Self::Mipmapped
        } else {
            Self::ClampLinear
        }
    }
}

pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Creates the GPU objects a model needs.
pub trait ResourceFactory {
    type Buffer;
    type Texture;

    fn create_buffer(&self, label: &str, contents: &[u8], role: BufferRole)
        -> Result<Self::Buffer>;

    fn create_texture(
        &self,
        label: &str,
        image: &image::RgbaImage,
        filtering: TextureFiltering,
    ) -> Result<Self::Texture>;
}

/// Initialisation progress of a [`GpuModel`].
///
/// Buffers always come first; textures and tangents may complete in either
/// order. `Failed` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelState {
    #[default]
    Unloaded,
    BuffersReady,
    TexturesReady,
    TangentsReady,
    FullyReady,
    Failed,
}

impl ModelState {
    pub fn has_buffers(self) -> bool {
        !matches!(self, Self::Unloaded | Self::Failed)
    }

    pub fn has_textures(self) -> bool {
        matches!(self, Self::TexturesReady | Self::FullyReady)
    }

    pub fn has_tangents(self) -> bool {
        matches!(self, Self::TangentsReady | Self::FullyReady)
    }

    #[must_use]
    pub fn with_buffers(self) -> Self {
        match self {
            Self::Unloaded => Self::BuffersReady,
            other => other,
        }
    }

    #[must_use]
    pub fn with_textures(self) -> Self {
        match self {
            Self::BuffersReady => Self::TexturesReady,
            Self::TangentsReady => Self::FullyReady,
            other => other,
        }
    }

    #[must_use]
    pub fn with_tangents(self) -> Self {
        match self {
            Self::BuffersReady => Self::TangentsReady,
            Self::TexturesReady => Self::FullyReady,
            other => other,
        }
    }
}

/// The buffers created from one source buffer. Both hold the full source
/// bytes; accessors address them by offset.
#[derive(Debug)]
pub struct BufferPair<B> {
    pub vertex: B,
    pub index: B,
}

#[derive(Debug)]
pub struct TangentBuffers<B> {
    pub tangents: B,
    pub bitangents: B,
    pub vertex_count: usize,
}

#[derive(Debug)]
pub struct GpuModel<B, T> {
    document: Document,
    state: ModelState,
    buffers: Vec<BufferPair<B>>,
    /// 8-bit index lists re-encoded as 16-bit, keyed by accessor.
    widened_indices: HashMap<usize, B>,
    textures: Vec<Option<T>>,
    tangents: Vec<Vec<Option<TangentBuffers<B>>>>,
    center: Vector3<f32>,
}

impl<B, T> GpuModel<B, T> {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            state: ModelState::Unloaded,
            buffers: Vec::new(),
            widened_indices: HashMap::new(),
            textures: Vec::new(),
            tangents: Vec::new(),
            center: Vector3::zero(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Center of the model's bounding box; the origin until tangents ran.
    pub fn center(&self) -> Vector3<f32> {
        self.center
    }

    pub fn buffer_pair(&self, buffer: usize) -> Option<&BufferPair<B>> {
        self.buffers.get(buffer)
    }

    pub fn widened_indices(&self, accessor: usize) -> Option<&B> {
        self.widened_indices.get(&accessor)
    }

    pub fn texture(&self, image: usize) -> Option<&T> {
        self.textures.get(image).and_then(Option::as_ref)
    }

    pub fn tangent_buffers(&self, mesh: usize, primitive: usize) -> Option<&TangentBuffers<B>> {
        self.tangents
            .get(mesh)
            .and_then(|primitives| primitives.get(primitive))
            .and_then(Option::as_ref)
    }

    /// Runs all initialisation steps that are still outstanding.
    ///
    /// The first error moves the model to [`ModelState::Failed`]; it is
    /// returned once and later calls do nothing.
    pub fn ensure_all<F>(&mut self, factory: &F) -> Result<ModelState>
    where
        F: ResourceFactory<Buffer = B, Texture = T>,
    {
        let result = self
            .ensure_buffers(factory)
            .and_then(|_| self.ensure_textures(factory))
            .and_then(|_| self.ensure_tangents(factory));
        if let Err(e) = result {
            log::error!("Model {} failed to initialise: {}", self.document.label, e);
            self.state = ModelState::Failed;
            return Err(e);
        }
        Ok(self.state)
    }

    pub fn ensure_buffers<F>(&mut self, factory: &F) -> Result<()>
    where
        F: ResourceFactory<Buffer = B, Texture = T>,
    {
        if self.state.has_buffers() || self.state == ModelState::Failed {
            return Ok(());
        }
        let label = &self.document.label;
        let buffers = self
            .document
            .buffers
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                Ok(BufferPair {
                    vertex: factory.create_buffer(
                        &format!("{} vertex buffer {}", label, i),
                        bytes,
                        BufferRole::Vertex,
                    )?,
                    index: factory.create_buffer(
                        &format!("{} index buffer {}", label, i),
                        bytes,
                        BufferRole::Index,
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut widened_indices = HashMap::new();
        for mesh in &self.document.meshes {
            for primitive in &mesh.primitives {
                let Some(accessor) = primitive.indices else {
                    continue;
                };
                if widened_indices.contains_key(&accessor)
                    || self.document.accessor(accessor)?.component_type != ComponentType::U8
                {
                    continue;
                }
                let indices = self.document.typed_accessor::<Scalar>(accessor)?;
                let widened: Vec<u16> = indices.iter().map(|i| i as u16).collect();
                let buffer = factory.create_buffer(
                    &format!("{} widened indices {}", label, accessor),
                    bytemuck::cast_slice(&widened),
                    BufferRole::Index,
                )?;
                widened_indices.insert(accessor, buffer);
            }
        }

        self.buffers = buffers;
        self.widened_indices = widened_indices;
        self.state = self.state.with_buffers();
        Ok(())
    }

    /// Uploads every image that has arrived. The step counts as done once
    /// no image is pending; failed images stay without a texture.
    pub fn ensure_textures<F>(&mut self, factory: &F) -> Result<()>
    where
        F: ResourceFactory<Buffer = B, Texture = T>,
    {
        if !self.state.has_buffers() || self.state.has_textures() {
            return Ok(());
        }
        let images = self.document.images.clone();
        if self.textures.len() != images.len() {
            self.textures.resize_with(images.len(), || None);
        }
        for (i, texture) in self.textures.iter_mut().enumerate() {
            if texture.is_some() {
                continue;
            }
            if let Some(ImageSlot::Ready(image)) = images.get(i) {
                let filtering = TextureFiltering::for_size(image.width(), image.height());
                *texture = Some(factory.create_texture(
                    &format!("{} image {}", self.document.label, i),
                    &image,
                    filtering,
                )?);
            }
        }
        if images.all_settled() {
            let failed = images.failed_count();
            if failed > 0 {
                log::warn!(
                    "{} of {} images of {} could not be loaded, using default textures",
                    failed,
                    images.len(),
                    self.document.label
                );
            }
            self.state = self.state.with_textures();
        }
        Ok(())
    }

    /// Derives and uploads tangent frames for primitives with normal maps
    /// and computes the model center from all triangle primitives.
    pub fn ensure_tangents<F>(&mut self, factory: &F) -> Result<()>
    where
        F: ResourceFactory<Buffer = B, Texture = T>,
    {
        if !self.state.has_buffers() || self.state.has_tangents() {
            return Ok(());
        }
        let document = &self.document;
        let mut bounds = Bounds::empty();
        let mut per_mesh = Vec::with_capacity(document.meshes.len());
        for (m, mesh) in document.meshes.iter().enumerate() {
            let mut per_primitive = Vec::with_capacity(mesh.primitives.len());
            for (p, primitive) in mesh.primitives.iter().enumerate() {
                let normal_mapped = match primitive.material {
                    Some(material) => document.material(material)?.normal_texture.is_some(),
                    None => false,
                };
                if !normal_mapped {
                    tangents::include_primitive_bounds(document, primitive, &mut bounds)?;
                    per_primitive.push(None);
                    continue;
                }
                let Some(frames) =
                    tangents::derive_primitive_tangents(document, primitive, &mut bounds)?
                else {
                    log::warn!(
                        "Mesh {} primitive {} of {} has a normal map but no texture coordinates",
                        m,
                        p,
                        document.label
                    );
                    tangents::include_primitive_bounds(document, primitive, &mut bounds)?;
                    per_primitive.push(None);
                    continue;
                };
                if frames.degenerate_triangles > 0 {
                    log::warn!(
                        "Skipped {} triangles with degenerate UVs in mesh {} primitive {} of {}",
                        frames.degenerate_triangles,
                        m,
                        p,
                        document.label
                    );
                }
                let tangents = factory.create_buffer(
                    &format!("{} tangents {}/{}", document.label, m, p),
                    bytemuck::cast_slice(&frames.tangents),
                    BufferRole::Vertex,
                )?;
                let bitangents = factory.create_buffer(
                    &format!("{} bitangents {}/{}", document.label, m, p),
                    bytemuck::cast_slice(&frames.bitangents),
                    BufferRole::Vertex,
                )?;
                per_primitive.push(Some(TangentBuffers {
                    tangents,
                    bitangents,
                    vertex_count: frames.tangents.len(),
                }));
            }
            per_mesh.push(per_primitive);
        }

        self.tangents = per_mesh;
        self.center = bounds.center().unwrap_or_else(Vector3::zero);
        self.state = self.state.with_tangents();
        Ok(())
    }
}
