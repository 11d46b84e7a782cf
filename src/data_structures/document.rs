//! In-memory model of a loaded glTF asset.
//!
//! [`Document`] is a flat, index-based mirror of the glTF JSON: every cross
//! reference is a plain `usize` into one of the top-level arrays. It is built
//! from a parsed [`gltf::Gltf`] by the loader (or directly in code) and is
//! immutable afterwards, except for its [`ImageSlots`], which are filled in
//! as image downloads complete.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    data_structures::accessor::{self, ComponentType, DataAccessor, Shape},
    error::{Result, ViewerError},
};

/// Number and arrangement of components in one accessor element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementKind {
    pub const fn components(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Accessor {
    /// `None` means all elements are zero, which this viewer treats as absent.
    pub buffer_view: Option<usize>,
    pub byte_offset: usize,
    pub component_type: ComponentType,
    pub kind: ElementKind,
    pub count: usize,
    pub normalized: bool,
}

impl Accessor {
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.kind.components()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferTarget {
    Vertex,
    Index,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub byte_stride: Option<usize>,
    pub target: Option<BufferTarget>,
}

impl BufferView {
    /// One past the view's last byte in its buffer.
    pub fn end(&self) -> Option<usize> {
        self.byte_offset.checked_add(self.byte_length)
    }
}

/// glTF primitive `mode`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// The vertex attributes the renderer consumes, as accessor indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    pub position: Option<usize>,
    pub normal: Option<usize>,
    pub tex_coord: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Primitive {
    pub attributes: Attributes,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    pub mode: Topology,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
}

/// Texture references are indices into [`Document::textures`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub base_color_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub occlusion_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
    pub emissive_factor: Option<[f32; 3]>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: Option<String>,
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
    /// Axis in xyz, angle in radians in w.
    pub rotation: Option<[f32; 4]>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub name: Option<String>,
    pub nodes: Vec<usize>,
}

/// Raw glTF sampler codes, kept for completeness; filtering is chosen per
/// image size when textures are uploaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sampler {
    pub mag_filter: Option<u32>,
    pub min_filter: Option<u32>,
    pub wrap_s: u32,
    pub wrap_t: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureSource {
    pub source: usize,
    pub sampler: Option<usize>,
}

#[derive(Clone, Debug)]
pub enum ImageSlot {
    Pending,
    Ready(Arc<image::RgbaImage>),
    Failed(String),
}

/// Decoded images of a document, shared with the tasks that download them.
#[derive(Clone, Debug, Default)]
pub struct ImageSlots(Arc<RwLock<Vec<ImageSlot>>>);

impl ImageSlots {
    pub fn pending(len: usize) -> Self {
        Self(Arc::new(RwLock::new(vec![ImageSlot::Pending; len])))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ImageSlot> {
        self.0.read().get(index).cloned()
    }

    pub fn fill(&self, index: usize, slot: ImageSlot) {
        match self.0.write().get_mut(index) {
            Some(existing) => *existing = slot,
            None => log::warn!("Ignoring image for unknown slot {}", index),
        }
    }

    /// True once no slot is waiting for data any more.
    pub fn all_settled(&self) -> bool {
        !self
            .0
            .read()
            .iter()
            .any(|slot| matches!(slot, ImageSlot::Pending))
    }

    pub fn failed_count(&self) -> usize {
        self.0
            .read()
            .iter()
            .filter(|slot| matches!(slot, ImageSlot::Failed(_)))
            .count()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    /// Where the document came from; used in diagnostics.
    pub label: String,
    pub accessors: Vec<Accessor>,
    pub buffer_views: Vec<BufferView>,
    pub buffers: Vec<Vec<u8>>,
    pub images: ImageSlots,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub nodes: Vec<Node>,
    pub samplers: Vec<Sampler>,
    pub scene: Option<usize>,
    pub scenes: Vec<Scene>,
    pub textures: Vec<TextureSource>,
}

fn lookup<'a, T>(items: &'a [T], index: usize, kind: &'static str, referrer: &str) -> Result<&'a T> {
    items
        .get(index)
        .ok_or_else(|| ViewerError::missing(kind, index, items.len(), referrer))
}

impl Document {
    pub fn accessor(&self, index: usize) -> Result<&Accessor> {
        lookup(&self.accessors, index, "accessor", &self.label)
    }

    pub fn buffer_view(&self, index: usize) -> Result<&BufferView> {
        lookup(&self.buffer_views, index, "bufferView", &self.label)
    }

    pub fn buffer(&self, index: usize) -> Result<&[u8]> {
        lookup(&self.buffers, index, "buffer", &self.label).map(Vec::as_slice)
    }

    pub fn mesh(&self, index: usize) -> Result<&Mesh> {
        lookup(&self.meshes, index, "mesh", &self.label)
    }

    pub fn material(&self, index: usize) -> Result<&Material> {
        lookup(&self.materials, index, "material", &self.label)
    }

    /// Resolves a texture index to the index of the image it samples.
    pub fn texture_image(&self, texture: usize) -> Result<usize> {
        let source = lookup(&self.textures, texture, "texture", &self.label)?.source;
        if source >= self.images.len() {
            return Err(ViewerError::missing(
                "image",
                source,
                self.images.len(),
                format!("texture {}", texture),
            ));
        }
        Ok(source)
    }

    /// Nodes reachable from the active scene, depth first.
    ///
    /// The active scene is `scene`, or the first scene; a document without
    /// scenes yields every node.
    pub fn scene_nodes(&self) -> Vec<usize> {
        let roots: Vec<usize> = match self.scene.or((!self.scenes.is_empty()).then_some(0)) {
            Some(scene) => match self.scenes.get(scene) {
                Some(scene) => scene.nodes.clone(),
                None => return Vec::new(),
            },
            None => return (0..self.nodes.len()).collect(),
        };
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(index) = stack.pop() {
            if index >= self.nodes.len() || visited[index] {
                continue;
            }
            visited[index] = true;
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        order
    }

    /// Resolves accessor -> bufferView -> buffer and returns
    /// `(bytes, byte offset, byte stride)` of the accessor's data.
    pub fn accessor_details(&self, index: usize) -> Result<(&[u8], usize, Option<usize>)> {
        let accessor = self.accessor(index)?;
        let view_index = accessor
            .buffer_view
            .ok_or_else(|| ViewerError::Unsupported {
                what: "accessor without bufferView",
                detail: format!("accessor {} of {}", index, self.label),
            })?;
        let view = self.buffer_view(view_index)?;
        let buffer = self.buffer(view.buffer)?;
        let end = view.end().unwrap_or(usize::MAX);
        if end > buffer.len() {
            return Err(ViewerError::AccessorOverrun {
                needed: end,
                available: buffer.len(),
            });
        }
        let stride = view.byte_stride.filter(|&s| s != accessor.element_size());
        Ok((&buffer[view.byte_offset..end], accessor.byte_offset, stride))
    }

    /// A typed view over accessor `index`.
    ///
    /// The shape parameter has to agree with the accessor's element kind.
    pub fn typed_accessor<S: Shape>(&self, index: usize) -> Result<DataAccessor<&[u8], S>> {
        let accessor = self.accessor(index)?;
        if accessor.kind.components() != S::COMPONENTS {
            return Err(ViewerError::Unsupported {
                what: "accessor shape",
                detail: format!(
                    "accessor {} of {} holds {:?} elements",
                    index, self.label, accessor.kind
                ),
            });
        }
        let (bytes, offset, stride) = self.accessor_details(index)?;
        DataAccessor::new(bytes, accessor.component_type, accessor.count, offset)?
            .with_byte_stride(stride)
    }

    /// Checks every cross reference and accessor extent.
    pub fn validate(&self) -> Result<()> {
        for (i, view) in self.buffer_views.iter().enumerate() {
            let buffer = lookup(&self.buffers, view.buffer, "buffer", &format!("bufferView {}", i))?;
            let end = view.end().unwrap_or(usize::MAX);
            if end > buffer.len() {
                return Err(ViewerError::AccessorOverrun {
                    needed: end,
                    available: buffer.len(),
                });
            }
        }
        for (i, accessor) in self.accessors.iter().enumerate() {
            let Some(view) = accessor.buffer_view else {
                continue;
            };
            let view = lookup(&self.buffer_views, view, "bufferView", &format!("accessor {}", i))?;
            let stride = view.byte_stride.unwrap_or(accessor.element_size());
            let needed = accessor::extent(
                accessor.byte_offset,
                accessor.count,
                stride,
                accessor.element_size(),
            )
            .unwrap_or(usize::MAX);
            if needed > view.byte_length {
                return Err(ViewerError::AccessorOverrun {
                    needed,
                    available: view.byte_length,
                });
            }
        }
        for (m, mesh) in self.meshes.iter().enumerate() {
            for (p, primitive) in mesh.primitives.iter().enumerate() {
                let referrer = format!("mesh {} primitive {}", m, p);
                let attributes = &primitive.attributes;
                for index in [
                    attributes.position,
                    attributes.normal,
                    attributes.tex_coord,
                    primitive.indices,
                ]
                .into_iter()
                .flatten()
                {
                    lookup(&self.accessors, index, "accessor", &referrer)?;
                }
                if let Some(material) = primitive.material {
                    lookup(&self.materials, material, "material", &referrer)?;
                }
            }
        }
        for (i, material) in self.materials.iter().enumerate() {
            for texture in [
                material.base_color_texture,
                material.metallic_roughness_texture,
                material.normal_texture,
                material.occlusion_texture,
                material.emissive_texture,
            ]
            .into_iter()
            .flatten()
            {
                lookup(&self.textures, texture, "texture", &format!("material {}", i))?;
            }
        }
        for i in 0..self.textures.len() {
            self.texture_image(i)?;
            if let Some(sampler) = self.textures[i].sampler {
                lookup(&self.samplers, sampler, "sampler", &format!("texture {}", i))?;
            }
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let referrer = format!("node {}", i);
            if let Some(mesh) = node.mesh {
                lookup(&self.meshes, mesh, "mesh", &referrer)?;
            }
            for &child in &node.children {
                lookup(&self.nodes, child, "node", &referrer)?;
            }
        }
        for (i, scene) in self.scenes.iter().enumerate() {
            for &node in &scene.nodes {
                lookup(&self.nodes, node, "node", &format!("scene {}", i))?;
            }
        }
        if let Some(scene) = self.scene {
            lookup(&self.scenes, scene, "scene", &self.label)?;
        }
        Ok(())
    }

    /// Converts the JSON part of a parsed glTF asset.
    ///
    /// Buffers are left empty and every image slot is pending; the loader
    /// fills both in.
    pub fn from_gltf(gltf: &gltf::Document, label: &str) -> Result<Self> {
        use gltf::{accessor::Dimensions, mesh::Mode};

        let accessors = gltf
            .accessors()
            .map(|accessor| {
                let code = accessor.data_type().as_gl_enum();
                let component_type = ComponentType::from_gl(code).ok_or_else(|| {
                    ViewerError::InvalidDocument(format!(
                        "accessor {} of {} has component type {}",
                        accessor.index(),
                        label,
                        code
                    ))
                })?;
                if accessor.sparse().is_some() {
                    log::warn!(
                        "Sparse accessor {} in {} is read without its sparse substitutions",
                        accessor.index(),
                        label
                    );
                }
                Ok(Accessor {
                    buffer_view: accessor.view().map(|view| view.index()),
                    byte_offset: accessor.offset(),
                    component_type,
                    kind: match accessor.dimensions() {
                        Dimensions::Scalar => ElementKind::Scalar,
                        Dimensions::Vec2 => ElementKind::Vec2,
                        Dimensions::Vec3 => ElementKind::Vec3,
                        Dimensions::Vec4 => ElementKind::Vec4,
                        Dimensions::Mat2 => ElementKind::Mat2,
                        Dimensions::Mat3 => ElementKind::Mat3,
                        Dimensions::Mat4 => ElementKind::Mat4,
                    },
                    count: accessor.count(),
                    normalized: accessor.normalized(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let buffer_views = gltf
            .views()
            .map(|view| BufferView {
                buffer: view.buffer().index(),
                byte_offset: view.offset(),
                byte_length: view.length(),
                byte_stride: view.stride(),
                target: view.target().map(|target| match target {
                    gltf::buffer::Target::ArrayBuffer => BufferTarget::Vertex,
                    gltf::buffer::Target::ElementArrayBuffer => BufferTarget::Index,
                }),
            })
            .collect();

        let meshes = gltf
            .meshes()
            .map(|mesh| Mesh {
                name: mesh.name().map(str::to_string),
                primitives: mesh
                    .primitives()
                    .map(|primitive| Primitive {
                        attributes: Attributes {
                            position: primitive
                                .get(&gltf::Semantic::Positions)
                                .map(|a| a.index()),
                            normal: primitive.get(&gltf::Semantic::Normals).map(|a| a.index()),
                            tex_coord: primitive
                                .get(&gltf::Semantic::TexCoords(0))
                                .map(|a| a.index()),
                        },
                        indices: primitive.indices().map(|a| a.index()),
                        material: primitive.material().index(),
                        mode: match primitive.mode() {
                            Mode::Points => Topology::Points,
                            Mode::Lines => Topology::Lines,
                            Mode::LineLoop => Topology::LineLoop,
                            Mode::LineStrip => Topology::LineStrip,
                            Mode::Triangles => Topology::Triangles,
                            Mode::TriangleStrip => Topology::TriangleStrip,
                            Mode::TriangleFan => Topology::TriangleFan,
                        },
                    })
                    .collect(),
            })
            .collect();

        let materials = gltf
            .materials()
            .map(|material| {
                let pbr = material.pbr_metallic_roughness();
                Material {
                    name: material.name().map(str::to_string),
                    base_color_texture: pbr.base_color_texture().map(|t| t.texture().index()),
                    metallic_roughness_texture: pbr
                        .metallic_roughness_texture()
                        .map(|t| t.texture().index()),
                    normal_texture: material.normal_texture().map(|t| t.texture().index()),
                    occlusion_texture: material.occlusion_texture().map(|t| t.texture().index()),
                    emissive_texture: material.emissive_texture().map(|t| t.texture().index()),
                    emissive_factor: Some(material.emissive_factor()),
                }
            })
            .collect();

        let nodes = gltf
            .nodes()
            .map(|node| {
                let (_, rotation, _) = node.transform().decomposed();
                Node {
                    name: node.name().map(str::to_string),
                    mesh: node.mesh().map(|mesh| mesh.index()),
                    children: node.children().map(|child| child.index()).collect(),
                    rotation: quaternion_to_axis_angle(rotation),
                }
            })
            .collect();

        let samplers = gltf
            .samplers()
            .map(|sampler| Sampler {
                mag_filter: sampler.mag_filter().map(|f| f.as_gl_enum()),
                min_filter: sampler.min_filter().map(|f| f.as_gl_enum()),
                wrap_s: sampler.wrap_s().as_gl_enum(),
                wrap_t: sampler.wrap_t().as_gl_enum(),
            })
            .collect();

        let textures = gltf
            .textures()
            .map(|texture| TextureSource {
                source: texture.source().index(),
                sampler: texture.sampler().index(),
            })
            .collect();

        let scenes = gltf
            .scenes()
            .map(|scene| Scene {
                name: scene.name().map(str::to_string),
                nodes: scene.nodes().map(|node| node.index()).collect(),
            })
            .collect();

        Ok(Self {
            label: label.to_string(),
            accessors,
            buffer_views,
            buffers: Vec::new(),
            images: ImageSlots::pending(gltf.images().len()),
            materials,
            meshes,
            nodes,
            samplers,
            scene: gltf.default_scene().map(|scene| scene.index()),
            scenes,
            textures,
        })
    }
}

/// Unit quaternion `[x, y, z, w]` to `[axis, angle]`; identity becomes `None`.
fn quaternion_to_axis_angle([x, y, z, w]: [f32; 4]) -> Option<[f32; 4]> {
    let sin_half = (x * x + y * y + z * z).sqrt();
    if sin_half <= f32::EPSILON {
        return None;
    }
    let angle = 2.0 * sin_half.atan2(w);
    Some([x / sin_half, y / sin_half, z / sin_half, angle])
}
