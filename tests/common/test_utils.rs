use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
};

use futures::future;
use gltf_pbr_viewer::{
    data_structures::{
        accessor::ComponentType,
        document::{
            Accessor, Attributes, BufferView, Document, ElementKind, ImageSlots, Material, Mesh, Node,
            Primitive, Scene, TextureSource,
        },
        gpu_model::{BufferRole, ResourceFactory, TextureFiltering},
    },
    error::{Result, ViewerError},
    resources::fetch::{Fetch, FetchFuture},
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestBuffer {
    pub(crate) label: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) role: BufferRole,
}

impl TestBuffer {
    pub(crate) fn floats(&self) -> Vec<f32> {
        self.bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestTexture {
    pub(crate) label: String,
    pub(crate) size: (u32, u32),
    pub(crate) filtering: TextureFiltering,
}

/// Records every resource a model asks for instead of touching a GPU.
#[derive(Default)]
pub(crate) struct CountingFactory {
    buffers: Cell<usize>,
    textures: Cell<usize>,
    labels: RefCell<Vec<String>>,
    /// Creation of any resource whose label contains this text fails.
    pub(crate) fail_on: Option<String>,
}

impl CountingFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(label: &str) -> Self {
        Self {
            fail_on: Some(label.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn buffers(&self) -> usize {
        self.buffers.get()
    }

    pub(crate) fn textures(&self) -> usize {
        self.textures.get()
    }

    pub(crate) fn created(&self) -> usize {
        self.buffers() + self.textures()
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.labels.borrow().clone()
    }

    fn check(&self, label: &str) -> Result<()> {
        if let Some(fail_on) = &self.fail_on
            && label.contains(fail_on.as_str())
        {
            return Err(ViewerError::AllocationFailure {
                resource: label.to_string(),
                model: "test".to_string(),
                reason: "refused by test factory".to_string(),
            });
        }
        self.labels.borrow_mut().push(label.to_string());
        Ok(())
    }
}

impl ResourceFactory for CountingFactory {
    type Buffer = TestBuffer;
    type Texture = TestTexture;

    fn create_buffer(&self, label: &str, contents: &[u8], role: BufferRole) -> Result<TestBuffer> {
        self.check(label)?;
        self.buffers.set(self.buffers.get() + 1);
        Ok(TestBuffer {
            label: label.to_string(),
            bytes: contents.to_vec(),
            role,
        })
    }

    fn create_texture(
        &self,
        label: &str,
        image: &image::RgbaImage,
        filtering: TextureFiltering,
    ) -> Result<TestTexture> {
        self.check(label)?;
        self.textures.set(self.textures.get() + 1);
        Ok(TestTexture {
            label: label.to_string(),
            size: image.dimensions(),
            filtering,
        })
    }
}

/// Serves files from memory. URLs marked pending never resolve; unknown
/// URLs fail.
#[derive(Default)]
pub(crate) struct MockFetcher {
    files: HashMap<String, Vec<u8>>,
    pending: HashSet<String>,
    requested: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.to_string(), bytes.into());
        self
    }

    pub(crate) fn with_pending(mut self, url: &str) -> Self {
        self.pending.insert(url.to_string());
        self
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

impl Fetch for MockFetcher {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> FetchFuture<'a, Result<Vec<u8>>> {
        self.requested.lock().push(url.to_string());
        if self.pending.contains(url) {
            return Box::pin(future::pending());
        }
        let result = self
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| ViewerError::FetchFailure {
                url: url.to_string(),
                reason: "not found".to_string(),
            });
        Box::pin(future::ready(result))
    }
}

pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encoding a test image");
    bytes.into_inner()
}

pub(crate) fn rgba_image(width: u32, height: u32) -> image::RgbaImage {
    image::RgbaImage::from_pixel(width, height, image::Rgba([128, 128, 128, 255]))
}

/// Builds documents in code. Every accessor gets its own buffer and view;
/// every mesh gets a node in the single scene.
#[derive(Default)]
pub(crate) struct DocumentBuilder {
    document: Document,
    image_count: usize,
}

impl DocumentBuilder {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            document: Document {
                label: label.to_string(),
                ..Document::default()
            },
            image_count: 0,
        }
    }

    fn push_accessor(
        &mut self,
        bytes: Vec<u8>,
        component_type: ComponentType,
        kind: ElementKind,
        count: usize,
    ) -> usize {
        let buffer = self.document.buffers.len();
        self.document.buffer_views.push(BufferView {
            buffer,
            byte_offset: 0,
            byte_length: bytes.len(),
            byte_stride: None,
            target: None,
        });
        self.document.buffers.push(bytes);
        self.document.accessors.push(Accessor {
            buffer_view: Some(self.document.buffer_views.len() - 1),
            byte_offset: 0,
            component_type,
            kind,
            count,
            normalized: false,
        });
        self.document.accessors.len() - 1
    }

    pub(crate) fn floats(&mut self, kind: ElementKind, values: &[f32]) -> usize {
        let count = values.len() / kind.components();
        self.push_accessor(
            bytemuck::cast_slice(values).to_vec(),
            ComponentType::F32,
            kind,
            count,
        )
    }

    pub(crate) fn positions(&mut self, values: &[[f32; 3]]) -> usize {
        self.floats(ElementKind::Vec3, values.as_flattened())
    }

    pub(crate) fn tex_coords(&mut self, values: &[[f32; 2]]) -> usize {
        self.floats(ElementKind::Vec2, values.as_flattened())
    }

    pub(crate) fn u16_indices(&mut self, values: &[u16]) -> usize {
        self.push_accessor(
            bytemuck::cast_slice(values).to_vec(),
            ComponentType::U16,
            ElementKind::Scalar,
            values.len(),
        )
    }

    pub(crate) fn u8_indices(&mut self, values: &[u8]) -> usize {
        self.push_accessor(
            values.to_vec(),
            ComponentType::U8,
            ElementKind::Scalar,
            values.len(),
        )
    }

    /// Adds an image and a texture sampling it; returns the texture index.
    pub(crate) fn texture(&mut self) -> usize {
        self.document.textures.push(TextureSource {
            source: self.image_count,
            sampler: None,
        });
        self.image_count += 1;
        self.document.textures.len() - 1
    }

    pub(crate) fn material(&mut self, material: Material) -> usize {
        self.document.materials.push(material);
        self.document.materials.len() - 1
    }

    pub(crate) fn mesh(&mut self, primitives: Vec<Primitive>) -> usize {
        self.mesh_node(primitives, None)
    }

    pub(crate) fn mesh_node(&mut self, primitives: Vec<Primitive>, rotation: Option<[f32; 4]>) -> usize {
        self.document.meshes.push(Mesh {
            name: None,
            primitives,
        });
        self.document.nodes.push(Node {
            name: None,
            mesh: Some(self.document.meshes.len() - 1),
            children: Vec::new(),
            rotation,
        });
        self.document.meshes.len() - 1
    }

    pub(crate) fn build(mut self) -> Document {
        self.document.images = ImageSlots::pending(self.image_count);
        self.document.scenes = vec![Scene {
            name: None,
            nodes: (0..self.document.nodes.len()).collect(),
        }];
        self.document.scene = Some(0);
        self.document
    }
}

/// A single triangle with axis-aligned UVs.
pub(crate) fn unit_triangle(builder: &mut DocumentBuilder) -> Primitive {
    let position = builder.positions(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
    let tex_coord = builder.tex_coords(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    let indices = builder.u16_indices(&[0, 1, 2]);
    Primitive {
        attributes: Attributes {
            position: Some(position),
            normal: None,
            tex_coord: Some(tex_coord),
        },
        indices: Some(indices),
        material: None,
        mode: Default::default(),
    }
}

pub(crate) fn assert_close(actual: [f32; 3], expected: [f32; 3]) {
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (a - e).abs() < 1e-5,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }
}
