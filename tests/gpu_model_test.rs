mod common;

use std::sync::Arc;

use cgmath::Vector3;
use common::test_utils::{
    CountingFactory, DocumentBuilder, TestBuffer, TestTexture, assert_close, rgba_image,
    unit_triangle,
};
use gltf_pbr_viewer::{
    data_structures::{
        document::{Attributes, Document, ImageSlot, Material, Primitive},
        gpu_model::{BufferRole, GpuModel, ModelState, TextureFiltering, is_power_of_two},
    },
    error::ViewerError,
};

type TestModel = GpuModel<TestBuffer, TestTexture>;

/// One normal-mapped triangle with a base colour and a normal texture.
fn normal_mapped_triangle() -> Document {
    let mut builder = DocumentBuilder::new("normal mapped");
    let mut primitive = unit_triangle(&mut builder);
    let base_color = builder.texture();
    let normal = builder.texture();
    primitive.material = Some(builder.material(Material {
        base_color_texture: Some(base_color),
        normal_texture: Some(normal),
        ..Material::default()
    }));
    builder.mesh(vec![primitive]);
    builder.build()
}

#[test]
fn should_advance_through_states_in_either_order() {
    let state = ModelState::Unloaded;
    assert!(!state.has_buffers());
    assert_eq!(state.with_textures(), ModelState::Unloaded);

    let buffers = state.with_buffers();
    assert_eq!(buffers, ModelState::BuffersReady);
    assert_eq!(buffers.with_textures().with_tangents(), ModelState::FullyReady);
    assert_eq!(buffers.with_tangents().with_textures(), ModelState::FullyReady);
    assert!(ModelState::TangentsReady.has_tangents());
    assert!(!ModelState::TangentsReady.has_textures());
    assert!(!ModelState::Failed.has_buffers());
    assert_eq!(ModelState::Failed.with_buffers(), ModelState::Failed);
}

#[test]
fn should_create_nothing_on_second_initialisation() {
    let document = normal_mapped_triangle();
    document
        .images
        .fill(0, ImageSlot::Ready(Arc::new(rgba_image(4, 4))));
    document
        .images
        .fill(1, ImageSlot::Ready(Arc::new(rgba_image(4, 4))));
    let mut model = TestModel::new(document);
    let factory = CountingFactory::new();

    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::FullyReady);
    // three source buffers as vertex + index pairs, two tangent buffers
    assert_eq!(factory.buffers(), 3 * 2 + 2);
    assert_eq!(factory.textures(), 2);
    let created = factory.created();

    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::FullyReady);
    model.ensure_buffers(&factory).unwrap();
    model.ensure_textures(&factory).unwrap();
    model.ensure_tangents(&factory).unwrap();
    assert_eq!(factory.created(), created);
}

#[test]
fn should_upload_every_source_buffer_for_both_roles() {
    let mut model = TestModel::new(normal_mapped_triangle());
    let factory = CountingFactory::new();
    model.ensure_buffers(&factory).unwrap();

    assert_eq!(model.state(), ModelState::BuffersReady);
    let pair = model.buffer_pair(2).expect("index source buffer");
    assert_eq!(pair.vertex.role, BufferRole::Vertex);
    assert_eq!(pair.index.role, BufferRole::Index);
    assert_eq!(pair.index.bytes, vec![0, 0, 1, 0, 2, 0]);
    assert!(model.buffer_pair(3).is_none());
}

#[test]
fn should_wait_for_pending_images() {
    let document = normal_mapped_triangle();
    let images = document.images.clone();
    let mut model = TestModel::new(document);
    let factory = CountingFactory::new();

    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::TangentsReady);
    assert_eq!(factory.textures(), 0);
    assert!(model.texture(0).is_none());

    images.fill(0, ImageSlot::Ready(Arc::new(rgba_image(2, 2))));
    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::TangentsReady);
    assert_eq!(factory.textures(), 1);

    images.fill(1, ImageSlot::Ready(Arc::new(rgba_image(3, 5))));
    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::FullyReady);
    assert_eq!(factory.textures(), 2);
    assert_eq!(model.texture(0).unwrap().filtering, TextureFiltering::Mipmapped);
    assert_eq!(model.texture(1).unwrap().filtering, TextureFiltering::ClampLinear);
    assert_eq!(model.texture(1).unwrap().size, (3, 5));
}

#[test]
fn should_settle_textures_when_images_fail() {
    let document = normal_mapped_triangle();
    document
        .images
        .fill(0, ImageSlot::Failed("404".to_string()));
    document
        .images
        .fill(1, ImageSlot::Ready(Arc::new(rgba_image(1, 1))));
    let mut model = TestModel::new(document);
    let factory = CountingFactory::new();

    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::FullyReady);
    assert!(model.texture(0).is_none());
    assert!(model.texture(1).is_some());
}

#[test]
fn should_upload_tangent_frames_of_normal_mapped_primitives() {
    let mut model = TestModel::new(normal_mapped_triangle());
    let factory = CountingFactory::new();
    model.ensure_all(&factory).unwrap();

    let buffers = model.tangent_buffers(0, 0).expect("tangents of mesh 0");
    assert_eq!(buffers.vertex_count, 3);
    let tangents = buffers.tangents.floats();
    let bitangents = buffers.bitangents.floats();
    for vertex in 0..3 {
        let at = 3 * vertex;
        assert_close(
            [tangents[at], tangents[at + 1], tangents[at + 2]],
            [1.0, 0.0, 0.0],
        );
        assert_close(
            [bitangents[at], bitangents[at + 1], bitangents[at + 2]],
            [0.0, 1.0, 0.0],
        );
    }
}

#[test]
fn should_skip_tangents_without_normal_map() {
    let mut builder = DocumentBuilder::new("plain");
    let primitive = unit_triangle(&mut builder);
    builder.mesh(vec![primitive]);
    let mut model = TestModel::new(builder.build());
    let factory = CountingFactory::new();

    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::FullyReady);
    assert!(model.tangent_buffers(0, 0).is_none());
    assert!(model.tangent_buffers(5, 0).is_none());
    assert!(factory.labels().iter().all(|label| !label.contains("tangents")));
}

#[test]
fn should_center_model_on_its_bounding_box() {
    let mut builder = DocumentBuilder::new("off center");
    let position = builder.positions(&[
        [-2.0, -1.0, 0.0],
        [4.0, 1.0, 0.0],
        [0.0, 0.0, 2.0],
    ]);
    builder.mesh(vec![Primitive {
        attributes: Attributes {
            position: Some(position),
            ..Attributes::default()
        },
        ..Primitive::default()
    }]);
    let mut model = TestModel::new(builder.build());
    assert_eq!(model.center(), Vector3::new(0.0, 0.0, 0.0));

    model.ensure_all(&CountingFactory::new()).unwrap();

    assert_eq!(model.center(), Vector3::new(1.0, 0.0, 1.0));
}

#[test]
fn should_widen_byte_indices() {
    let mut builder = DocumentBuilder::new("byte indices");
    let mut primitive = unit_triangle(&mut builder);
    let indices = builder.u8_indices(&[2, 1, 0]);
    primitive.indices = Some(indices);
    builder.mesh(vec![primitive.clone(), primitive]);
    let mut model = TestModel::new(builder.build());
    let factory = CountingFactory::new();

    model.ensure_buffers(&factory).unwrap();

    let widened = model.widened_indices(indices).expect("widened buffer");
    assert_eq!(widened.bytes, vec![2, 0, 1, 0, 0, 0]);
    assert_eq!(widened.role, BufferRole::Index);
    // the shared accessor is widened once
    assert_eq!(factory.buffers(), 4 * 2 + 1);
}

#[test]
fn should_fail_permanently_after_allocation_failure() {
    let mut model = TestModel::new(normal_mapped_triangle());
    let factory = CountingFactory::failing_on("index buffer 1");

    match model.ensure_all(&factory) {
        Err(ViewerError::AllocationFailure { resource, .. }) => {
            assert!(resource.contains("index buffer 1"));
        }
        other => panic!("expected AllocationFailure, got {:?}", other),
    }
    assert_eq!(model.state(), ModelState::Failed);
    assert!(model.buffer_pair(0).is_none());

    let created = factory.created();
    assert_eq!(model.ensure_all(&factory).unwrap(), ModelState::Failed);
    assert_eq!(factory.created(), created);
}

#[test]
fn should_fail_on_malformed_material_reference() {
    let mut builder = DocumentBuilder::new("dangling");
    let mut primitive = unit_triangle(&mut builder);
    primitive.material = Some(7);
    builder.mesh(vec![primitive]);
    let mut model = TestModel::new(builder.build());

    assert!(matches!(
        model.ensure_all(&CountingFactory::new()),
        Err(ViewerError::MalformedReference { kind: "material", index: 7, .. })
    ));
    assert_eq!(model.state(), ModelState::Failed);
}

#[test]
fn should_classify_power_of_two_sizes() {
    assert!(is_power_of_two(1));
    assert!(is_power_of_two(1024));
    assert!(!is_power_of_two(0));
    assert!(!is_power_of_two(96));
    assert_eq!(TextureFiltering::for_size(256, 64), TextureFiltering::Mipmapped);
    assert_eq!(TextureFiltering::for_size(256, 65), TextureFiltering::ClampLinear);
}
