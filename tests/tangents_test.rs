mod common;

use cgmath::Vector3;
use common::test_utils::{DocumentBuilder, assert_close, unit_triangle};
use gltf_pbr_viewer::data_structures::{
    accessor::{ComponentType, Vec2Accessor, Vec3Accessor},
    document::{Attributes, Primitive, Topology},
    tangents::{self, Bounds},
};

fn le_floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn should_derive_axis_aligned_frame_for_unit_triangle() {
    let mut builder = DocumentBuilder::new("triangle");
    let primitive = unit_triangle(&mut builder);
    let document = builder.build();
    let mut bounds = Bounds::empty();

    let frames = tangents::derive_primitive_tangents(&document, &primitive, &mut bounds)
        .unwrap()
        .expect("primitive has positions and uvs");

    assert_eq!(frames.tangents.len(), 3);
    assert_eq!(frames.degenerate_triangles, 0);
    for vertex in 0..3 {
        assert_close(frames.tangents[vertex], [1.0, 0.0, 0.0]);
        assert_close(frames.bitangents[vertex], [0.0, 1.0, 0.0]);
    }
}

#[test]
fn should_accumulate_frames_of_shared_vertices() {
    // a unit quad split along its diagonal; vertices 0 and 2 are shared
    let positions = le_floats(&[
        0.0, 0.0, 0.0, //
        2.0, 0.0, 0.0, //
        2.0, 2.0, 0.0, //
        0.0, 2.0, 0.0,
    ]);
    let uvs = le_floats(&[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
    let positions = Vec3Accessor::new(positions.as_slice(), ComponentType::F32, 4, 0).unwrap();
    let uvs = Vec2Accessor::new(uvs.as_slice(), ComponentType::F32, 4, 0).unwrap();
    let mut bounds = Bounds::empty();

    let frames = tangents::derive_tangents(
        &[0, 1, 2, 0, 2, 3],
        Topology::Triangles,
        &positions,
        &uvs,
        &mut bounds,
    )
    .unwrap();

    // sums are not normalised: two triangles touch vertices 0 and 2
    assert_close(frames.tangents[0], [4.0, 0.0, 0.0]);
    assert_close(frames.tangents[1], [2.0, 0.0, 0.0]);
    assert_close(frames.bitangents[2], [0.0, 4.0, 0.0]);
    assert_close(frames.bitangents[3], [0.0, 2.0, 0.0]);
    assert_eq!(bounds.center(), Some(Vector3::new(1.0, 1.0, 0.0)));
}

#[test]
fn should_not_depend_on_triangle_order() {
    let positions = le_floats(&[
        0.0, 0.0, 0.0, //
        1.0, 0.2, 0.0, //
        0.9, 1.1, 0.3, //
        -0.1, 0.8, 0.5, //
        0.4, -0.7, 0.2,
    ]);
    let uvs = le_floats(&[0.0, 0.0, 0.6, 0.1, 0.7, 0.8, 0.1, 0.6, 0.3, -0.5]);
    let positions = Vec3Accessor::new(positions.as_slice(), ComponentType::F32, 5, 0).unwrap();
    let uvs = Vec2Accessor::new(uvs.as_slice(), ComponentType::F32, 5, 0).unwrap();

    let forward = [0, 1, 2, 0, 2, 3, 0, 4, 1];
    let permuted = [0, 4, 1, 0, 2, 3, 0, 1, 2];
    let a = tangents::derive_tangents(&forward, Topology::Triangles, &positions, &uvs, &mut Bounds::empty())
        .unwrap();
    let b = tangents::derive_tangents(&permuted, Topology::Triangles, &positions, &uvs, &mut Bounds::empty())
        .unwrap();

    for vertex in 0..5 {
        assert_close(a.tangents[vertex], b.tangents[vertex]);
        assert_close(a.bitangents[vertex], b.bitangents[vertex]);
    }
}

#[test]
fn should_skip_triangles_with_degenerate_uvs() {
    let positions = le_floats(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    // all three uvs on one line
    let uvs = le_floats(&[0.0, 0.0, 0.5, 0.5, 1.0, 1.0]);
    let positions = Vec3Accessor::new(positions.as_slice(), ComponentType::F32, 3, 0).unwrap();
    let uvs = Vec2Accessor::new(uvs.as_slice(), ComponentType::F32, 3, 0).unwrap();
    let mut bounds = Bounds::empty();

    let frames =
        tangents::derive_tangents(&[0, 1, 2], Topology::Triangles, &positions, &uvs, &mut bounds)
            .unwrap();

    assert_eq!(frames.degenerate_triangles, 1);
    for vertex in 0..3 {
        assert_eq!(frames.tangents[vertex], [0.0; 3]);
        assert!(frames.bitangents[vertex].iter().all(|c| c.is_finite()));
    }
    // positions of skipped triangles still count towards the bounds
    assert_eq!(bounds.max, Vector3::new(1.0, 1.0, 0.0));
}

#[test]
fn should_center_bounds_on_min_max_midpoint() {
    let mut builder = DocumentBuilder::new("bounds");
    let position = builder.positions(&[
        [-2.0, -1.0, 0.0],
        [4.0, 0.5, 2.0],
        [0.0, 1.0, 1.0],
        [1.0, 0.0, 0.5],
    ]);
    let primitive = Primitive {
        attributes: Attributes {
            position: Some(position),
            ..Attributes::default()
        },
        ..Primitive::default()
    };
    let document = builder.build();
    let mut bounds = Bounds::empty();

    tangents::include_primitive_bounds(&document, &primitive, &mut bounds).unwrap();

    // the fourth vertex is not part of any triangle
    assert_eq!(bounds.min, Vector3::new(-2.0, -1.0, 0.0));
    assert_eq!(bounds.max, Vector3::new(4.0, 1.0, 2.0));
    assert_eq!(bounds.center(), Some(Vector3::new(1.0, 0.0, 1.0)));
}

#[test]
fn should_have_no_center_while_empty() {
    let bounds = Bounds::empty();

    assert!(bounds.is_empty());
    assert_eq!(bounds.center(), None);
}

#[test]
fn should_expand_strips_and_fans_into_triangles() {
    assert_eq!(
        tangents::triangle_corners(Topology::TriangleStrip, 5),
        vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]
    );
    assert_eq!(
        tangents::triangle_corners(Topology::TriangleFan, 4),
        vec![[0, 1, 2], [0, 2, 3]]
    );
    assert_eq!(tangents::triangle_corners(Topology::Triangles, 7).len(), 2);
    assert!(tangents::triangle_corners(Topology::Lines, 6).is_empty());
}

#[test]
fn should_reject_indices_past_the_vertex_count() {
    let mut builder = DocumentBuilder::new("bad indices");
    let position = builder.positions(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
    let indices = builder.u16_indices(&[0, 1, 3]);
    let primitive = Primitive {
        attributes: Attributes {
            position: Some(position),
            ..Attributes::default()
        },
        indices: Some(indices),
        ..Primitive::default()
    };
    let document = builder.build();

    assert!(tangents::primitive_indices(&document, &primitive, 3).is_err());
}
