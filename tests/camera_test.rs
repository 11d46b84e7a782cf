use std::f32::consts::PI;

use cgmath::{Deg, Matrix4, Vector4};
use gltf_pbr_viewer::camera::{OrbitCamera, VELOCITY_DECAY, ZOOM_STEP};

fn camera() -> OrbitCamera {
    OrbitCamera::new(800, 600, Deg(45.0))
}

#[test]
fn should_start_facing_the_model() {
    let camera = camera();

    assert_eq!(camera.x_rotation, PI);
    assert_eq!(camera.y_rotation, PI * 0.6);
    assert_eq!(camera.zoom, 2.0);
    assert!(!camera.is_dragging());
    assert!((camera.aspect() - 800.0 / 600.0).abs() < 1e-6);
}

#[test]
fn should_turn_by_cursor_travel_while_dragging() {
    let mut camera = camera();
    camera.begin_drag(400.0, 300.0);
    camera.cursor_moved(440.0, 270.0);
    camera.update();

    assert!((camera.x_velocity - 0.1).abs() < 1e-6);
    assert!((camera.y_velocity + 0.1).abs() < 1e-6);
    assert!((camera.x_rotation - (PI - 0.1)).abs() < 1e-6);
    assert!((camera.y_rotation - (PI * 0.6 - 0.1)).abs() < 1e-6);

    // holding still stops the turn
    camera.update();
    assert_eq!(camera.x_velocity, 0.0);
}

#[test]
fn should_keep_spinning_after_release() {
    let mut camera = camera();
    camera.begin_drag(0.0, 0.0);
    camera.cursor_moved(80.0, 0.0);
    camera.update();
    camera.end_drag();
    let released = camera.x_velocity;
    let rotation = camera.x_rotation;

    camera.cursor_moved(500.0, 500.0);
    camera.update();

    assert!((camera.x_velocity - released / VELOCITY_DECAY).abs() < 1e-6);
    assert!(camera.x_rotation < rotation);
}

#[test]
fn should_clamp_tilt() {
    let mut camera = camera();
    camera.y_velocity = 10.0;
    camera.update();
    assert_eq!(camera.y_rotation, PI);

    camera.y_velocity = -10.0;
    camera.update();
    assert_eq!(camera.y_rotation, 0.0);
}

#[test]
fn should_zoom_exponentially() {
    let mut camera = camera();
    camera.scroll(ZOOM_STEP);

    assert_eq!(camera.zoom, 3.0);
    let eye = camera.view() * Vector4::new(0.0, 0.0, 0.0, 1.0);
    assert!((eye.z + 8.0).abs() < 1e-5, "{:?}", eye);
    assert_eq!((eye.x, eye.y, eye.w), (0.0, 0.0, 1.0));
}

#[test]
fn should_build_the_model_view_from_view_and_rotation() {
    let mut camera = camera();
    camera.x_rotation = 0.0;
    camera.y_rotation = PI / 2.0;

    // the two tilts cancel, leaving only the translation
    let expected = Matrix4::from_translation([0.0, 0.0, -4.0].into());
    let actual = camera.model_view();
    for (a, e) in AsRef::<[f32; 16]>::as_ref(&actual)
        .iter()
        .zip(AsRef::<[f32; 16]>::as_ref(&expected))
    {
        assert!((a - e).abs() < 1e-6, "{:?} != {:?}", actual, expected);
    }
}

#[test]
fn should_map_depth_into_the_unit_range() {
    let camera = camera();
    let projection = camera.projection();

    let near = projection * Vector4::new(0.0, 0.0, -gltf_pbr_viewer::camera::NEAR, 1.0);
    let far = projection * Vector4::new(0.0, 0.0, -gltf_pbr_viewer::camera::FAR, 1.0);

    assert!((near.z / near.w).abs() < 1e-4);
    assert!((far.z / far.w - 1.0).abs() < 1e-4);
}
