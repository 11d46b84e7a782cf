//! Orbit camera of the viewer.
//!
//! The camera stays on the z axis, `2^zoom` units away from the model, and
//! the model is turned in front of it. Dragging sets an angular velocity
//! proportional to how far the cursor moved since the previous frame;
//! after the button is released the velocity decays by [`VELOCITY_DECAY`]
//! each frame, so the model keeps spinning for a moment.

use std::f32::consts::PI;

use cgmath::{Matrix4, Rad, Vector3};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

pub const NEAR: f32 = 0.01;
pub const FAR: f32 = 100.0;

pub const VELOCITY_DECAY: f32 = 1.1;

/// Scroll distance, in pixels, that changes the zoom exponent by one.
pub const ZOOM_STEP: f32 = 250.0;

#[derive(Clone, Debug, PartialEq)]
pub struct OrbitCamera {
    /// Turn around the model's vertical axis.
    pub x_rotation: f32,
    /// Tilt, kept within `[0, π]`.
    pub y_rotation: f32,
    pub x_velocity: f32,
    pub y_velocity: f32,
    /// The camera is `2^zoom` units from the model.
    pub zoom: f32,
    dragging: bool,
    cursor: (f32, f32),
    last_cursor: (f32, f32),
    width: f32,
    height: f32,
    fov: Rad<f32>,
}

impl OrbitCamera {
    pub fn new(width: u32, height: u32, fov: impl Into<Rad<f32>>) -> Self {
        Self {
            x_rotation: PI,
            y_rotation: PI * 0.6,
            x_velocity: 0.0,
            y_velocity: 0.0,
            zoom: 2.0,
            dragging: false,
            cursor: (0.0, 0.0),
            last_cursor: (0.0, 0.0),
            width: width.max(1) as f32,
            height: height.max(1) as f32,
            fov: fov.into(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1) as f32;
        self.height = height.max(1) as f32;
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }

    pub fn fov(&self) -> Rad<f32> {
        self.fov
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn begin_drag(&mut self, x: f32, y: f32) {
        self.dragging = true;
        self.cursor = (x, y);
        self.last_cursor = (x, y);
    }

    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    pub fn cursor_moved(&mut self, x: f32, y: f32) {
        if self.dragging {
            self.cursor = (x, y);
        }
    }

    /// `delta_y` is in pixels, positive when scrolling towards the user.
    pub fn scroll(&mut self, delta_y: f32) {
        self.zoom += delta_y / ZOOM_STEP;
    }

    /// Advances rotation by one frame.
    pub fn update(&mut self) {
        if self.dragging {
            self.x_velocity = (self.cursor.0 - self.last_cursor.0) / (self.width / 2.0);
            self.y_velocity = (self.cursor.1 - self.last_cursor.1) / (self.height / 2.0);
            self.last_cursor = self.cursor;
        } else {
            self.x_velocity /= VELOCITY_DECAY;
            self.y_velocity /= VELOCITY_DECAY;
        }
        self.x_rotation -= self.x_velocity;
        self.y_rotation = (self.y_rotation + self.y_velocity).clamp(0.0, PI);
    }

    pub fn projection(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(self.fov, self.aspect(), NEAR, FAR)
    }

    /// The camera translation alone; the sky box is drawn with this.
    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::from_translation(Vector3::new(0.0, 0.0, -(2.0f32).powf(self.zoom)))
    }

    /// The view with the model's tilt and turn applied.
    pub fn model_view(&self) -> Matrix4<f32> {
        self.view()
            * Matrix4::from_angle_x(Rad(-PI / 2.0))
            * Matrix4::from_angle_x(Rad(self.y_rotation))
            * Matrix4::from_angle_y(Rad(-self.x_rotation))
    }
}
