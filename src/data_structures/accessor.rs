//! Typed views over raw glTF buffer bytes.
//!
//! A [`DataAccessor`] interprets a byte slice as `count` elements of a fixed
//! [`Shape`] (scalar, vector or matrix) whose components are stored as one
//! [`ComponentType`]. Values are decoded and encoded little-endian, as glTF
//! requires, and exposed through `cgmath` types.
//!
//! The shape is a type parameter, so a `Vec3Accessor` always yields
//! `Vector3<f32>` and there is no per-element dispatch.

use std::marker::PhantomData;

use cgmath::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

use crate::error::{Result, ViewerError};

/// Storage type of a single component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl ComponentType {
    /// Maps the numeric `componentType` codes of the glTF JSON.
    pub fn from_gl(code: u32) -> Option<Self> {
        match code {
            5120 => Some(Self::I8),
            5121 => Some(Self::U8),
            5122 => Some(Self::I16),
            5123 => Some(Self::U16),
            5124 => Some(Self::I32),
            5125 => Some(Self::U32),
            5126 => Some(Self::F32),
            _ => None,
        }
    }

    /// Size of one component in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
        }
    }

    fn read(self, bytes: &[u8]) -> f64 {
        match self {
            Self::I8 => i8::from_le_bytes([bytes[0]]) as f64,
            Self::U8 => bytes[0] as f64,
            Self::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        }
    }

    // Integer stores saturate, which is what `as` does for floats.
    fn write(self, bytes: &mut [u8], value: f64) {
        match self {
            Self::I8 => bytes.copy_from_slice(&(value as i8).to_le_bytes()),
            Self::U8 => bytes.copy_from_slice(&(value as u8).to_le_bytes()),
            Self::I16 => bytes.copy_from_slice(&(value as i16).to_le_bytes()),
            Self::U16 => bytes.copy_from_slice(&(value as u16).to_le_bytes()),
            Self::I32 => bytes.copy_from_slice(&(value as i32).to_le_bytes()),
            Self::U32 => bytes.copy_from_slice(&(value as u32).to_le_bytes()),
            Self::F32 => bytes.copy_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

/// The element layout of a typed accessor.
///
/// `decode` receives a reader for component `k` of the element; matrices are
/// stored column-major, so component `k` of a `Mat3` is column `k / 3`,
/// row `k % 3`.
pub trait Shape {
    const COMPONENTS: usize;
    type Value;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value;
    fn encode(value: &Self::Value, component: impl FnMut(usize, f64));
}

pub enum Scalar {}
pub enum Vec2 {}
pub enum Vec3 {}
pub enum Vec4 {}
pub enum Mat3 {}
pub enum Mat4 {}

impl Shape for Scalar {
    const COMPONENTS: usize = 1;
    type Value = f64;

    fn decode(component: impl Fn(usize) -> f64) -> f64 {
        component(0)
    }

    fn encode(value: &f64, mut component: impl FnMut(usize, f64)) {
        component(0, *value);
    }
}

impl Shape for Vec2 {
    const COMPONENTS: usize = 2;
    type Value = Vector2<f32>;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value {
        Vector2::new(component(0) as f32, component(1) as f32)
    }

    fn encode(value: &Self::Value, mut component: impl FnMut(usize, f64)) {
        component(0, value.x as f64);
        component(1, value.y as f64);
    }
}

impl Shape for Vec3 {
    const COMPONENTS: usize = 3;
    type Value = Vector3<f32>;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value {
        Vector3::new(
            component(0) as f32,
            component(1) as f32,
            component(2) as f32,
        )
    }

    fn encode(value: &Self::Value, mut component: impl FnMut(usize, f64)) {
        let values: &[f32; 3] = value.as_ref();
        for (k, v) in values.iter().enumerate() {
            component(k, *v as f64);
        }
    }
}

impl Shape for Vec4 {
    const COMPONENTS: usize = 4;
    type Value = Vector4<f32>;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value {
        Vector4::new(
            component(0) as f32,
            component(1) as f32,
            component(2) as f32,
            component(3) as f32,
        )
    }

    fn encode(value: &Self::Value, mut component: impl FnMut(usize, f64)) {
        let values: &[f32; 4] = value.as_ref();
        for (k, v) in values.iter().enumerate() {
            component(k, *v as f64);
        }
    }
}

impl Shape for Mat3 {
    const COMPONENTS: usize = 9;
    type Value = Matrix3<f32>;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value {
        let c = |k| component(k) as f32;
        Matrix3::new(c(0), c(1), c(2), c(3), c(4), c(5), c(6), c(7), c(8))
    }

    fn encode(value: &Self::Value, mut component: impl FnMut(usize, f64)) {
        let values: &[f32; 9] = value.as_ref();
        for (k, v) in values.iter().enumerate() {
            component(k, *v as f64);
        }
    }
}

impl Shape for Mat4 {
    const COMPONENTS: usize = 16;
    type Value = Matrix4<f32>;

    fn decode(component: impl Fn(usize) -> f64) -> Self::Value {
        let c = |k| component(k) as f32;
        Matrix4::new(
            c(0),
            c(1),
            c(2),
            c(3),
            c(4),
            c(5),
            c(6),
            c(7),
            c(8),
            c(9),
            c(10),
            c(11),
            c(12),
            c(13),
            c(14),
            c(15),
        )
    }

    fn encode(value: &Self::Value, mut component: impl FnMut(usize, f64)) {
        let values: &[f32; 16] = value.as_ref();
        for (k, v) in values.iter().enumerate() {
            component(k, *v as f64);
        }
    }
}

/// A bounds-checked, typed view over `count` elements of `data`.
///
/// Element `i` starts at `byte_offset + i * stride`, where the stride is the
/// tightly packed element size unless a buffer-view stride overrides it.
/// The whole element range is validated on construction, so element access
/// can only fail for indices `>= count`.
#[derive(Clone, Debug)]
pub struct DataAccessor<B, S> {
    data: B,
    component_type: ComponentType,
    count: usize,
    byte_offset: usize,
    byte_stride: usize,
    shape: PhantomData<S>,
}

/// Bytes spanned by `count` elements of `element_size` bytes placed `stride`
/// bytes apart from `offset`, or `None` if that does not fit in a `usize`.
pub fn extent(offset: usize, count: usize, stride: usize, element_size: usize) -> Option<usize> {
    match count {
        0 => Some(offset),
        n => (n - 1)
            .checked_mul(stride)?
            .checked_add(element_size)?
            .checked_add(offset),
    }
}

pub type ScalarAccessor<B> = DataAccessor<B, Scalar>;
pub type Vec2Accessor<B> = DataAccessor<B, Vec2>;
pub type Vec3Accessor<B> = DataAccessor<B, Vec3>;
pub type Vec4Accessor<B> = DataAccessor<B, Vec4>;
pub type Mat3Accessor<B> = DataAccessor<B, Mat3>;
pub type Mat4Accessor<B> = DataAccessor<B, Mat4>;

impl<B: AsRef<[u8]>, S: Shape> DataAccessor<B, S> {
    pub fn new(
        data: B,
        component_type: ComponentType,
        count: usize,
        byte_offset: usize,
    ) -> Result<Self> {
        let byte_stride = component_type.size() * S::COMPONENTS;
        let accessor = Self {
            data,
            component_type,
            count,
            byte_offset,
            byte_stride,
            shape: PhantomData,
        };
        accessor.check_extent()?;
        Ok(accessor)
    }

    /// Uses `stride` bytes between consecutive elements (interleaved data).
    /// `None` or a stride equal to the packed size keeps the packed layout.
    pub fn with_byte_stride(mut self, stride: Option<usize>) -> Result<Self> {
        if let Some(stride) = stride {
            if stride < self.element_size() {
                return Err(ViewerError::AccessorOverrun {
                    needed: self.element_size(),
                    available: stride,
                });
            }
            self.byte_stride = stride;
            self.check_extent()?;
        }
        Ok(self)
    }

    fn check_extent(&self) -> Result<()> {
        let available = self.data.as_ref().len();
        let needed = extent(self.byte_offset, self.count, self.byte_stride, self.element_size())
            .unwrap_or(usize::MAX);
        if needed > available {
            return Err(ViewerError::AccessorOverrun { needed, available });
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    /// Packed size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.component_type.size() * S::COMPONENTS
    }

    pub fn byte_stride(&self) -> usize {
        self.byte_stride
    }

    fn base(&self, index: usize) -> Result<usize> {
        if index >= self.count {
            return Err(ViewerError::IndexOutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(self.byte_offset + index * self.byte_stride)
    }

    pub fn get(&self, index: usize) -> Result<S::Value> {
        let base = self.base(index)?;
        let size = self.component_type.size();
        let bytes = self.data.as_ref();
        Ok(S::decode(|k| {
            let start = base + k * size;
            self.component_type.read(&bytes[start..start + size])
        }))
    }

    pub fn iter(&self) -> impl Iterator<Item = S::Value> + '_ {
        // Every index below `count` is in range after construction.
        (0..self.count).filter_map(move |i| self.get(i).ok())
    }

    pub fn into_inner(self) -> B {
        self.data
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, S: Shape> DataAccessor<B, S> {
    pub fn set(&mut self, index: usize, value: S::Value) -> Result<()> {
        let base = self.base(index)?;
        let size = self.component_type.size();
        let component_type = self.component_type;
        let bytes = self.data.as_mut();
        S::encode(&value, |k, v| {
            let start = base + k * size;
            component_type.write(&mut bytes[start..start + size], v);
        });
        Ok(())
    }
}
