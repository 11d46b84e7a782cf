//! Viewer data structures: the document model and what is derived from it.
//!
//! - `accessor` reads and writes typed elements in little-endian byte buffers
//! - `document` is the index-based model of a loaded glTF asset
//! - `tangents` derives per-vertex tangent frames and model bounds
//! - `gpu_model` tracks the GPU resources created for one document
//! - `texture` contains the GPU texture wrapper and creation utilities

pub mod accessor;
pub mod document;
pub mod gpu_model;
pub mod tangents;
pub mod texture;
