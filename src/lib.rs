//! gltf-pbr-viewer
//!
//! A glTF 2.0 viewer that shades models with image-based PBR lighting from
//! a sky box environment. It runs natively and in the browser (WASM) on top
//! of wgpu.
//!
//! High-level modules
//! - `app`: window, event loop and asynchronous loading
//! - `camera`: the orbit camera driven by mouse drag and wheel
//! - `config`: command line options and the sample catalog
//! - `context`: surface, device, queue and depth target of the window
//! - `data_structures`: the glTF document model, typed accessors, tangent
//!   derivation and the GPU-side model state
//! - `error`: the error taxonomy shared by loading and rendering
//! - `pipelines`: the model, sky box, cube map and mipmap pipelines
//! - `resources`: fetching and loading documents, uploading to the GPU
//! - `render`: draw planning and per-frame model rendering
//!

pub mod app;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod pipelines;
pub mod render;
pub mod resources;

pub use app::run;
pub use config::ViewerConfig;
pub use error::ViewerError;
