//! The wgpu implementation of [`ResourceFactory`].

use wgpu::util::DeviceExt;

use crate::{
    data_structures::{
        gpu_model::{BufferRole, ResourceFactory, TextureFiltering},
        texture::{self, Texture},
    },
    error::{Result, ViewerError},
    pipelines::mipmap::MipmapGenerator,
};

/// Creates model resources on one device; `model` names the model in
/// allocation errors.
pub struct WgpuFactory<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub mipmaps: &'a MipmapGenerator,
    pub model: &'a str,
}

impl ResourceFactory for WgpuFactory<'_> {
    type Buffer = wgpu::Buffer;
    type Texture = Texture;

    fn create_buffer(&self, label: &str, contents: &[u8], role: BufferRole) -> Result<wgpu::Buffer> {
        let limit = self.device.limits().max_buffer_size;
        if contents.is_empty() || contents.len() as u64 > limit {
            return Err(ViewerError::AllocationFailure {
                resource: label.to_string(),
                model: self.model.to_string(),
                reason: format!("{} bytes is outside 1..={}", contents.len(), limit),
            });
        }
        let usage = match role {
            BufferRole::Vertex => wgpu::BufferUsages::VERTEX,
            BufferRole::Index => wgpu::BufferUsages::INDEX,
        };
        Ok(self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            }))
    }

    fn create_texture(
        &self,
        label: &str,
        image: &image::RgbaImage,
        filtering: TextureFiltering,
    ) -> Result<Texture> {
        texture::check_texture_size(self.device, image.width(), image.height(), self.model)
            .map_err(|e| match e {
                ViewerError::AllocationFailure { model, reason, .. } => {
                    ViewerError::AllocationFailure {
                        resource: label.to_string(),
                        model,
                        reason,
                    }
                }
                other => other,
            })?;
        Texture::from_image(self.device, self.queue, self.mipmaps, image, filtering, label)
    }
}
