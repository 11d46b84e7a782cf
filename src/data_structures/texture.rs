//! GPU textures and texture creation utilities.
//!
//! This module provides [`Texture`], a wrapper around a WGPU texture with its
//! view and sampler, and helpers for the textures the viewer needs: uploaded
//! glTF images, solid-colour defaults, baked cube maps and the depth buffer.

use crate::{
    data_structures::gpu_model::TextureFiltering,
    error::{Result, ViewerError},
    pipelines::mipmap::{MipmapGenerator, mip_level_count},
};

/// A GPU texture with a view and optional sampler.
#[derive(Clone, Debug)]
pub struct Texture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: Option<wgpu::Sampler>,
}

impl Texture {
    /// Standard depth buffer texture format (32-bit float).
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Format of every colour texture the viewer uploads. Images are kept
    /// and shaded in their stored encoding.
    pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    /// Create a depth texture for depth-testing during rendering.
    ///
    /// # Arguments
    ///
    /// * `size` is [width, height] of the texture in pixels
    /// * `label` is used as a debug label for the GPU resource
    pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let size = wgpu::Extent3d {
            width: size[0].max(1),
            height: size[1].max(1),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[Self::DEPTH_FORMAT],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            sampler: None,
        }
    }

    /// Create a default normal map (neutral blue, representing no deformation).
    pub fn create_default_normal_map(device: &wgpu::Device, queue: &wgpu::Queue) -> Texture {
        // The blue/purple-ish colour that represents the default for normal maps
        Self::create_solid(device, queue, [127, 127, 255, 255], "default normal map")
    }

    /// A 1x1 texture of one colour, used wherever a material leaves a slot
    /// empty so the shader never needs a variant without it.
    pub fn create_solid(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        rgba: [u8; 4],
        label: &str,
    ) -> Texture {
        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_level_zero(queue, &texture, &rgba, 1, 1);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = Some(create_sampler(device, TextureFiltering::ClampLinear));
        Texture {
            texture,
            view,
            sampler,
        }
    }

    /// Upload a decoded image.
    ///
    /// With [`TextureFiltering::Mipmapped`] the full mip chain is generated
    /// on the GPU; otherwise the texture has a single level.
    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        mipmaps: &MipmapGenerator,
        image: &image::RgbaImage,
        filtering: TextureFiltering,
        label: &str,
    ) -> Result<Self> {
        let (width, height) = image.dimensions();
        check_texture_size(device, width, height, label)?;
        let mip_level_count = match filtering {
            TextureFiltering::Mipmapped => mip_level_count(width, height),
            TextureFiltering::ClampLinear => 1,
        };
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if mip_level_count > 1 {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: mipmaps.format(),
            usage,
            view_formats: &[],
        });
        write_level_zero(queue, &texture, image.as_raw(), width, height);
        mipmaps.generate(device, queue, &texture);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = Some(create_sampler(device, filtering));
        Ok(Self {
            texture,
            view,
            sampler,
        })
    }

    /// An empty cube texture of `size` x `size` faces with a full mip chain,
    /// ready to be rendered into face by face.
    pub fn create_cube_map(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        size: u32,
        label: &str,
    ) -> Result<Self> {
        let limit = device.limits().max_texture_dimension_2d;
        if size == 0 || size > limit {
            return Err(ViewerError::AllocationFailure {
                resource: "cube map".to_string(),
                model: label.to_string(),
                reason: format!("face size {} outside 1..={}", size, limit),
            });
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: mip_level_count(size, size),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        let sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));
        Ok(Self {
            texture,
            view,
            sampler,
        })
    }
}

fn write_level_zero(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rgba: &[u8],
    width: u32,
    height: u32,
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

pub(crate) fn check_texture_size(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> Result<()> {
    let limit = device.limits().max_texture_dimension_2d;
    if width == 0 || height == 0 || width > limit || height > limit {
        return Err(ViewerError::AllocationFailure {
            resource: "texture".to_string(),
            model: label.to_string(),
            reason: format!("{}x{} is outside 1..={}", width, height, limit),
        });
    }
    Ok(())
}

pub fn create_sampler(device: &wgpu::Device, filtering: TextureFiltering) -> wgpu::Sampler {
    match filtering {
        TextureFiltering::Mipmapped => device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }),
        TextureFiltering::ClampLinear => device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }),
    }
}
