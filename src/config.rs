//! Start-up configuration and the built-in model and sky box catalog.

use std::path::PathBuf;

use clap::Parser;

use crate::pipelines::cube_map::DEFAULT_CUBE_MAP_SIZE;

/// A model or sky box the viewer can switch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub title: &'static str,
    pub url: &'static str,
}

pub const MODELS: [CatalogEntry; 4] = [
    CatalogEntry {
        title: "Boom Box",
        url: "https://raw.githubusercontent.com/KhronosGroup/glTF-Sample-Models/master/2.0/BoomBox/glTF/BoomBox.gltf",
    },
    CatalogEntry {
        title: "Damaged Helmet",
        url: "https://raw.githubusercontent.com/KhronosGroup/glTF-Sample-Models/master/2.0/DamagedHelmet/glTF/DamagedHelmet.gltf",
    },
    CatalogEntry {
        title: "Barramundi Fish",
        url: "https://raw.githubusercontent.com/KhronosGroup/glTF-Sample-Models/master/2.0/BarramundiFish/glTF/BarramundiFish.gltf",
    },
    CatalogEntry {
        title: "Water Bottle",
        url: "https://raw.githubusercontent.com/KhronosGroup/glTF-Sample-Models/master/2.0/WaterBottle/glTF/WaterBottle.gltf",
    },
];

pub const DEFAULT_MODEL: usize = 1;

pub const SKY_BOXES: [CatalogEntry; 4] = [
    CatalogEntry {
        title: "Nissi Beach",
        url: "images/NissiBeach.jpg",
    },
    CatalogEntry {
        title: "Stormy Days",
        url: "images/StormyDays.jpg",
    },
    CatalogEntry {
        title: "Football Field",
        url: "images/FootballField.jpg",
    },
    CatalogEntry {
        title: "Yokohama",
        url: "images/Yokohama.jpg",
    },
];

pub const DEFAULT_SKY_BOX: usize = 3;

pub const DEFAULT_BRDF: &str = "images/brdf.png";

/// glTF 2.0 viewer with image-based PBR lighting
#[derive(Clone, Debug, PartialEq, Parser)]
#[command(name = "gltf-pbr-viewer", version)]
pub struct ViewerConfig {
    /// glTF or GLB document to show first
    #[arg(long, default_value = MODELS[DEFAULT_MODEL].url)]
    pub model: String,

    /// Sky box image in a 4x3 cross layout
    #[arg(long = "sky-box", default_value = SKY_BOXES[DEFAULT_SKY_BOX].url)]
    pub sky_box: String,

    /// BRDF lookup image
    #[arg(long, default_value = DEFAULT_BRDF)]
    pub brdf: String,

    /// Directory that relative URLs are read from
    #[arg(long = "asset-root", default_value = "assets")]
    pub asset_root: PathBuf,

    /// Face size of the environment cube map in pixels
    #[arg(long = "cube-map-size", default_value_t = DEFAULT_CUBE_MAP_SIZE)]
    pub cube_map_size: u32,

    /// Vertical field of view in degrees
    #[arg(long, default_value_t = 45.0)]
    pub fov: f32,

    /// Show models before their textures have arrived
    #[arg(long = "no-wait-for-textures")]
    pub no_wait_for_textures: bool,
}

impl ViewerConfig {
    pub fn wait_for_textures(&self) -> bool {
        !self.no_wait_for_textures
    }

    /// Position of `url` in [`MODELS`], if it is a catalog model.
    pub fn catalog_model(url: &str) -> Option<usize> {
        MODELS.iter().position(|entry| entry.url == url)
    }

    pub fn catalog_sky_box(url: &str) -> Option<usize> {
        SKY_BOXES.iter().position(|entry| entry.url == url)
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model: MODELS[DEFAULT_MODEL].url.to_string(),
            sky_box: SKY_BOXES[DEFAULT_SKY_BOX].url.to_string(),
            brdf: DEFAULT_BRDF.to_string(),
            asset_root: PathBuf::from("assets"),
            cube_map_size: DEFAULT_CUBE_MAP_SIZE,
            fov: 45.0,
            no_wait_for_textures: false,
        }
    }
}
