use clap::Parser;

use gltf_pbr_viewer::ViewerConfig;

fn main() -> anyhow::Result<()> {
    gltf_pbr_viewer::run(ViewerConfig::parse())
}
