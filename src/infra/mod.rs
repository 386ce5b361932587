pub mod cli_adapter;
pub mod config;

pub use cli_adapter::ContainerCli;
pub use config::{Manifest, ManifestFormat, load_manifest, parse_manifest};
