//! Meltshop Data -- loads plant configuration from RON, TOML, or JSON.
//!
//! The transport core only ever sees a validated [`PlantConfig`]. This
//! crate turns a data file into one, rejecting files that parse but
//! describe an impossible plant.

pub mod loader;

use std::path::Path;

use meltshop_core::config::PlantConfig;
use tracing::info;

pub use loader::{DataLoadError, Format};

/// Base name looked up by [`load_plant_config_from_dir`].
pub const PLANT_FILE: &str = "plant";

/// Parse and validate a plant configuration held in memory.
pub fn parse_plant_config(
    content: &str,
    format: Format,
    origin: &Path,
) -> Result<PlantConfig, DataLoadError> {
    let config: PlantConfig = loader::deserialize_str(content, format, origin)?;
    config.validate().map_err(|source| DataLoadError::Invalid {
        file: origin.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Read, parse and validate a plant configuration file. The format
/// follows the extension.
pub fn load_plant_config(path: &Path) -> Result<PlantConfig, DataLoadError> {
    let format = loader::detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let config = parse_plant_config(&content, format, path)?;
    info!(
        file = %path.display(),
        bays = config.bays.len(),
        cranes_per_bay = config.crane.count_per_bay,
        "plant configuration loaded"
    );
    Ok(config)
}

/// Load `plant.ron`, `plant.toml` or `plant.json` from `dir`.
pub fn load_plant_config_from_dir(dir: &Path) -> Result<PlantConfig, DataLoadError> {
    let path = loader::require_data_file(dir, PLANT_FILE)?;
    load_plant_config(&path)
}
