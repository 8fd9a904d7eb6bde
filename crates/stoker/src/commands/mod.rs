//! Command implementations

pub mod bootstrap;
pub mod broker;
pub mod provision;

use std::path::Path;

use anyhow::{Context, Result};

use stoker_core::StokerConfig;

/// Load configuration from the given file, or fall back to defaults plus
/// environment overrides
pub(crate) fn load_config(path: Option<&Path>) -> Result<StokerConfig> {
    match path {
        Some(path) => StokerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(StokerConfig::from_env()),
    }
}
