//! CLI command implementations

pub mod config;
pub mod manage;
pub mod stage;
pub mod status;

pub use config::execute as config;
pub use manage::execute as manage;
pub use stage::execute as stage;
pub use status::execute as status;

use crate::cache::CacheEngine;
use crate::config::LoadedConfig;
use crate::error::StagecacheResult;
use crate::target::AssetTypes;

/// Open the selected cache with the configured asset types
fn open_engine(loaded: &LoadedConfig) -> StagecacheResult<CacheEngine> {
    let asset_types = AssetTypes::from_config(&loaded.config.asset_types)?;
    CacheEngine::new(loaded.cache.clone(), asset_types)
}
