//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{ConfigManager, LoadedConfig, GLOBAL_CONFIG_PATH};
use crate::error::StagecacheResult;

/// Execute the config command
pub fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    loaded: &LoadedConfig,
) -> StagecacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => {
            println!("{}", toml::to_string_pretty(&loaded.config)?);
        }
        Some(ConfigAction::Path) => {
            println!("global: {}", GLOBAL_CONFIG_PATH);
            println!(
                "cache:  {}",
                ConfigManager::cache_config_path(&loaded.cache.root).display()
            );
            println!("user:   {}", manager.path().display());
        }
    }
    Ok(())
}
