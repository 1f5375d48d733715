//! Configuration management for stagecache
//!
//! Settings are layered, later files overriding earlier ones key by key:
//!
//! 1. built-in defaults
//! 2. global config: `/etc/stagecache.d/config.toml`
//! 3. cache config: `<cache_root>/.cache.global/config.toml`
//! 4. user config: `~/.config/stagecache/config.toml` (or `--config`)

pub mod schema;

pub use schema::{CacheConfig, Config, FileMode, LockSettings, RemoteConfig};

use crate::cache::GLOBAL_METADATA_DIR;
use crate::error::{StagecacheError, StagecacheResult};
use std::fs;
use std::path::{Path, PathBuf};
use toml::Table;
use tracing::{debug, info};

/// System-wide configuration file
pub const GLOBAL_CONFIG_PATH: &str = "/etc/stagecache.d/config.toml";

/// File name of the per-cache configuration inside the global metadata dir
pub const CACHE_CONFIG_NAME: &str = "config.toml";

/// Merged configuration plus the settings of the selected cache
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub cache: CacheConfig,
}

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    global_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default paths
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            global_path: PathBuf::from(GLOBAL_CONFIG_PATH),
        }
    }

    /// Create a config manager with a custom user config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            global_path: PathBuf::from(GLOBAL_CONFIG_PATH),
        }
    }

    /// Override the global config path
    pub fn with_global_path(mut self, path: PathBuf) -> Self {
        self.global_path = path;
        self
    }

    /// Get the default user config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagecache")
            .join("config.toml")
    }

    /// Path of the per-cache config file for a cache root
    pub fn cache_config_path(cache_root: &Path) -> PathBuf {
        cache_root.join(GLOBAL_METADATA_DIR).join(CACHE_CONFIG_NAME)
    }

    /// Load the merged configuration and resolve the selected cache
    ///
    /// The cache root must be known before its own config file can be read,
    /// so selection runs on the global and user layers first.
    pub fn load(&self, cache: Option<&str>) -> StagecacheResult<LoadedConfig> {
        let global = load_table(&self.global_path)?;
        let user = load_table(&self.config_path)?;

        let mut outer = global.clone();
        merge_tables(&mut outer, user.clone());
        let outer_config = parse_config(outer, &self.config_path)?;
        let (_, root) = outer_config.select_cache(cache);

        let cache_path = Self::cache_config_path(&root);
        let mut cache_table = load_table(&cache_path)?;
        // Named caches only make sense in global and user configs
        cache_table.remove("caches");

        let mut merged = global;
        merge_tables(&mut merged, cache_table);
        merge_tables(&mut merged, user);
        let config = parse_config(merged, &cache_path)?;

        let selector = cache.map(str::to_string).unwrap_or_else(|| root.display().to_string());
        let cache = config.cache_config(Some(&selector))?;
        info!("Loaded config for {}", cache.root.display());
        debug!("{:?}", cache);

        Ok(LoadedConfig { config, cache })
    }

    /// Get the user config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a TOML file into a table; a missing file is an empty table
fn load_table(path: &Path) -> StagecacheResult<Table> {
    if !path.exists() {
        debug!("Skipping missing config file {}", path.display());
        return Ok(Table::new());
    }

    debug!("Loading config from {}", path.display());
    let content = fs::read_to_string(path)
        .map_err(|e| StagecacheError::io(format!("reading config from {}", path.display()), e))?;

    content
        .parse::<Table>()
        .map_err(|e| schema::invalid(path, e.to_string()))
}

fn parse_config(table: Table, path: &Path) -> StagecacheResult<Config> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| schema::invalid(path, e.to_string()))
}

/// Recursively merge `overlay` into `base`; overlay values win
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
