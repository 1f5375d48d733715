//! Cache engine for staged assets
//!
//! Assets are copied to `<cache_root>/<source path>`. Metadata lives next to
//! each cached asset and in a cache-wide directory:
//!
//! | Path | Contents |
//! |------|----------|
//! | `.cache.global/asset_list` | `source<TAB>asset_type` per cached asset |
//! | `.cache.global/write_lock` | registry lock sentinel |
//! | `<dir>/.cache.<name>/size` | size of the cached asset in bytes |
//! | `<dir>/.cache.<name>/cache_lock` | expiry as a unix timestamp |
//! | `<dir>/.cache.<name>/write_lock` | asset lock sentinel |
//! | `<dir>/.cache.<name>/log` | superseded size and expiry values |
//!
//! # Concurrency
//!
//! Independent processes share one cache root and coordinate only through
//! sentinel files. An asset's lock serializes staging of that asset; the
//! registry lock serializes every change to the asset list and every
//! eviction.

pub mod engine;
pub mod evict;
pub mod lock;
pub mod manage;
pub mod record;
pub mod registry;
pub mod report;

pub use engine::{CacheEngine, StageOptions, StageOutcome, Staged};
pub use evict::{EvictionPolicy, Reclaimed};
pub use lock::{LockFile, LockGuard};
pub use manage::FreedSpace;
pub use record::AssetRecord;
pub use registry::{AssetRegistry, RegistryEntry, RegistryFilter};
pub use report::{format_bytes, gb_to_bytes, AssetState, AssetSummary, CacheReport, InspectOptions};

/// Cache-wide metadata directory under the cache root
pub const GLOBAL_METADATA_DIR: &str = ".cache.global";

/// Prefix of per-asset metadata directories
pub const ASSET_METADATA_PREFIX: &str = ".cache.";

/// Name of every lock sentinel
pub const WRITE_LOCK_NAME: &str = "write_lock";
