//! Sources that can be staged into a cache
//!
//! The cache engine only needs four things from a source: an identifying
//! path, its asset type, its modification time and size, and a way to copy
//! it into the cache. Local paths and remote hosts provide them through
//! [`Target`].

pub mod asset_type;
pub mod local;
pub mod remote;
pub mod url;

pub use asset_type::{AssetType, AssetTypes};
pub use local::{LocalFs, LocalTarget};
pub use remote::{RemoteTarget, SshFs};
pub use url::resolve_target;

use crate::error::StagecacheResult;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A stageable asset
pub trait Target: Send + Sync {
    /// Path identifying the asset; the cached copy lives at
    /// `<cache_root>/<source_path>`
    fn source_path(&self) -> &Path;

    fn asset_type(&self) -> &AssetType;

    /// Latest modification time over the asset's files
    fn mtime(&self) -> StagecacheResult<DateTime<Utc>>;

    /// Total size of the asset's files in bytes
    fn size(&self) -> StagecacheResult<u64>;

    /// Copy every file of the asset under `dest`, applying `file_mode`
    fn copy_to(&self, dest: &Path, file_mode: u32, dry_run: bool) -> StagecacheResult<()>;
}

/// Size and modification time of one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Minimal filesystem view used to collect asset files
pub trait SourceFs {
    /// Stat a regular file, following symlinks; `None` if it does not exist
    fn stat(&self, path: &Path) -> StagecacheResult<Option<FileStat>>;

    /// Regular files directly inside `dir`; empty if `dir` does not exist
    fn list_dir(&self, dir: &Path) -> StagecacheResult<Vec<(String, FileStat)>>;
}

/// Files of an asset with their combined size and latest mtime
#[derive(Debug, Clone)]
pub struct Inventory {
    pub files: BTreeMap<PathBuf, FileStat>,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

impl Inventory {
    pub fn collect(
        fs: &dyn SourceFs,
        asset_type: &AssetType,
        prefix: &Path,
    ) -> StagecacheResult<Self> {
        let files = asset_type.collect(fs, prefix)?;
        let mtime = files
            .values()
            .map(|stat| stat.mtime)
            .max()
            .unwrap_or(DateTime::UNIX_EPOCH);
        let size = files.values().map(|stat| stat.size).sum();
        Ok(Self { files, mtime, size })
    }
}

/// Inventory computed on first use
#[derive(Debug, Default)]
pub(crate) struct LazyInventory(OnceLock<Inventory>);

impl LazyInventory {
    pub(crate) fn get_or_collect(
        &self,
        fs: &dyn SourceFs,
        asset_type: &AssetType,
        prefix: &Path,
    ) -> StagecacheResult<&Inventory> {
        if let Some(inventory) = self.0.get() {
            return Ok(inventory);
        }
        let inventory = Inventory::collect(fs, asset_type, prefix)?;
        Ok(self.0.get_or_init(|| inventory))
    }
}

/// Destination of `file` when the asset at `source_prefix` is copied to
/// `dest_prefix`
pub(crate) fn relocate(file: &Path, source_prefix: &Path, dest_prefix: &Path) -> PathBuf {
    let file = file.to_string_lossy();
    let source = source_prefix.to_string_lossy();
    let rest = file.strip_prefix(source.as_ref()).unwrap_or(&file);
    asset_type::with_suffix(dest_prefix, rest)
}
