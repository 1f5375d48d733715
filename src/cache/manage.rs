//! Maintenance operations on a cache

use super::record::EXPIRY_FILE;
use super::{CacheEngine, RegistryFilter, ASSET_METADATA_PREFIX, GLOBAL_METADATA_DIR};
use crate::error::{StagecacheError, StagecacheResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Assets removed by [`CacheEngine::free_bytes`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreedSpace {
    pub removed: Vec<PathBuf>,
    pub freed: u64,
}

impl CacheEngine {
    /// Delete assets, earliest expiry first, until more than `needed` bytes
    /// are freed
    ///
    /// Unlike eviction this ignores retention. With `suffix`, only assets
    /// whose cached path ends with it are considered. Assets in use are
    /// skipped.
    pub fn free_bytes(
        &self,
        needed: u64,
        suffix: Option<&str>,
        dry_run: bool,
    ) -> StagecacheResult<FreedSpace> {
        let _registry_lock = self
            .registry()
            .lock_file(self.config().lock)
            .acquire(false, dry_run)?;

        let mut records: Vec<_> = self
            .registry()
            .records(RegistryFilter::All)?
            .filter(|record| {
                suffix.map_or(true, |s| record.cached_path().to_string_lossy().ends_with(s))
            })
            .collect();
        records.sort_by_key(|record| record.expiry().unwrap_or(i64::MIN));

        let eviction = self.eviction();
        let mut freed = FreedSpace::default();
        for record in records {
            if freed.freed > needed {
                break;
            }
            let Some(_guard) = record
                .lock_file(self.config().lock)
                .try_acquire(dry_run)?
            else {
                info!("Skipping {}: in use", record.source_path().display());
                continue;
            };
            freed.freed += eviction.evict_asset(&record, dry_run)?;
            freed.removed.push(record.source_path().to_path_buf());
        }

        info!(
            "Removed {} asset(s), {} bytes",
            freed.removed.len(),
            freed.freed
        );
        Ok(freed)
    }

    /// Source paths of assets with metadata on disk but no registry entry
    pub fn find_unlisted_assets(&self) -> StagecacheResult<Vec<PathBuf>> {
        let listed: BTreeSet<PathBuf> = self
            .registry()
            .entries()?
            .into_iter()
            .map(|entry| entry.source_path)
            .collect();

        let mut unlisted = vec![];
        let mut walker = WalkDir::new(self.root()).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                StagecacheError::io(format!("scanning {}", self.root().display()), e.into())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            let Some(asset_name) = name.strip_prefix(ASSET_METADATA_PREFIX) else {
                continue;
            };
            walker.skip_current_dir();
            if name == GLOBAL_METADATA_DIR || !entry.path().join(EXPIRY_FILE).exists() {
                continue;
            }

            let cached = entry.path().with_file_name(asset_name);
            if let Some(source) = source_for(self.root(), &cached) {
                if !listed.contains(&source) {
                    debug!("Unlisted asset {}", source.display());
                    unlisted.push(source);
                }
            }
        }

        Ok(unlisted)
    }
}

/// Invert `<root>/<source>` back to `/<source>`
fn source_for(root: &Path, cached: &Path) -> Option<PathBuf> {
    cached
        .strip_prefix(root)
        .ok()
        .map(|rel| Path::new("/").join(rel))
}
