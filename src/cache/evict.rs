//! Space accounting and eviction
//!
//! Only expired assets whose lock is free are eviction candidates. They are
//! removed most recently expired first until strictly more than the
//! requested space is available.

use super::{AssetRecord, AssetRegistry, LockGuard, RegistryFilter};
use crate::config::CacheConfig;
use crate::error::{StagecacheError, StagecacheResult};
use crate::target::{AssetTypes, LocalFs};
use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of an eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub removed: usize,
    pub freed: u64,
}

/// Eviction over one cache; the caller holds the registry lock
pub struct EvictionPolicy<'a> {
    registry: &'a AssetRegistry,
    config: &'a CacheConfig,
    asset_types: &'a AssetTypes,
}

struct Candidate {
    record: AssetRecord,
    size: u64,
    expiry: i64,
    // None for the asset whose lock the caller already holds
    _guard: Option<LockGuard>,
}

impl<'a> EvictionPolicy<'a> {
    pub fn new(
        registry: &'a AssetRegistry,
        config: &'a CacheConfig,
        asset_types: &'a AssetTypes,
    ) -> Self {
        Self {
            registry,
            config,
            asset_types,
        }
    }

    /// Sum of recorded sizes over registered assets
    pub fn used_space(&self) -> StagecacheResult<u64> {
        Ok(self
            .registry
            .records(RegistryFilter::All)?
            .map(|record| record.size())
            .sum())
    }

    /// Bytes still available to the cache
    pub fn free_space(&self) -> StagecacheResult<u64> {
        match self.config.capacity {
            Some(capacity) => Ok(capacity.saturating_sub(self.used_space()?)),
            None => filesystem_free(&self.config.root),
        }
    }

    /// Make room for `needed` bytes
    ///
    /// `held` is an asset whose lock the caller already holds, usually the
    /// one being replaced; it is a candidate like any other expired asset.
    /// Fails without removing anything when evicting every candidate would
    /// still not be enough.
    pub fn reclaim(
        &self,
        needed: u64,
        held: Option<&AssetRecord>,
        dry_run: bool,
    ) -> StagecacheResult<Reclaimed> {
        let free = self.free_space()?;
        debug!("Need {} bytes, {} bytes free", needed, free);
        if needed <= free {
            return Ok(Reclaimed::default());
        }

        let mut candidates = self.candidates(held, dry_run)?;
        let reclaimable: u64 = candidates.iter().map(|c| c.size).sum();
        debug!(
            "{} expired asset(s) hold {} reclaimable bytes",
            candidates.len(),
            reclaimable
        );
        if free.saturating_add(reclaimable) < needed {
            return Err(StagecacheError::InsufficientSpace {
                needed,
                available: free.saturating_add(reclaimable),
            });
        }

        // Most recently expired first; ties keep registry order
        candidates.sort_by_key(|c| Reverse(c.expiry));

        let mut reclaimed = Reclaimed::default();
        for candidate in &candidates {
            reclaimed.freed += self.evict_asset(&candidate.record, dry_run)?;
            reclaimed.removed += 1;
            if free + reclaimed.freed > needed {
                break;
            }
        }

        info!(
            "Removed {} asset(s) to free {} bytes",
            reclaimed.removed, reclaimed.freed
        );
        Ok(reclaimed)
    }

    /// Expired assets whose lock could be taken, each holding its lock
    fn candidates(
        &self,
        held: Option<&AssetRecord>,
        dry_run: bool,
    ) -> StagecacheResult<Vec<Candidate>> {
        let mut candidates = vec![];
        for record in self.registry.records(RegistryFilter::Expired)? {
            let guard = if held.is_some_and(|h| h.source_path() == record.source_path()) {
                debug!("{} is locked by this caller", record.source_path().display());
                None
            } else {
                let lock = record.lock_file(self.config.lock);
                let Some(guard) = lock.try_acquire(dry_run)? else {
                    debug!("Skipping busy asset {}", record.source_path().display());
                    continue;
                };
                Some(guard)
            };
            candidates.push(Candidate {
                size: record.size(),
                expiry: record.expiry().unwrap_or(i64::MIN),
                record,
                _guard: guard,
            });
        }
        Ok(candidates)
    }

    /// Delete an asset's cached files and unregister it, returning its size
    ///
    /// The caller holds the asset's lock.
    pub fn evict_asset(&self, record: &AssetRecord, dry_run: bool) -> StagecacheResult<u64> {
        info!("Removing {}", record.source_path().display());
        if dry_run {
            if !self.registry.contains(record.source_path())? {
                return Err(StagecacheError::Consistency(format!(
                    "{} is not in the asset list",
                    record.source_path().display()
                )));
            }
            return Ok(record.size());
        }

        let asset_type = self.asset_types.get_or_file(record.asset_type());
        if asset_type.name != record.asset_type() {
            warn!(
                "Unknown asset type '{}' for {}, removing it as a single file",
                record.asset_type(),
                record.source_path().display()
            );
        }

        let files: Vec<PathBuf> = match asset_type.collect_existing(&LocalFs, record.cached_path()) {
            Ok(files) => files.into_keys().collect(),
            Err(StagecacheError::EmptyAsset { .. }) => {
                warn!(
                    "No cached files left for {}",
                    record.source_path().display()
                );
                vec![]
            }
            Err(e) => return Err(e),
        };
        for file in files {
            remove_file(&file)?;
        }

        self.registry.remove(record)
    }
}

fn remove_file(path: &Path) -> StagecacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StagecacheError::io(format!("deleting {}", path.display()), e)),
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`
#[cfg(unix)]
pub fn filesystem_free(path: &Path) -> StagecacheResult<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        StagecacheError::io(
            format!("checking free space on {}", path.display()),
            std::io::Error::new(ErrorKind::InvalidInput, e),
        )
    })?;

    // SAFETY: statvfs is plain old data and c_path is NUL-terminated
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(StagecacheError::io(
            format!("checking free space on {}", path.display()),
            std::io::Error::last_os_error(),
        ));
    }

    #[allow(clippy::unnecessary_cast)]
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    Ok(free)
}

#[cfg(not(unix))]
pub fn filesystem_free(_path: &Path) -> StagecacheResult<u64> {
    Ok(u64::MAX)
}
