//! Staging assets into a cache
//!
//! [`CacheEngine::stage`] is the only path that copies into the cache:
//!
//! 1. validate the retention (negative needs `force`, purge needs both)
//! 2. take the asset's lock
//! 3. compare the cached copy's recorded time with the source mtime
//! 4. stale: take the registry lock, make room, copy, record size and expiry
//! 5. fresh: push the expiry out if the new one is later
//!
//! Locks are scoped guards, so every exit path releases them.

use super::report::{AssetState, AssetSummary, CacheReport, InspectOptions};
use super::{AssetRecord, AssetRegistry, EvictionPolicy, RegistryFilter, GLOBAL_METADATA_DIR};
use crate::config::CacheConfig;
use crate::error::{StagecacheError, StagecacheResult};
use crate::target::{AssetTypes, Target};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-call staging options
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    /// Retention; the cache default when `None`
    pub retention: Option<Duration>,
    /// Break locks and copy even if the cached copy is current
    pub force: bool,
    /// With `force` and a negative retention, remove the asset
    pub purge: bool,
    /// Wait for locks but change nothing
    pub dry_run: bool,
}

/// What staging did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Copied,
    Extended,
    Unchanged,
    Purged,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Copied => "copied",
            Self::Extended => "extended",
            Self::Unchanged => "unchanged",
            Self::Purged => "purged",
        };
        f.write_str(label)
    }
}

/// Result of [`CacheEngine::stage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    /// Location of the asset inside the cache
    pub path: PathBuf,
    pub outcome: StageOutcome,
}

/// Cache engine for one cache root
pub struct CacheEngine {
    config: CacheConfig,
    registry: AssetRegistry,
    asset_types: AssetTypes,
}

impl CacheEngine {
    /// Open the cache at `config.root`, creating it if needed
    pub fn new(config: CacheConfig, asset_types: AssetTypes) -> StagecacheResult<Self> {
        let metadata_dir = config.root.join(GLOBAL_METADATA_DIR);
        fs::create_dir_all(&metadata_dir).map_err(|e| {
            StagecacheError::io(format!("creating cache {}", config.root.display()), e)
        })?;
        debug!("Opened cache at {}", config.root.display());

        Ok(Self {
            registry: AssetRegistry::new(&config.root, config.file_mode),
            config,
            asset_types,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn asset_types(&self) -> &AssetTypes {
        &self.asset_types
    }

    pub fn eviction(&self) -> EvictionPolicy<'_> {
        EvictionPolicy::new(&self.registry, &self.config, &self.asset_types)
    }

    /// Metadata handle for `target` in this cache
    pub fn record_for(&self, target: &dyn Target) -> AssetRecord {
        self.registry
            .record(target.source_path(), &target.asset_type().name)
    }

    /// Bring `target` into the cache and return where it lives
    pub fn stage(&self, target: &dyn Target, options: &StageOptions) -> StagecacheResult<Staged> {
        let retention = options.retention.unwrap_or(self.config.default_retention);
        super::registry::check_listable(target.source_path())?;
        let record = self.record_for(target);

        if retention < Duration::zero() {
            if !options.force {
                return Err(StagecacheError::NegativeRetentionWithoutForce);
            }
            if options.purge {
                return self.purge(&record, options);
            }
        } else if options.purge {
            return Err(StagecacheError::PurgeWithoutNegativeRetention);
        }

        let _asset_lock = record
            .lock_file(self.config.lock)
            .acquire(options.force, options.dry_run)?;

        let cached_mtime = record.size_and_mtime().map(|(_, mtime)| mtime);
        let source_mtime = target.mtime()?;
        let expiry = expiry_after(retention)?;

        let outcome = if options.force || cached_mtime.map_or(true, |m| m < source_mtime) {
            debug!(
                "{} is stale (cached {:?}, source {})",
                target.source_path().display(),
                cached_mtime,
                source_mtime
            );
            self.copy_in(target, &record, expiry, options)?;
            StageOutcome::Copied
        } else if record.expiry().map_or(true, |current| current < expiry) {
            info!(
                "{} is already cached, extending expiry to {}",
                target.source_path().display(),
                format_timestamp(expiry)
            );
            if !options.dry_run {
                record.set_expiry(expiry)?;
            }
            StageOutcome::Extended
        } else {
            warn!(
                "{} is already cached with a later expiry; use --force to change it",
                target.source_path().display()
            );
            StageOutcome::Unchanged
        };

        Ok(Staged {
            path: record.cached_path().to_path_buf(),
            outcome,
        })
    }

    fn copy_in(
        &self,
        target: &dyn Target,
        record: &AssetRecord,
        expiry: i64,
        options: &StageOptions,
    ) -> StagecacheResult<()> {
        let _registry_lock = self
            .registry
            .lock_file(self.config.lock)
            .acquire(options.force, options.dry_run)?;

        let size = target.size()?;
        self.eviction().reclaim(size, Some(record), options.dry_run)?;
        target.copy_to(record.cached_path(), self.config.file_mode, options.dry_run)?;

        if !options.dry_run {
            self.registry.add_if_absent(record)?;
            record.set_size(size)?;
            record.set_expiry(expiry)?;
            info!(
                "Cached {} ({} bytes) until {}",
                target.source_path().display(),
                size,
                format_timestamp(expiry)
            );
        }
        Ok(())
    }

    fn purge(&self, record: &AssetRecord, options: &StageOptions) -> StagecacheResult<Staged> {
        let _asset_lock = record
            .lock_file(self.config.lock)
            .acquire(options.force, options.dry_run)?;
        let _registry_lock = self
            .registry
            .lock_file(self.config.lock)
            .acquire(false, options.dry_run)?;

        // An unregistered asset fails here with a consistency error
        self.eviction().evict_asset(record, options.dry_run)?;

        Ok(Staged {
            path: record.cached_path().to_path_buf(),
            outcome: StageOutcome::Purged,
        })
    }

    /// Report usage; optionally clear a stuck registry lock or purge
    /// expired assets
    pub fn inspect(&self, options: &InspectOptions) -> StagecacheResult<CacheReport> {
        let registry_lock = self.registry.lock_file(self.config.lock);
        if options.force && registry_lock.break_lock()? {
            warn!("Removed registry lock {}", registry_lock.path().display());
        }
        let _registry_lock = if options.purge {
            Some(registry_lock.acquire(false, options.dry_run)?)
        } else {
            None
        };

        let now = Utc::now().timestamp();
        let eviction = self.eviction();
        let mut seen = BTreeSet::new();
        let mut assets = vec![];
        let mut used = 0;

        for record in self.registry.records(RegistryFilter::All)? {
            if !seen.insert(record.source_path().to_path_buf()) {
                warn!("Duplicate listing for {}", record.source_path().display());
                continue;
            }

            let size = record.size();
            let expiry = record.expiry();
            let mut state = if record.is_expired(now) {
                AssetState::Expired
            } else {
                AssetState::Active
            };

            if options.purge && state == AssetState::Expired {
                match record.lock_file(self.config.lock).try_acquire(options.dry_run)? {
                    Some(_guard) => {
                        eviction.evict_asset(&record, options.dry_run)?;
                        state = if options.dry_run {
                            AssetState::ToBePurged
                        } else {
                            AssetState::Purged
                        };
                    }
                    None => debug!("Not purging busy asset {}", record.source_path().display()),
                }
            }

            if state != AssetState::Purged {
                used += size;
            }
            assets.push(AssetSummary {
                source: record.source_path().to_path_buf(),
                asset_type: record.asset_type().to_string(),
                size,
                expiry: expiry.and_then(|e| DateTime::from_timestamp(e, 0)),
                state,
            });
        }

        let free = match self.config.capacity {
            Some(capacity) => capacity.saturating_sub(used),
            None => super::evict::filesystem_free(&self.config.root)?,
        };
        debug!(
            "{} bytes used by {} asset(s), {} bytes free",
            used,
            assets.len(),
            free
        );

        Ok(CacheReport {
            root: self.config.root.clone(),
            used,
            free,
            capacity: self.config.capacity,
            assets,
        })
    }
}

/// Unix time `retention` from now
fn expiry_after(retention: Duration) -> StagecacheResult<i64> {
    Utc::now()
        .checked_add_signed(retention)
        .map(|t| t.timestamp())
        .ok_or_else(|| StagecacheError::InvalidRetention(format!("{}s", retention.num_seconds())))
}

fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
