//! Cache-wide asset list
//!
//! The registry is the authority on which assets count against the cache:
//! one `source<TAB>asset_type` line per cached asset. Every change rewrites
//! the whole file through a temp file and a rename, so a crash leaves either
//! the old or the new list. Callers must hold the registry lock (see
//! [`AssetRegistry::lock_file`]) around [`AssetRegistry::add_if_absent`]
//! and [`AssetRegistry::remove`].

use super::{AssetRecord, LockFile, GLOBAL_METADATA_DIR, WRITE_LOCK_NAME};
use crate::config::LockSettings;
use crate::error::{StagecacheError, StagecacheResult};
use chrono::Utc;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const ASSET_LIST: &str = "asset_list";

/// One line of the asset list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub source_path: PathBuf,
    pub asset_type: String,
}

impl RegistryEntry {
    fn parse(line: &str) -> Option<Self> {
        let (source, asset_type) = line.split_once('\t')?;
        let (source, asset_type) = (source.trim(), asset_type.trim());
        if source.is_empty() || asset_type.is_empty() {
            return None;
        }
        Some(Self {
            source_path: PathBuf::from(source),
            asset_type: asset_type.to_string(),
        })
    }

    fn render(&self) -> String {
        format!("{}\t{}\n", self.source_path.display(), self.asset_type)
    }
}

/// Fail for a source path the line-based asset list cannot hold
pub(crate) fn check_listable(source_path: &Path) -> StagecacheResult<()> {
    let text = source_path.to_string_lossy();
    if text.contains(['\t', '\n', '\r']) {
        return Err(StagecacheError::InvalidUrl {
            url: format!("{:?}", text),
            reason: "paths with tabs or line breaks cannot be cached".to_string(),
        });
    }
    Ok(())
}

/// Which registered assets to yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFilter {
    All,
    /// Retention has run out; eligible for eviction
    Expired,
    Unexpired,
}

/// The asset list of one cache root
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    root: PathBuf,
    dir: PathBuf,
    file_mode: u32,
}

impl AssetRegistry {
    pub fn new(root: impl Into<PathBuf>, file_mode: u32) -> Self {
        let root = root.into();
        let dir = root.join(GLOBAL_METADATA_DIR);
        Self {
            root,
            dir,
            file_mode,
        }
    }

    pub fn list_path(&self) -> PathBuf {
        self.dir.join(ASSET_LIST)
    }

    /// The registry-wide write lock
    pub fn lock_file(&self, settings: LockSettings) -> LockFile {
        LockFile::new(self.dir.join(WRITE_LOCK_NAME), settings)
    }

    /// Metadata handle for an entry of this cache
    pub fn record(&self, source_path: &Path, asset_type: &str) -> AssetRecord {
        AssetRecord::new(&self.root, source_path, asset_type, self.file_mode)
    }

    /// All entries in list order; empty before the first asset is cached
    pub fn entries(&self) -> StagecacheResult<Vec<RegistryEntry>> {
        let path = self.list_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(StagecacheError::io(
                    format!("reading asset list {}", path.display()),
                    e,
                ))
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let entry = RegistryEntry::parse(line);
                if entry.is_none() {
                    warn!("Skipping malformed asset list line: {:?}", line);
                }
                entry
            })
            .collect())
    }

    /// Records of the registered assets that match `filter` right now
    pub fn records(
        &self,
        filter: RegistryFilter,
    ) -> StagecacheResult<impl Iterator<Item = AssetRecord> + '_> {
        let now = Utc::now().timestamp();
        let entries = self.entries()?;
        Ok(entries
            .into_iter()
            .map(move |entry| self.record(&entry.source_path, &entry.asset_type))
            .filter(move |record| match filter {
                RegistryFilter::All => true,
                RegistryFilter::Expired => record.is_expired(now),
                RegistryFilter::Unexpired => !record.is_expired(now),
            }))
    }

    pub fn contains(&self, source_path: &Path) -> StagecacheResult<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry.source_path == source_path))
    }

    /// Register an asset unless its source path is already listed
    ///
    /// Returns whether an entry was added.
    pub fn add_if_absent(&self, record: &AssetRecord) -> StagecacheResult<bool> {
        check_listable(record.source_path())?;
        let mut entries = self.entries()?;
        if entries
            .iter()
            .any(|entry| entry.source_path == record.source_path())
        {
            return Ok(false);
        }

        entries.push(RegistryEntry {
            source_path: record.source_path().to_path_buf(),
            asset_type: record.asset_type().to_string(),
        });
        self.write_entries(&entries)?;
        debug!("Registered {}", record.source_path().display());
        Ok(true)
    }

    /// Unregister an asset and clear its metadata, returning the freed bytes
    ///
    /// Fails without touching the list when the asset is not registered.
    pub fn remove(&self, record: &AssetRecord) -> StagecacheResult<u64> {
        let entries = self.entries()?;
        let (matched, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.source_path == record.source_path());

        match matched.len() {
            0 => {
                return Err(StagecacheError::Consistency(format!(
                    "{} is not in the asset list",
                    record.source_path().display()
                )))
            }
            1 => {}
            n => warn!(
                "Found {} listings for {}",
                n,
                record.source_path().display()
            ),
        }

        self.write_entries(&kept)?;
        debug!("Unregistered {}", record.source_path().display());
        record.remove()
    }

    fn write_entries(&self, entries: &[RegistryEntry]) -> StagecacheResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| StagecacheError::io(format!("creating {}", self.dir.display()), e))?;

        let path = self.list_path();
        let body: String = entries.iter().map(RegistryEntry::render).collect();
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| StagecacheError::io("creating asset list temp file", e))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| StagecacheError::io(format!("writing {}", path.display()), e))?;
        super::record::set_mode(tmp.path(), self.file_mode)?;
        tmp.persist(&path)
            .map_err(|e| StagecacheError::io(format!("replacing {}", path.display()), e.error))?;
        Ok(())
    }
}
