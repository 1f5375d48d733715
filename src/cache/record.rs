//! Per-asset metadata
//!
//! Each value lives in its own small text file inside the asset's metadata
//! directory. Overwriting or removing a value first appends the old one to
//! the asset's `log`:
//!
//! ```text
//! <metadata file>\t<old mtime>\t<old mtime, human readable>\t<old value>
//! ```

use super::{LockFile, ASSET_METADATA_PREFIX, WRITE_LOCK_NAME};
use crate::config::LockSettings;
use crate::error::{StagecacheError, StagecacheResult};
use chrono::{DateTime, Local, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const SIZE_FILE: &str = "size";
pub(crate) const EXPIRY_FILE: &str = "cache_lock";
const LOG_FILE: &str = "log";

/// Metadata of one asset in one cache
#[derive(Debug, Clone)]
pub struct AssetRecord {
    source_path: PathBuf,
    asset_type: String,
    cached_path: PathBuf,
    metadata_dir: PathBuf,
    file_mode: u32,
}

impl AssetRecord {
    pub fn new(
        cache_root: &Path,
        source_path: impl Into<PathBuf>,
        asset_type: impl Into<String>,
        file_mode: u32,
    ) -> Self {
        let source_path = source_path.into();
        let cached_path = cached_path_for(cache_root, &source_path);
        let name = cached_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "_".to_string());
        let metadata_dir = cached_path
            .parent()
            .unwrap_or(cache_root)
            .join(format!("{}{}", ASSET_METADATA_PREFIX, name));

        Self {
            source_path,
            asset_type: asset_type.into(),
            cached_path,
            metadata_dir,
            file_mode,
        }
    }

    /// Canonical source path identifying the asset
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    /// Where the asset lives inside the cache
    pub fn cached_path(&self) -> &Path {
        &self.cached_path
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// The asset's write lock
    pub fn lock_file(&self, settings: LockSettings) -> LockFile {
        LockFile::new(self.metadata_dir.join(WRITE_LOCK_NAME), settings)
    }

    /// Stored size and the time it was recorded
    ///
    /// `None` means the asset is not cached; missing and malformed metadata
    /// both count as not cached.
    pub fn size_and_mtime(&self) -> Option<(u64, DateTime<Utc>)> {
        let (size, mtime) = self.read_value(SIZE_FILE)?;
        match u64::try_from(size) {
            Ok(size) => Some((size, DateTime::<Utc>::from(mtime))),
            Err(_) => {
                warn!("Negative size recorded for {}", self.source_path.display());
                None
            }
        }
    }

    /// Stored size, zero when not cached
    pub fn size(&self) -> u64 {
        self.size_and_mtime().map_or(0, |(size, _)| size)
    }

    /// Expiry as a unix timestamp
    pub fn expiry(&self) -> Option<i64> {
        self.read_value(EXPIRY_FILE).map(|(expiry, _)| expiry)
    }

    pub fn set_size(&self, size: u64) -> StagecacheResult<()> {
        self.write_value(SIZE_FILE, size as i64)
    }

    pub fn set_expiry(&self, expiry: i64) -> StagecacheResult<()> {
        self.write_value(EXPIRY_FILE, expiry)
    }

    /// Whether the retention has run out at `now`
    ///
    /// An asset without a readable expiry counts as expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry().map_or(true, |expiry| expiry <= now)
    }

    /// Archive and delete the size and expiry, returning the freed bytes
    ///
    /// Only call while holding the asset's lock. The log is kept.
    pub fn remove(&self) -> StagecacheResult<u64> {
        let size = self.size();
        for name in [SIZE_FILE, EXPIRY_FILE] {
            let path = self.metadata_dir.join(name);
            self.archive(name)?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StagecacheError::io(format!("removing {}", path.display()), e))
                }
            }
        }
        debug!(
            "Removed metadata for {} ({} bytes)",
            self.source_path.display(),
            size
        );
        Ok(size)
    }

    fn read_value(&self, name: &str) -> Option<(i64, SystemTime)> {
        let path = self.metadata_dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };

        let value = content.lines().next().map(str::trim).and_then(|v| v.parse().ok());
        let mtime = fs::metadata(&path).and_then(|meta| meta.modified()).ok();
        match (value, mtime) {
            (Some(value), Some(mtime)) => Some((value, mtime)),
            _ => {
                warn!("Ignoring malformed metadata file {}", path.display());
                None
            }
        }
    }

    fn write_value(&self, name: &str, value: i64) -> StagecacheResult<()> {
        fs::create_dir_all(&self.metadata_dir).map_err(|e| {
            StagecacheError::io(format!("creating {}", self.metadata_dir.display()), e)
        })?;
        self.archive(name)?;

        let path = self.metadata_dir.join(name);
        let mut tmp = NamedTempFile::new_in(&self.metadata_dir)
            .map_err(|e| StagecacheError::io("creating metadata temp file", e))?;
        tmp.write_all(value.to_string().as_bytes())
            .map_err(|e| StagecacheError::io(format!("writing {}", path.display()), e))?;
        set_mode(tmp.path(), self.file_mode)?;
        tmp.persist(&path)
            .map_err(|e| StagecacheError::io(format!("replacing {}", path.display()), e.error))?;

        debug!("Set {} = {} for {}", name, value, self.source_path.display());
        Ok(())
    }

    /// Append the current value of `name` to the log, returning it
    fn archive(&self, name: &str) -> StagecacheResult<Option<i64>> {
        let Some((value, mtime)) = self.read_value(name) else {
            return Ok(None);
        };

        let mtime = DateTime::<Utc>::from(mtime);
        let line = format!(
            "{}\t{}\t{}\t{}\n",
            self.metadata_dir.join(name).display(),
            mtime.timestamp(),
            mtime.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y"),
            value
        );

        let log_path = self.metadata_dir.join(LOG_FILE);
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| StagecacheError::io(format!("opening {}", log_path.display()), e))?;
        log.write_all(line.as_bytes())
            .map_err(|e| StagecacheError::io(format!("writing {}", log_path.display()), e))?;

        Ok(Some(value))
    }
}

/// `<cache_root>/<source path>`, dropping `.`, `..` and the leading `/`
pub fn cached_path_for(cache_root: &Path, source_path: &Path) -> PathBuf {
    source_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .fold(cache_root.to_path_buf(), |path, part| path.join(part))
}

/// Apply permission bits to a cached file or metadata file
pub(crate) fn set_mode(path: &Path, mode: u32) -> StagecacheResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| StagecacheError::io(format!("setting mode on {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
