//! Configuration schema for stagecache
//!
//! User configuration is stored at `~/.config/stagecache/config.toml`

use crate::error::{StagecacheError, StagecacheResult};
use crate::retention::parse_retention;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default cache settings
    pub cache: CacheSection,

    /// Named caches, selectable with `--cache <name>`
    pub caches: BTreeMap<String, NamedCache>,

    /// Lock polling and timeouts
    pub lock: LockConfig,

    /// Remote source settings
    pub remote: RemoteConfig,

    /// Additional or overriding asset types
    pub asset_types: BTreeMap<String, AssetTypeConfig>,
}

/// Default cache settings, used for any cache without explicit values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Cache root directory
    pub root: Option<PathBuf>,

    /// Fixed cache capacity in bytes (filesystem free space if unset)
    pub size: Option<u64>,

    /// Default retention, SLURM format `[days-]hours:minutes[:seconds]`
    pub time: String,

    /// Mode applied to cached files and metadata
    pub file_mode: FileMode,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            root: None,
            size: None,
            time: "1-0:00".to_string(),
            file_mode: FileMode::default(),
        }
    }
}

/// A named cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCache {
    pub root: PathBuf,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub file_mode: Option<FileMode>,
}

/// Lock file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Interval between lock polls in milliseconds
    pub poll_interval_ms: u64,

    /// Give up waiting after this many seconds (0 = wait forever)
    pub timeout_secs: u64,

    /// Treat locks older than this many seconds as abandoned (0 = never)
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            timeout_secs: 0,
            stale_after_secs: 0,
        }
    }
}

/// Remote source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Rewrites from local mount paths to remote hosts
    pub mappings: Vec<RemoteMapping>,

    /// Usernames per host; the `default` key applies to unlisted hosts
    pub users: BTreeMap<String, String>,

    /// SSH client used for remote inventory
    pub ssh_command: String,

    /// rsync binary used for remote copies
    pub rsync_command: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mappings: vec![],
            users: BTreeMap::new(),
            ssh_command: "ssh".to_string(),
            rsync_command: "rsync".to_string(),
        }
    }
}

/// Regex rewrite from a local path to a remote host and path
///
/// ```toml
/// [[remote.mappings]]
/// pattern = "/mnt/(nas_[^/]+)/(.+)"
/// host_repl = "${1}.example.edu"
/// path_repl = "/mnt/tank/${2}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMapping {
    pub pattern: String,
    pub host_repl: String,
    pub path_repl: String,
}

/// User-defined asset type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetTypeConfig {
    /// Explicit suffixes appended to the asset path
    pub suffixes: Vec<String>,

    /// Regex matched against the remainder of file names sharing the prefix
    pub pattern: Option<String>,
}

/// Unix permission bits, written as an octal string (`"664"`) or integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFileMode", into = "String")]
pub struct FileMode(pub u32);

impl Default for FileMode {
    fn default() -> Self {
        Self(0o664)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFileMode {
    Int(u32),
    Str(String),
}

impl TryFrom<RawFileMode> for FileMode {
    type Error = String;

    fn try_from(raw: RawFileMode) -> Result<Self, Self::Error> {
        let mode = match raw {
            RawFileMode::Int(mode) => mode,
            RawFileMode::Str(s) => {
                let digits = s.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| format!("file_mode must be octal, got '{}'", s))?
            }
        };
        if mode > 0o7777 {
            return Err(format!("file_mode {:o} out of range", mode));
        }
        Ok(Self(mode))
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        format!("{:o}", mode.0)
    }
}

/// Lock behaviour resolved into durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub stale_after: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockSettings {
    fn from(config: &LockConfig) -> Self {
        let nonzero = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            timeout: nonzero(config.timeout_secs),
            stale_after: nonzero(config.stale_after_secs),
        }
    }
}

/// Settings for one cache root, handed to the cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Absolute cache root
    pub root: PathBuf,

    /// Fixed capacity in bytes; filesystem free space is used when unset
    pub capacity: Option<u64>,

    /// Retention applied when the caller does not request one
    pub default_retention: chrono::Duration,

    /// Mode applied to cached files and metadata
    pub file_mode: u32,

    pub lock: LockSettings,
}

impl CacheConfig {
    /// Cache settings with defaults for everything but the root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity: None,
            default_retention: chrono::Duration::days(1),
            file_mode: FileMode::default().0,
            lock: LockSettings::default(),
        }
    }

    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lock.poll_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock.timeout = Some(timeout);
        self
    }
}

impl Config {
    /// Pick the cache named or located by `selector`
    ///
    /// Falls back to `[cache].root`, then a cache named `default`, then the
    /// first named cache, then `~/.cache/stagecache`.
    pub fn select_cache(&self, selector: Option<&str>) -> (Option<String>, PathBuf) {
        if let Some(selector) = selector {
            if let Some(named) = self.caches.get(selector) {
                return (Some(selector.to_string()), absolute(&named.root));
            }
            let root = absolute(Path::new(selector));
            return (self.name_for_root(&root), root);
        }

        if let Some(root) = &self.cache.root {
            let root = absolute(root);
            return (self.name_for_root(&root), root);
        }

        let named = self
            .caches
            .get_key_value("default")
            .or_else(|| self.caches.iter().next());
        if let Some((name, cache)) = named {
            return (Some(name.clone()), absolute(&cache.root));
        }

        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cache")
            .join("stagecache");
        (None, absolute(&root))
    }

    /// Resolve the settings for the selected cache
    pub fn cache_config(&self, selector: Option<&str>) -> StagecacheResult<CacheConfig> {
        let (name, root) = self.select_cache(selector);
        let named = name.as_deref().and_then(|n| self.caches.get(n));

        let time = named
            .and_then(|c| c.time.as_deref())
            .unwrap_or(&self.cache.time);
        let file_mode = named
            .and_then(|c| c.file_mode)
            .unwrap_or(self.cache.file_mode);

        Ok(CacheConfig {
            root,
            capacity: named.and_then(|c| c.size).or(self.cache.size),
            default_retention: parse_retention(time)?,
            file_mode: file_mode.0,
            lock: LockSettings::from(&self.lock),
        })
    }

    fn name_for_root(&self, root: &Path) -> Option<String> {
        self.caches
            .iter()
            .find(|(_, cache)| absolute(&cache.root) == root)
            .map(|(name, _)| name.clone())
    }
}

/// Expand a leading `~` and make the path absolute
pub fn absolute(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    };
    std::path::absolute(&expanded).unwrap_or(expanded)
}

/// Error for a config value that fails validation after parsing
pub(crate) fn invalid(path: &Path, reason: impl Into<String>) -> StagecacheError {
    StagecacheError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
