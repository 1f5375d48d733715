//! Asset types: which files on disk make up one asset
//!
//! An asset is addressed by a path prefix. Its files are found two ways:
//!
//! - explicit suffixes appended to the prefix (`""` is the prefix itself)
//! - a regex matched against the rest of every file name in the prefix's
//!   directory that starts with the prefix's last component

use super::{FileStat, SourceFs};
use crate::config::schema::AssetTypeConfig;
use crate::error::{StagecacheError, StagecacheResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rule set describing the files of one kind of asset
#[derive(Debug, Clone)]
pub struct AssetType {
    pub name: String,
    pub suffixes: Vec<String>,
    pub pattern: Option<Regex>,
}

impl AssetType {
    pub fn new(
        name: impl Into<String>,
        suffixes: &[&str],
        pattern: Option<&str>,
    ) -> StagecacheResult<Self> {
        let name = name.into();
        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| StagecacheError::InvalidAssetPattern {
                    name: name.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            name,
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            pattern,
        })
    }

    /// Find the files of the asset at `prefix`, keyed by path
    ///
    /// Every explicit suffix file must exist. Finding nothing at all is an
    /// error.
    pub fn collect(
        &self,
        fs: &dyn SourceFs,
        prefix: &Path,
    ) -> StagecacheResult<BTreeMap<PathBuf, FileStat>> {
        self.collect_files(fs, prefix, true)
    }

    /// Like [`AssetType::collect`], but skips missing suffix files
    ///
    /// Used on the cache side, where a partly deleted asset must still be
    /// removable.
    pub fn collect_existing(
        &self,
        fs: &dyn SourceFs,
        prefix: &Path,
    ) -> StagecacheResult<BTreeMap<PathBuf, FileStat>> {
        self.collect_files(fs, prefix, false)
    }

    fn collect_files(
        &self,
        fs: &dyn SourceFs,
        prefix: &Path,
        require_suffixes: bool,
    ) -> StagecacheResult<BTreeMap<PathBuf, FileStat>> {
        let mut files = BTreeMap::new();

        for suffix in &self.suffixes {
            let path = with_suffix(prefix, suffix);
            match fs.stat(&path)? {
                Some(stat) => {
                    files.insert(path, stat);
                }
                None if require_suffixes => {
                    return Err(StagecacheError::MissingAssetFile {
                        path,
                        asset_type: self.name.clone(),
                    });
                }
                None => debug!("No {} file at {}", self.name, path.display()),
            }
        }

        if let Some(pattern) = &self.pattern {
            let (dir, name_prefix) = split_prefix(prefix);
            for (name, stat) in fs.list_dir(&dir)? {
                let Some(rest) = name.strip_prefix(name_prefix.as_str()) else {
                    continue;
                };
                if pattern.is_match(rest) {
                    files.insert(dir.join(&name), stat);
                }
            }
        }

        if files.is_empty() {
            return Err(StagecacheError::EmptyAsset {
                path: prefix.to_path_buf(),
                asset_type: self.name.clone(),
            });
        }

        debug!(
            "Found {} file(s) for {} asset {}",
            files.len(),
            self.name,
            prefix.display()
        );
        Ok(files)
    }
}

/// `prefix` with `suffix` appended verbatim (no separator added)
pub(crate) fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// Split at the last `/`: a trailing slash leaves an empty name prefix
fn split_prefix(prefix: &Path) -> (PathBuf, String) {
    let text = prefix.to_string_lossy();
    match text.rfind('/') {
        Some(0) => (PathBuf::from("/"), text[1..].to_string()),
        Some(i) => (PathBuf::from(&text[..i]), text[i + 1..].to_string()),
        None => (PathBuf::from("."), text.into_owned()),
    }
}

/// Registry of known asset types
#[derive(Debug, Clone)]
pub struct AssetTypes {
    types: BTreeMap<String, AssetType>,
    fallback: AssetType,
}

impl AssetTypes {
    /// The built-in types
    pub fn builtin() -> StagecacheResult<Self> {
        let file = AssetType::new("file", &[""], None)?;
        let types = [
            file.clone(),
            AssetType::new(
                "lastdb",
                &[".tax", ".ids"],
                Some(r"[0-9]*\.(prj|suf|bck|ssp|tis|sds|des)$"),
            )?,
            AssetType::new("taxdump", &["/names.dmp", "/nodes.dmp"], None)?,
            AssetType::new("bwadb", &[], Some(r"\.[a-z]+$"))?,
            AssetType::new("prefix", &[], Some(r"[^/]*$"))?,
        ];

        Ok(Self {
            types: types.into_iter().map(|t| (t.name.clone(), t)).collect(),
            fallback: file,
        })
    }

    /// Built-ins with user-defined types layered over them
    pub fn from_config(custom: &BTreeMap<String, AssetTypeConfig>) -> StagecacheResult<Self> {
        let mut types = Self::builtin()?;
        for (name, config) in custom {
            let suffixes: Vec<&str> = config.suffixes.iter().map(String::as_str).collect();
            if suffixes.is_empty() && config.pattern.is_none() {
                return Err(StagecacheError::InvalidAssetPattern {
                    name: name.clone(),
                    reason: "needs suffixes or a pattern".to_string(),
                });
            }
            let asset_type = AssetType::new(name.clone(), &suffixes, config.pattern.as_deref())?;
            types.types.insert(name.clone(), asset_type);
        }
        Ok(types)
    }

    pub fn get(&self, name: &str) -> StagecacheResult<&AssetType> {
        self.types
            .get(name)
            .ok_or_else(|| StagecacheError::UnknownAssetType(name.to_string()))
    }

    /// Look up a type recorded in cache metadata, falling back to `file`
    pub fn get_or_file(&self, name: &str) -> &AssetType {
        self.types.get(name).unwrap_or(&self.fallback)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
