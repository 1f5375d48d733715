//! Error types for stagecache
//!
//! All modules use `StagecacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stagecache operations
pub type StagecacheResult<T> = Result<T, StagecacheError>;

/// All errors that can occur in stagecache
#[derive(Error, Debug)]
pub enum StagecacheError {
    // Staging policy errors
    #[error("Cannot cache asset: {needed} bytes needed but at most {available} bytes can be made available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("Cache metadata is inconsistent: {0}")]
    Consistency(String),

    #[error("No files found for asset {path} of type '{asset_type}'")]
    EmptyAsset { path: PathBuf, asset_type: String },

    #[error("Missing file {path} of {asset_type} asset")]
    MissingAssetFile { path: PathBuf, asset_type: String },

    #[error("Cannot set a negative retention without --force")]
    NegativeRetentionWithoutForce,

    #[error("Cannot purge without --force and a negative retention time")]
    PurgeWithoutNegativeRetention,

    // Lock errors
    #[error("Timed out after {waited_secs}s waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_secs: u64 },

    // Asset and target errors
    #[error("No asset type defined for '{0}'")]
    UnknownAssetType(String),

    #[error("Invalid pattern for asset type '{name}': {reason}")]
    InvalidAssetPattern { name: String, reason: String },

    #[error("Invalid retention time: '{0}'")]
    InvalidRetention(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid remote mapping '{pattern}': {reason}")]
    InvalidMapping { pattern: String, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl StagecacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NegativeRetentionWithoutForce => Some("Add --force to shorten or remove a cached asset"),
            Self::PurgeWithoutNegativeRetention => Some("Run with: --force --time -1 --purge"),
            Self::InsufficientSpace { .. } => {
                Some("Run: stagecache status --purge, or raise the cache size")
            }
            Self::LockTimeout { .. } => {
                Some("If the holder crashed, rerun with --force to break the lock")
            }
            Self::Consistency(_) => Some("Run: stagecache manage unlisted to inspect the cache"),
            Self::MissingAssetFile { .. } => Some("Check the path and the asset type (-a)"),
            Self::UnknownAssetType(_) => Some("Define it under [asset_types] in the config file"),
            _ => None,
        }
    }
}
