//! Cache usage reports

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert GB to bytes
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb.max(0.0) * (1024u64 * 1024 * 1024) as f64) as u64
}

/// What `inspect` should do besides reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectOptions {
    /// Delete a leftover registry lock first
    pub force: bool,
    /// Remove expired assets that are not in use
    pub purge: bool,
    pub dry_run: bool,
}

/// State of a cached asset at inspection time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetState {
    /// Retention still running
    Active,
    /// Eligible for eviction
    Expired,
    /// Removed by this inspection
    Purged,
    /// Would be removed, dry run
    ToBePurged,
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Purged => "purged",
            Self::ToBePurged => "to-be-purged",
        };
        f.write_str(label)
    }
}

/// One registered asset
#[derive(Debug, Clone, Serialize)]
pub struct AssetSummary {
    pub source: PathBuf,
    pub asset_type: String,
    pub size: u64,
    pub expiry: Option<DateTime<Utc>>,
    pub state: AssetState,
}

/// Usage of one cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub root: PathBuf,
    pub used: u64,
    pub free: u64,
    pub capacity: Option<u64>,
    pub assets: Vec<AssetSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 * 1024), "3.0 TB");
    }

    #[test]
    fn test_gb_to_bytes() {
        assert_eq!(gb_to_bytes(1.0), 1024 * 1024 * 1024);
        assert_eq!(gb_to_bytes(0.5), 512 * 1024 * 1024);
        assert_eq!(gb_to_bytes(-1.0), 0);
    }

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AssetState::ToBePurged).unwrap(),
            "\"to-be-purged\""
        );
        assert_eq!(AssetState::Expired.to_string(), "expired");
    }
}
