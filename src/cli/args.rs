//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// stagecache - stage files into a shared local cache
///
/// Copies a local or remote asset into the cache (unless a fresh copy is
/// already there) and prints the cached path.
#[derive(Parser, Debug)]
#[command(name = "stagecache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(long, global = true, env = "STAGECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache name or root directory
    #[arg(short, long, global = true, env = "STAGECACHE_CACHE")]
    pub cache: Option<String>,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy an asset into the cache and print its cached path
    Stage(StageArgs),

    /// Show cache usage and cached assets
    Status(StatusArgs),

    /// Maintenance operations
    Manage(ManageArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the stage command
#[derive(Parser, Debug)]
pub struct StageArgs {
    /// Path or URL (sftp://, scp://, file://) of the asset
    pub target: String,

    /// Asset type (file, lastdb, taxdump, bwadb, prefix, or a configured type)
    #[arg(short, long, default_value = "file")]
    pub atype: String,

    /// Retention, `[days-]hours:minutes[:seconds]` or seconds (negative
    /// expires the asset)
    #[arg(short, long, allow_hyphen_values = true)]
    pub time: Option<String>,

    /// Break existing locks and copy even if the cached copy is current
    #[arg(short, long)]
    pub force: bool,

    /// With --force and a negative --time, remove the asset from the cache
    #[arg(long)]
    pub purge: bool,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Remove a leftover cache-wide lock before reading
    #[arg(long)]
    pub force: bool,

    /// Remove expired assets that are not in use
    #[arg(long)]
    pub purge: bool,

    /// With --purge, only report what would be removed
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the manage command
#[derive(Parser, Debug)]
pub struct ManageArgs {
    /// Subcommand for manage
    #[command(subcommand)]
    pub action: ManageAction,
}

/// Manage subcommands
#[derive(Subcommand, Debug)]
pub enum ManageAction {
    /// Delete assets, earliest expiry first, regardless of retention
    Free {
        /// Gigabytes to free
        #[arg(short, long)]
        gigs: f64,

        /// Only delete assets whose cached path ends with this
        #[arg(short, long)]
        suffix: Option<String>,

        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// List assets with metadata on disk but missing from the asset list
    Unlisted,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the merged configuration
    Show,

    /// Show configuration file paths
    Path,
}

/// Output format for status
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Cached source paths, one per line
    Plain,
}

/// Log line format on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
