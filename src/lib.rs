//! stagecache - stage assets into a shared local cache
//!
//! Copies files (or multi-file assets such as database bundles) from a local
//! path or a remote host into a cache directory, reusing the cached copy for
//! as long as it is fresh and its retention has not expired.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod retention;
pub mod target;

pub use error::{StagecacheError, StagecacheResult};
