//! Turning a command-line target into a [`Target`]
//!
//! Accepted forms:
//!
//! - `sftp://[user@]host/path` and `scp://[user@]host/path`
//! - `file:///path`
//! - a plain path, rewritten to a remote target when a `[remote.mappings]`
//!   pattern matches it

use super::{AssetType, LocalTarget, RemoteTarget, Target};
use crate::config::schema::{absolute, RemoteMapping};
use crate::config::RemoteConfig;
use crate::error::{StagecacheError, StagecacheResult};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://(?:([^/@]+)@)?([^/]*)(/.+)$")
        .unwrap_or_else(|e| panic!("invalid URL pattern: {e}"))
});

/// Parsed `scheme://[user@]host/path`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedUrl<'a> {
    scheme: &'a str,
    user: Option<&'a str>,
    host: &'a str,
    path: &'a str,
}

fn parse_url(input: &str) -> Option<ParsedUrl<'_>> {
    let caps = URL_PATTERN.captures(input)?;
    Some(ParsedUrl {
        scheme: caps.get(1)?.as_str(),
        user: caps.get(2).map(|m| m.as_str()),
        host: caps.get(3)?.as_str(),
        path: caps.get(4)?.as_str(),
    })
}

/// Build the target for `input`
pub fn resolve_target(
    input: &str,
    asset_type: AssetType,
    remote: &RemoteConfig,
) -> StagecacheResult<Box<dyn Target>> {
    if let Some(url) = parse_url(input) {
        return match url.scheme.to_ascii_lowercase().as_str() {
            "sftp" | "scp" => {
                debug!("Remote target {}:{}", url.host, url.path);
                Ok(Box::new(RemoteTarget::new(
                    url.host,
                    url.user.map(str::to_string),
                    url.path,
                    asset_type,
                    remote,
                )))
            }
            "file" if url.host.is_empty() => Ok(Box::new(LocalTarget::new(url.path, asset_type))),
            "file" => Err(StagecacheError::InvalidUrl {
                url: input.to_string(),
                reason: "file URLs cannot name a host".to_string(),
            }),
            _ => Err(StagecacheError::UnsupportedProtocol(url.scheme.to_string())),
        };
    }

    let local = absolute(Path::new(input));
    let local_text = local.to_string_lossy();
    for mapping in &remote.mappings {
        if let Some((host, path)) = apply_mapping(mapping, &local_text)? {
            debug!("Mapped {} to {}:{}", local.display(), host, path);
            return Ok(Box::new(RemoteTarget::new(
                host, None, path, asset_type, remote,
            )));
        }
    }

    Ok(Box::new(LocalTarget::new(local, asset_type)))
}

/// Rewrite `path` to `(host, remote_path)` if the mapping matches
fn apply_mapping(mapping: &RemoteMapping, path: &str) -> StagecacheResult<Option<(String, String)>> {
    let pattern = Regex::new(&mapping.pattern).map_err(|e| StagecacheError::InvalidMapping {
        pattern: mapping.pattern.clone(),
        reason: e.to_string(),
    })?;
    let Some(caps) = pattern.captures(path) else {
        return Ok(None);
    };

    let mut host = String::new();
    caps.expand(&mapping.host_repl, &mut host);
    let mut remote_path = String::new();
    caps.expand(&mapping.path_repl, &mut remote_path);

    if host.is_empty() || !remote_path.starts_with('/') {
        return Err(StagecacheError::InvalidMapping {
            pattern: mapping.pattern.clone(),
            reason: format!("'{}' maps to host '{}' and path '{}'", path, host, remote_path),
        });
    }
    Ok(Some((host, remote_path)))
}
