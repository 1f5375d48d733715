//! Assets on a remote host, reached over ssh and copied with rsync

use super::{relocate, AssetType, FileStat, Inventory, LazyInventory, SourceFs, Target};
use crate::cache::record::set_mode;
use crate::config::RemoteConfig;
use crate::error::{StagecacheError, StagecacheResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Exit status ssh uses for its own failures
const SSH_CONNECTION_ERROR: i32 = 255;

/// [`SourceFs`] on a remote host, one ssh round trip per query
#[derive(Debug, Clone)]
pub struct SshFs {
    destination: String,
    ssh_command: String,
}

impl SshFs {
    pub fn new(host: &str, user: Option<&str>, ssh_command: impl Into<String>) -> Self {
        Self {
            destination: remote_destination(host, user),
            ssh_command: ssh_command.into(),
        }
    }

    /// Run `find` remotely; `None` when find itself fails (missing path)
    fn find(&self, args: &str) -> StagecacheResult<Option<String>> {
        let remote = format!("find -L {}", args);
        debug!("Executing: {} {} {}", self.ssh_command, self.destination, remote);

        let output = Command::new(&self.ssh_command)
            .args(["-o", "BatchMode=yes", self.destination.as_str(), remote.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                StagecacheError::command_failed(
                    format!("{} {}", self.ssh_command, self.destination),
                    e,
                )
            })?;

        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(SSH_CONNECTION_ERROR) | None => Err(command_error(
                format!("{} {}", self.ssh_command, self.destination),
                &output,
            )),
            Some(code) => {
                debug!(
                    "Remote find exited with {}: {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(None)
            }
        }
    }
}

impl SourceFs for SshFs {
    fn stat(&self, path: &Path) -> StagecacheResult<Option<FileStat>> {
        let args = format!(
            "{} -maxdepth 0 -type f -printf '%s\\t%T@\\n'",
            shell_quote(&path.to_string_lossy())
        );
        let Some(out) = self.find(&args)? else {
            return Ok(None);
        };
        Ok(out.lines().find_map(|line| {
            let (size, mtime) = line.split_once('\t')?;
            parse_stat(size, mtime)
        }))
    }

    fn list_dir(&self, dir: &Path) -> StagecacheResult<Vec<(String, FileStat)>> {
        let args = format!(
            "{} -mindepth 1 -maxdepth 1 -type f -printf '%f\\t%s\\t%T@\\n'",
            shell_quote(&dir.to_string_lossy())
        );
        let Some(out) = self.find(&args)? else {
            return Ok(vec![]);
        };
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut fields = line.splitn(3, '\t');
                let name = fields.next()?;
                let stat = parse_stat(fields.next()?, fields.next()?)?;
                Some((name.to_string(), stat))
            })
            .collect())
    }
}

/// An asset on a remote host
#[derive(Debug)]
pub struct RemoteTarget {
    host: String,
    user: Option<String>,
    remote_path: PathBuf,
    identity: PathBuf,
    asset_type: AssetType,
    fs: SshFs,
    ssh_command: String,
    rsync_command: String,
    inventory: LazyInventory,
}

impl RemoteTarget {
    /// `user` overrides the configured user for `host`
    pub fn new(
        host: impl Into<String>,
        user: Option<String>,
        remote_path: impl Into<PathBuf>,
        asset_type: AssetType,
        config: &RemoteConfig,
    ) -> Self {
        let host = host.into();
        let remote_path = remote_path.into();
        let user = user.or_else(|| resolve_user(&host, config));
        let identity = Path::new("/").join(&host).join(
            remote_path
                .strip_prefix("/")
                .unwrap_or(&remote_path),
        );

        Self {
            fs: SshFs::new(&host, user.as_deref(), config.ssh_command.clone()),
            ssh_command: config.ssh_command.clone(),
            rsync_command: config.rsync_command.clone(),
            host,
            user,
            remote_path,
            identity,
            asset_type,
            inventory: LazyInventory::default(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    fn inventory(&self) -> StagecacheResult<&Inventory> {
        self.inventory
            .get_or_collect(&self.fs, &self.asset_type, &self.remote_path)
    }

    fn rsync(&self, remote_file: &Path, dest: &Path) -> StagecacheResult<()> {
        let source = format!(
            "{}:{}",
            remote_destination(&self.host, self.user.as_deref()),
            remote_file.display()
        );
        let mut cmd = Command::new(&self.rsync_command);
        cmd.arg("-lt");
        if self.ssh_command != "ssh" {
            cmd.args(["-e", self.ssh_command.as_str()]);
        }
        cmd.arg(&source)
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let command_line = format!("{} -lt {} {}", self.rsync_command, source, dest.display());
        debug!("Executing: {}", command_line);
        let output = cmd
            .output()
            .map_err(|e| StagecacheError::command_failed(command_line.clone(), e))?;
        if !output.status.success() {
            return Err(command_error(command_line, &output));
        }
        Ok(())
    }
}

impl Target for RemoteTarget {
    fn source_path(&self) -> &Path {
        &self.identity
    }

    fn asset_type(&self) -> &AssetType {
        &self.asset_type
    }

    fn mtime(&self) -> StagecacheResult<DateTime<Utc>> {
        Ok(self.inventory()?.mtime)
    }

    fn size(&self) -> StagecacheResult<u64> {
        Ok(self.inventory()?.size)
    }

    fn copy_to(&self, dest: &Path, file_mode: u32, dry_run: bool) -> StagecacheResult<()> {
        let inventory = self.inventory()?;
        info!(
            "Syncing {} file(s) from {}:{}",
            inventory.files.len(),
            self.host,
            self.remote_path.display()
        );

        for file in inventory.files.keys() {
            let target = relocate(file, &self.remote_path, dest);
            if dry_run {
                info!("Would sync {} to {}", file.display(), target.display());
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StagecacheError::io(format!("creating {}", parent.display()), e)
                })?;
            }
            self.rsync(file, &target)?;
            set_mode(&target, file_mode)?;
        }
        Ok(())
    }
}

/// Configured user for `host`, then the `default` user, then `$USER`
pub fn resolve_user(host: &str, config: &RemoteConfig) -> Option<String> {
    config
        .users
        .get(host)
        .or_else(|| config.users.get("default"))
        .cloned()
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
}

fn remote_destination(host: &str, user: Option<&str>) -> String {
    match user {
        Some(user) => format!("{}@{}", user, host),
        None => host.to_string(),
    }
}

fn command_error(command: String, output: &Output) -> StagecacheError {
    StagecacheError::command_exec(command, String::from_utf8_lossy(&output.stderr).trim())
}

/// Quote for a POSIX shell on the remote side
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parse `find -printf '%s'` and `'%T@'` output
fn parse_stat(size: &str, mtime: &str) -> Option<FileStat> {
    let size = size.trim().parse().ok()?;
    let (secs, frac) = mtime.trim().split_once('.').unwrap_or((mtime.trim(), "0"));
    let secs: i64 = secs.parse().ok()?;
    let digits: String = frac.chars().take(9).collect();
    let nanos: u32 = format!("{:0<9}", digits).parse().ok()?;
    Some(FileStat {
        size,
        mtime: DateTime::from_timestamp(secs, nanos)?,
    })
}
