//! Sentinel-file locks
//!
//! A lock is held while its sentinel file exists. Sentinels are created
//! with an exclusive create, so two processes can never both take the same
//! lock. The sentinel records who holds it:
//!
//! ```text
//! <pid> <hostname> <token>
//! ```
//!
//! A waiter removes a sentinel whose holder is presumed dead: a process on
//! this host that no longer exists, or (when configured) any sentinel older
//! than the stale threshold. Locks are advisory; nothing stops a process
//! from touching the cache without them.

use crate::config::LockSettings;
use crate::error::{StagecacheError, StagecacheResult};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// A lock backed by a sentinel file
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    settings: LockSettings,
}

/// Proof of a held lock; the sentinel is removed on drop
///
/// A guard from a dry run holds nothing and removes nothing.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: PathBuf,
    token: Option<String>,
}

/// Holder information parsed from a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockOwner {
    pid: i32,
    host: String,
    token: String,
}

impl LockOwner {
    fn current(token: String) -> Self {
        Self {
            pid: std::process::id() as i32,
            host: local_hostname(),
            token,
        }
    }

    fn parse(body: &str) -> Option<Self> {
        let mut fields = body.split_whitespace();
        let pid = fields.next()?.parse().ok()?;
        let host = fields.next()?.to_string();
        let token = fields.next()?.to_string();
        Some(Self { pid, host, token })
    }

    fn render(&self) -> String {
        format!("{} {} {}\n", self.pid, self.host, self.token)
    }
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a sentinel currently exists
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Wait for the lock and take it
    ///
    /// With `force`, an existing sentinel is deleted first. With `dry_run`,
    /// the wait still happens but no sentinel is created.
    pub fn acquire(&self, force: bool, dry_run: bool) -> StagecacheResult<LockGuard> {
        if force && self.break_lock()? {
            warn!("Removed existing lock {}", self.path.display());
        }

        let started = Instant::now();
        loop {
            if let Some(guard) = self.try_take(dry_run)? {
                debug!(
                    "Acquired lock {}{}",
                    self.path.display(),
                    if dry_run { " (dry run)" } else { "" }
                );
                return Ok(guard);
            }

            if self.clear_if_abandoned()? {
                continue;
            }

            if let Some(timeout) = self.settings.timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(StagecacheError::LockTimeout {
                        path: self.path.clone(),
                        waited_secs: waited.as_secs(),
                    });
                }
            }

            debug!("Waiting for lock {}", self.path.display());
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// Take the lock only if it is free right now
    pub fn try_acquire(&self, dry_run: bool) -> StagecacheResult<Option<LockGuard>> {
        if let Some(guard) = self.try_take(dry_run)? {
            return Ok(Some(guard));
        }
        if self.clear_if_abandoned()? {
            return self.try_take(dry_run);
        }
        Ok(None)
    }

    /// Delete the sentinel regardless of who holds it
    ///
    /// Returns whether a sentinel was removed.
    pub fn break_lock(&self) -> StagecacheResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StagecacheError::io(
                format!("removing lock {}", self.path.display()),
                e,
            )),
        }
    }

    fn try_take(&self, dry_run: bool) -> StagecacheResult<Option<LockGuard>> {
        if dry_run {
            return Ok((!self.path.exists()).then(|| LockGuard {
                path: self.path.clone(),
                token: None,
            }));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StagecacheError::io(format!("creating lock directory {}", parent.display()), e)
            })?;
        }

        let owner = LockOwner::current(Uuid::new_v4().to_string());
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(StagecacheError::io(
                    format!("creating lock {}", self.path.display()),
                    e,
                ))
            }
        };

        file.write_all(owner.render().as_bytes())
            .map_err(|e| StagecacheError::io(format!("writing lock {}", self.path.display()), e))?;

        Ok(Some(LockGuard {
            path: self.path.clone(),
            token: Some(owner.token),
        }))
    }

    /// Remove the sentinel if its holder is presumed dead
    fn clear_if_abandoned(&self) -> StagecacheResult<bool> {
        let Ok(body) = fs::read_to_string(&self.path) else {
            return Ok(false);
        };

        let reason = match LockOwner::parse(&body) {
            Some(owner) if owner.host == local_hostname() && !process_alive(owner.pid) => {
                format!("holder pid {} is gone", owner.pid)
            }
            _ => match (self.settings.stale_after, self.age()) {
                (Some(limit), Some(age)) if age > limit => {
                    format!("it is older than {}s", limit.as_secs())
                }
                _ => return Ok(false),
            },
        };

        // Another waiter may have replaced it in the meantime
        if fs::read_to_string(&self.path).ok().as_deref() != Some(body.as_str()) {
            return Ok(false);
        }

        warn!("Removing abandoned lock {}: {}", self.path.display(), reason);
        self.break_lock()
    }

    fn age(&self) -> Option<std::time::Duration> {
        fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
    }
}

impl LockGuard {
    /// Whether a sentinel was actually created for this guard
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now, reporting failures
    pub fn release(mut self) -> StagecacheResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> StagecacheResult<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };

        match fs::read_to_string(&self.path) {
            Ok(body) if LockOwner::parse(&body).is_some_and(|owner| owner.token == token) => {
                fs::remove_file(&self.path).or_else(|e| match e.kind() {
                    ErrorKind::NotFound => Ok(()),
                    _ => Err(StagecacheError::io(
                        format!("removing lock {}", self.path.display()),
                        e,
                    )),
                })?;
                debug!("Released lock {}", self.path.display());
            }
            Ok(_) => warn!(
                "Lock {} was taken over by another process, leaving it",
                self.path.display()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Lock {} already removed", self.path.display())
            }
            Err(e) => {
                return Err(StagecacheError::io(
                    format!("reading lock {}", self.path.display()),
                    e,
                ))
            }
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to release lock: {}", e);
        }
    }
}

/// Host name of this machine
fn local_hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: buf is valid for buf.len() bytes and gethostname NUL-terminates on success
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if rc == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
            if !name.is_empty() {
                return name.replace(char::is_whitespace, "_");
            }
        }
    }
    "localhost".to_string()
}

/// Whether a process with this pid exists on this host
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs only the existence and permission check
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast() -> LockSettings {
        LockSettings {
            poll_interval: Duration::from_millis(10),
            timeout: None,
            stale_after: None,
        }
    }

    #[test]
    fn acquire_creates_and_release_removes() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("md").join("write_lock"), fast());

        let guard = lock.acquire(false, false).unwrap();
        assert!(guard.is_held());
        assert!(lock.is_locked());

        guard.release().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn drop_releases() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("write_lock"), fast());
        {
            let _guard = lock.acquire(false, false).unwrap();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn dry_run_never_creates() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("write_lock"), fast());

        let guard = lock.acquire(false, true).unwrap();
        assert!(!guard.is_held());
        assert!(!lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    fn dry_run_guard_leaves_real_lock() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("write_lock"), fast());
        let held = lock.acquire(false, false).unwrap();

        // force removes the sentinel, dry run does not recreate it
        let phantom = lock.acquire(true, true).unwrap();
        assert!(!lock.is_locked());
        drop(phantom);
        drop(held);
        assert!(!lock.is_locked());
    }

    #[test]
    fn force_breaks_existing_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("write_lock");
        fs::write(&path, "locked").unwrap();

        let lock = LockFile::new(&path, fast());
        let guard = lock.acquire(true, false).unwrap();
        assert!(guard.is_held());
        assert_ne!(fs::read_to_string(&path).unwrap(), "locked");
    }

    #[test]
    fn times_out_when_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("write_lock");
        let settings = LockSettings {
            timeout: Some(Duration::from_millis(50)),
            ..fast()
        };
        let lock = LockFile::new(&path, settings);
        let _held = lock.acquire(false, false).unwrap();

        let err = lock.acquire(false, false).unwrap_err();
        assert!(matches!(err, StagecacheError::LockTimeout { .. }));
    }

    #[test]
    fn try_acquire_skips_held_lock() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("write_lock"), fast());
        let _held = lock.acquire(false, false).unwrap();

        assert!(lock.try_acquire(false).unwrap().is_none());
        assert!(lock.try_acquire(true).unwrap().is_none());
    }

    #[test]
    fn dead_holder_is_cleared() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("write_lock");
        let dead = LockOwner {
            pid: i32::MAX,
            host: local_hostname(),
            token: "dead".to_string(),
        };
        fs::write(&path, dead.render()).unwrap();

        let lock = LockFile::new(&path, fast());
        let guard = lock.try_acquire(false).unwrap();
        assert!(guard.is_some());
    }

    #[test]
    fn stale_lock_is_cleared_by_age() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("write_lock");
        fs::write(&path, "locked").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let settings = LockSettings {
            stale_after: Some(Duration::from_secs(60)),
            ..fast()
        };
        let guard = LockFile::new(&path, settings).try_acquire(false).unwrap();
        assert!(guard.is_some());
    }

    #[test]
    fn taken_over_lock_is_not_removed() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::new(temp.path().join("write_lock"), fast());

        let first = lock.acquire(false, false).unwrap();
        let second = lock.acquire(true, false).unwrap();

        drop(first);
        assert!(lock.is_locked());
        drop(second);
        assert!(!lock.is_locked());
    }

    #[test]
    fn only_one_holder_at_a_time() {
        let temp = TempDir::new().unwrap();
        let lock = Arc::new(LockFile::new(temp.path().join("write_lock"), fast()));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _guard = lock.acquire(false, false).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owner_roundtrip() {
        let owner = LockOwner::current("abc".to_string());
        assert_eq!(LockOwner::parse(&owner.render()), Some(owner));
        assert_eq!(LockOwner::parse("locked"), None);
    }
}
