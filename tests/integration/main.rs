//! Integration tests for stagecache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn stagecache() -> Command {
        cargo_bin_cmd!("stagecache")
    }

    /// Command isolated from the user's config, pointed at a temp cache
    fn isolated(temp: &TempDir) -> Command {
        let mut cmd = stagecache();
        cmd.env_remove("STAGECACHE_CACHE")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(temp.path().join("config.toml"))
            .arg("-c")
            .arg(temp.path().join("cache"));
        cmd
    }

    #[test]
    fn help_displays() {
        stagecache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("shared local cache"));
    }

    #[test]
    fn version_displays() {
        stagecache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagecache"));
    }

    #[test]
    fn stage_help() {
        stagecache()
            .args(["stage", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--atype"))
            .stdout(predicate::str::contains("--purge"));
    }

    #[test]
    fn stage_prints_cached_path() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("data").join("genome.fa");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "ACGT").unwrap();

        let output = isolated(&temp)
            .arg("stage")
            .arg(&source)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let cached = String::from_utf8(output).unwrap();
        let cached = cached.trim();
        assert!(cached.starts_with(temp.path().join("cache").to_str().unwrap()));
        assert!(cached.ends_with("genome.fa"));
        assert_eq!(fs::read_to_string(cached).unwrap(), "ACGT");
    }

    #[test]
    fn stage_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .arg("stage")
            .arg(temp.path().join("nope.txt"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn negative_time_without_force_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, "x").unwrap();

        isolated(&temp)
            .arg("stage")
            .arg(&source)
            .args(["-t", "-1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
    }

    #[test]
    fn unknown_asset_type_fails() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, "x").unwrap();

        isolated(&temp)
            .arg("stage")
            .arg(&source)
            .args(["-a", "nonsense"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("nonsense"));
    }

    #[test]
    fn status_lists_staged_asset_as_json() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, "hello").unwrap();

        isolated(&temp).arg("stage").arg(&source).assert().success();

        let output = isolated(&temp)
            .args(["status", "--format", "json"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(report["used"], 5);
        assert_eq!(report["assets"][0]["state"], "active");
        assert_eq!(report["assets"][0]["asset_type"], "file");
    }

    #[test]
    fn status_empty_cache() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached assets"));
    }

    #[test]
    fn manage_unlisted_runs() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["manage", "unlisted"])
            .assert()
            .success();
    }

    #[test]
    fn config_path_lists_files() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_reads_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[cache]\ntime = \"2:00\"\n").unwrap();

        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2:00"));
    }

    #[test]
    fn invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[cache\n").unwrap();

        isolated(&temp)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("config.toml"));
    }
}

mod engine_tests {
    use chrono::{Duration, Utc};
    use stagecache::cache::{CacheEngine, StageOptions, StageOutcome};
    use stagecache::config::CacheConfig;
    use stagecache::error::{StagecacheError, StagecacheResult};
    use stagecache::target::{AssetType, AssetTypes, LocalTarget, Target};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    struct Harness {
        temp: TempDir,
        engine: CacheEngine,
    }

    impl Harness {
        fn new(capacity: u64) -> Self {
            let temp = TempDir::new().unwrap();
            let engine = engine_at(temp.path().join("cache"), capacity);
            Self { temp, engine }
        }

        fn file_type(&self) -> AssetType {
            self.engine.asset_types().get("file").unwrap().clone()
        }

        fn write_source(&self, name: &str, size: usize, modified: SystemTime) -> PathBuf {
            let path = self.temp.path().join("src").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![b'x'; size]).unwrap();
            set_mtime(&path, modified);
            path
        }

        fn source(&self, name: &str, size: usize) -> LocalTarget {
            let path = self.write_source(name, size, hours_ago(1));
            LocalTarget::new(path, self.file_type())
        }
    }

    fn engine_at(root: PathBuf, capacity: u64) -> CacheEngine {
        let config = CacheConfig::new(root)
            .with_capacity(capacity)
            .with_poll_interval(StdDuration::from_millis(10));
        CacheEngine::new(config, AssetTypes::builtin().unwrap()).unwrap()
    }

    fn hours_ago(hours: u64) -> SystemTime {
        SystemTime::now() - StdDuration::from_secs(hours * 3600)
    }

    fn set_mtime(path: &Path, modified: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn retention(duration: Duration) -> StageOptions {
        StageOptions {
            retention: Some(duration),
            ..StageOptions::default()
        }
    }

    /// Counts copies while delegating to a local target
    struct CountingTarget {
        inner: LocalTarget,
        copies: AtomicUsize,
    }

    impl Target for CountingTarget {
        fn source_path(&self) -> &Path {
            self.inner.source_path()
        }

        fn asset_type(&self) -> &AssetType {
            self.inner.asset_type()
        }

        fn mtime(&self) -> StagecacheResult<chrono::DateTime<Utc>> {
            self.inner.mtime()
        }

        fn size(&self) -> StagecacheResult<u64> {
            self.inner.size()
        }

        fn copy_to(&self, dest: &Path, file_mode: u32, dry_run: bool) -> StagecacheResult<()> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            // widen the window for a racing stager
            thread::sleep(StdDuration::from_millis(50));
            self.inner.copy_to(dest, file_mode, dry_run)
        }
    }

    #[test]
    fn small_asset_into_empty_cache() {
        let h = Harness::new(1000);
        let target = h.source("small.bin", 100);

        let staged = h.engine.stage(&target, &StageOptions::default()).unwrap();

        assert_eq!(staged.outcome, StageOutcome::Copied);
        assert_eq!(fs::metadata(&staged.path).unwrap().len(), 100);
        assert!(staged.path.starts_with(h.engine.root()));
        assert_eq!(h.engine.eviction().used_space().unwrap(), 100);
        assert_eq!(h.engine.eviction().free_space().unwrap(), 900);
    }

    #[test]
    fn evicts_only_most_recently_expired() {
        let h = Harness::new(1000);
        let older = h.source("older.bin", 400);
        let newer = h.source("newer.bin", 400);
        h.engine.stage(&older, &StageOptions::default()).unwrap();
        h.engine.stage(&newer, &StageOptions::default()).unwrap();

        let now = Utc::now().timestamp();
        h.engine.record_for(&older).set_expiry(now - 7200).unwrap();
        h.engine.record_for(&newer).set_expiry(now - 60).unwrap();

        let incoming = h.source("incoming.bin", 500);
        h.engine.stage(&incoming, &StageOptions::default()).unwrap();

        let listed: Vec<PathBuf> = h
            .engine
            .registry()
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.source_path)
            .collect();
        assert!(listed.contains(&older.source_path().to_path_buf()));
        assert!(!listed.contains(&newer.source_path().to_path_buf()));
        assert!(listed.contains(&incoming.source_path().to_path_buf()));
        assert!(h.engine.record_for(&older).cached_path().exists());
        assert!(!h.engine.record_for(&newer).cached_path().exists());
        assert_eq!(h.engine.eviction().used_space().unwrap(), 900);
    }

    #[test]
    fn insufficient_space_removes_nothing() {
        let h = Harness::new(1000);
        let expired = h.source("expired.bin", 300);
        let active = h.source("active.bin", 500);
        h.engine.stage(&expired, &StageOptions::default()).unwrap();
        h.engine.stage(&active, &StageOptions::default()).unwrap();
        h.engine
            .record_for(&expired)
            .set_expiry(Utc::now().timestamp() - 10)
            .unwrap();

        let big = h.source("big.bin", 600);
        let err = h.engine.stage(&big, &StageOptions::default()).unwrap_err();

        assert!(matches!(err, StagecacheError::InsufficientSpace { .. }));
        assert_eq!(h.engine.registry().entries().unwrap().len(), 2);
        assert!(h.engine.record_for(&expired).cached_path().exists());
    }

    #[test]
    fn negative_retention_without_force_is_rejected() {
        let h = Harness::new(1000);
        let target = h.source("a.bin", 10);
        h.engine.stage(&target, &StageOptions::default()).unwrap();
        let expiry = h.engine.record_for(&target).expiry();

        let err = h
            .engine
            .stage(&target, &retention(Duration::seconds(-5)))
            .unwrap_err();

        assert!(matches!(err, StagecacheError::NegativeRetentionWithoutForce));
        assert_eq!(h.engine.record_for(&target).expiry(), expiry);
    }

    #[test]
    fn restaging_extends_without_copying() {
        let h = Harness::new(1000);
        let target = CountingTarget {
            inner: h.source("a.bin", 10),
            copies: AtomicUsize::new(0),
        };
        let record = h.engine.record_for(&target);

        h.engine.stage(&target, &retention(Duration::hours(1))).unwrap();
        let first = record.expiry().unwrap();

        let same = h.engine.stage(&target, &retention(Duration::minutes(5))).unwrap();
        assert_eq!(same.outcome, StageOutcome::Unchanged);
        assert_eq!(record.expiry().unwrap(), first);

        let later = h.engine.stage(&target, &retention(Duration::days(1))).unwrap();
        assert_eq!(later.outcome, StageOutcome::Extended);
        assert!(record.expiry().unwrap() > first);

        assert_eq!(target.copies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn newer_source_is_copied_again() {
        let h = Harness::new(1000);
        let path = h.write_source("a.bin", 10, hours_ago(2));
        h.engine
            .stage(&LocalTarget::new(&path, h.file_type()), &StageOptions::default())
            .unwrap();

        fs::write(&path, vec![b'y'; 20]).unwrap();
        set_mtime(&path, SystemTime::now() + StdDuration::from_secs(3600));
        let target = LocalTarget::new(&path, h.file_type());
        let staged = h.engine.stage(&target, &StageOptions::default()).unwrap();

        assert_eq!(staged.outcome, StageOutcome::Copied);
        assert_eq!(fs::read(&staged.path).unwrap(), vec![b'y'; 20]);
        assert_eq!(h.engine.record_for(&target).size(), 20);
    }

    #[test]
    fn expired_stale_asset_can_replace_itself_in_full_cache() {
        let h = Harness::new(1000);
        let path = h.write_source("big.bin", 600, hours_ago(2));
        let first = LocalTarget::new(&path, h.file_type());
        h.engine.stage(&first, &StageOptions::default()).unwrap();
        h.engine
            .record_for(&first)
            .set_expiry(Utc::now().timestamp() - 60)
            .unwrap();

        fs::write(&path, vec![b'z'; 600]).unwrap();
        set_mtime(&path, SystemTime::now() + StdDuration::from_secs(3600));
        let newer = LocalTarget::new(&path, h.file_type());

        let dry = StageOptions {
            dry_run: true,
            ..StageOptions::default()
        };
        assert_eq!(h.engine.stage(&newer, &dry).unwrap().outcome, StageOutcome::Copied);

        let staged = h.engine.stage(&newer, &StageOptions::default()).unwrap();
        assert_eq!(staged.outcome, StageOutcome::Copied);
        assert_eq!(fs::read(&staged.path).unwrap(), vec![b'z'; 600]);
        assert_eq!(h.engine.registry().entries().unwrap().len(), 1);
        let record = h.engine.record_for(&newer);
        assert_eq!(record.size(), 600);
        assert!(!record.is_expired(Utc::now().timestamp()));
    }

    #[test]
    fn concurrent_stagers_copy_once() {
        let h = Harness::new(10_000);
        let target = Arc::new(CountingTarget {
            inner: h.source("shared.bin", 100),
            copies: AtomicUsize::new(0),
        });
        let root = h.engine.root().to_path_buf();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let target = Arc::clone(&target);
                let root = root.clone();
                thread::spawn(move || {
                    let engine = engine_at(root, 10_000);
                    engine
                        .stage(target.as_ref(), &StageOptions::default())
                        .unwrap()
                })
            })
            .collect();

        let staged: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(target.copies.load(Ordering::SeqCst), 1);
        assert!(staged.iter().all(|s| s.path == staged[0].path));
        assert_eq!(
            staged
                .iter()
                .filter(|s| s.outcome == StageOutcome::Copied)
                .count(),
            1
        );
        assert_eq!(h.engine.registry().entries().unwrap().len(), 1);
    }

    #[test]
    fn removing_unlisted_asset_leaves_list_untouched() {
        let h = Harness::new(1000);
        let listed = h.source("listed.bin", 10);
        h.engine.stage(&listed, &StageOptions::default()).unwrap();
        let before = fs::read(h.engine.registry().list_path()).unwrap();

        let stranger = h
            .engine
            .registry()
            .record(&h.temp.path().join("never-staged"), "file");
        let err = h.engine.registry().remove(&stranger).unwrap_err();

        assert!(matches!(err, StagecacheError::Consistency(_)));
        assert_eq!(fs::read(h.engine.registry().list_path()).unwrap(), before);
    }

    #[test]
    fn multi_file_asset_is_staged_whole() {
        let h = Harness::new(10_000);
        let dir = h.temp.path().join("db");
        fs::create_dir_all(&dir).unwrap();
        for suffix in ["tax", "ids", "prj", "suf", "bck", "des", "sds", "ssp", "tis"] {
            fs::write(dir.join(format!("nr.{suffix}")), b"abc").unwrap();
        }
        let lastdb = h.engine.asset_types().get("lastdb").unwrap().clone();
        let target = LocalTarget::new(dir.join("nr"), lastdb);

        let staged = h.engine.stage(&target, &StageOptions::default()).unwrap();

        assert_eq!(target.size().unwrap(), 27);
        let cached_dir = staged.path.parent().unwrap();
        for name in ["nr.tax", "nr.ids", "nr.prj", "nr.tis"] {
            assert!(cached_dir.join(name).exists(), "{name} not cached");
        }
    }

    #[test]
    fn asset_missing_a_required_file_is_not_staged() {
        let h = Harness::new(10_000);
        let dir = h.temp.path().join("db");
        fs::create_dir_all(&dir).unwrap();
        for suffix in ["tax", "prj", "suf"] {
            fs::write(dir.join(format!("nr.{suffix}")), b"abc").unwrap();
        }
        let lastdb = h.engine.asset_types().get("lastdb").unwrap().clone();
        let target = LocalTarget::new(dir.join("nr"), lastdb);

        let err = h.engine.stage(&target, &StageOptions::default()).unwrap_err();

        assert!(matches!(err, StagecacheError::MissingAssetFile { .. }));
        assert!(h.engine.registry().entries().unwrap().is_empty());
        assert!(!h.engine.record_for(&target).cached_path().with_extension("prj").exists());
    }
}
