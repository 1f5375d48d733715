//! Assets on a locally mounted filesystem

use super::{relocate, AssetType, FileStat, LazyInventory, SourceFs, Target};
use crate::cache::record::set_mode;
use crate::config::schema::absolute;
use crate::error::{StagecacheError, StagecacheResult};
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// [`SourceFs`] over the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl SourceFs for LocalFs {
    fn stat(&self, path: &Path) -> StagecacheResult<Option<FileStat>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(file_stat(path, &meta)?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StagecacheError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn list_dir(&self, dir: &Path) -> StagecacheResult<Vec<(String, FileStat)>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StagecacheError::io(format!("listing {}", dir.display()), e)),
        };

        let mut files = vec![];
        for entry in entries {
            let entry =
                entry.map_err(|e| StagecacheError::io(format!("listing {}", dir.display()), e))?;
            if let Some(stat) = self.stat(&entry.path())? {
                files.push((entry.file_name().to_string_lossy().into_owned(), stat));
            }
        }
        Ok(files)
    }
}

fn file_stat(path: &Path, meta: &fs::Metadata) -> StagecacheResult<FileStat> {
    let mtime = meta
        .modified()
        .map_err(|e| StagecacheError::io(format!("reading mtime of {}", path.display()), e))?;
    Ok(FileStat {
        size: meta.len(),
        mtime: DateTime::<Utc>::from(mtime),
    })
}

/// An asset on the local filesystem
#[derive(Debug)]
pub struct LocalTarget {
    path: PathBuf,
    asset_type: AssetType,
    inventory: LazyInventory,
}

impl LocalTarget {
    pub fn new(path: impl AsRef<Path>, asset_type: AssetType) -> Self {
        Self {
            path: absolute(path.as_ref()),
            asset_type,
            inventory: LazyInventory::default(),
        }
    }

    fn inventory(&self) -> StagecacheResult<&super::Inventory> {
        self.inventory
            .get_or_collect(&LocalFs, &self.asset_type, &self.path)
    }
}

impl Target for LocalTarget {
    fn source_path(&self) -> &Path {
        &self.path
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
            "Copying {} file(s) from {}",
            inventory.files.len(),
            self.path.display()
        );

        for (file, stat) in &inventory.files {
            let target = relocate(file, &self.path, dest);
            if dry_run {
                info!("Would copy {} to {}", file.display(), target.display());
                continue;
            }
            copy_file(file, &target, stat, file_mode)?;
        }
        Ok(())
    }
}

/// Copy through a `.partial` sibling so readers never see a torn file
fn copy_file(source: &Path, dest: &Path, stat: &FileStat, file_mode: u32) -> StagecacheResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StagecacheError::io(format!("creating {}", parent.display()), e))?;
    }

    let mut partial = OsString::from(dest.as_os_str());
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    debug!("Copying {} to {}", source.display(), dest.display());
    fs::copy(source, &partial).map_err(|e| {
        StagecacheError::io(format!("copying {} to {}", source.display(), partial.display()), e)
    })?;

    File::options()
        .write(true)
        .open(&partial)
        .and_then(|f| f.set_modified(stat.mtime.into()))
        .map_err(|e| StagecacheError::io(format!("setting mtime on {}", partial.display()), e))?;
    set_mode(&partial, file_mode)?;

    fs::rename(&partial, dest).map_err(|e| {
        StagecacheError::io(format!("moving {} into place", partial.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::AssetTypes;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn reports_size_and_latest_mtime() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("genome");
        fs::write(temp.path().join("genome.amb"), vec![0u8; 10]).unwrap();
        fs::write(temp.path().join("genome.bwt"), vec![0u8; 32]).unwrap();
        let old = SystemTime::now() - Duration::from_secs(86_400);
        File::options()
            .write(true)
            .open(temp.path().join("genome.amb"))
            .unwrap()
            .set_modified(old)
            .unwrap();

        let bwadb = AssetTypes::builtin().unwrap().get("bwadb").unwrap().clone();
        let target = LocalTarget::new(&db, bwadb);

        assert_eq!(target.size().unwrap(), 42);
        let bwt_mtime = fs::metadata(temp.path().join("genome.bwt"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(target.mtime().unwrap(), DateTime::<Utc>::from(bwt_mtime));
    }

    #[test]
    fn copy_preserves_mtime_and_mode() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src").join("reads.fq");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "ACGT").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let file = AssetTypes::builtin().unwrap().get("file").unwrap().clone();
        let target = LocalTarget::new(&source, file);
        let dest = temp.path().join("cache").join("reads.fq");
        target.copy_to(&dest, 0o640, false).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "ACGT");
        let meta = fs::metadata(&dest).unwrap();
        let source_mtime = fs::metadata(&source).unwrap().modified().unwrap();
        assert_eq!(meta.modified().unwrap(), source_mtime);
        assert!(!temp.path().join("cache").join("reads.fq.partial").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        }
    }

    #[test]
    fn dry_run_copies_nothing() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, "a").unwrap();

        let file = AssetTypes::builtin().unwrap().get("file").unwrap().clone();
        let dest = temp.path().join("cache").join("a.txt");
        LocalTarget::new(&source, file)
            .copy_to(&dest, 0o664, true)
            .unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn missing_source_is_reported() {
        let temp = TempDir::new().unwrap();
        let file = AssetTypes::builtin().unwrap().get("file").unwrap().clone();
        let target = LocalTarget::new(temp.path().join("missing"), file);
        assert!(matches!(
            target.mtime(),
            Err(StagecacheError::MissingAssetFile { .. })
        ));
    }
}
