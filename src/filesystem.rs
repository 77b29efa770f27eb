//! The filesystem facade: the only component besides the catalog that is
//! shared, mutable state across the rest of the crate (spec.md §5,
//! "Shared-resource policy").
//!
//! Concurrent writers to the same path are serialized by a path-keyed
//! registry of locks, the same `Arc<RwLock<HashMap<...>>>` shape the
//! teacher uses for its table registry in `scheduler/inner_locustdb.rs`.
//! Readers, including mmap, proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Where a partition's backing data lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorePath {
    /// `db/index/<uuid>.<ext>` — current layout, segment embedded or
    /// addressed by the partition artifact's store header.
    Local(uuid::Uuid),
    /// `db/archive/segments/<uuid>.<ext>` — legacy row store, still
    /// readable (spec.md §6, on-disk layout; SPEC_FULL.md supplement B).
    Archive(uuid::Uuid),
}

pub struct Filesystem {
    root: PathBuf,
    write_locks: Arc<RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl Filesystem {
    pub fn new(root: impl Into<PathBuf>) -> Filesystem {
        Filesystem { root: root.into(), write_locks: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive").join("segments")
    }

    pub fn partition_path(&self, id: uuid::Uuid) -> PathBuf {
        self.index_dir().join(format!("{id}.part"))
    }

    pub fn synopsis_sidecar_path(&self, id: uuid::Uuid) -> PathBuf {
        self.index_dir().join(format!("{id}.mdx"))
    }

    pub fn catalog_snapshot_path(&self) -> PathBuf {
        self.index_dir().join("index.cat")
    }

    pub fn archive_segment_path(&self, id: uuid::Uuid) -> PathBuf {
        self.archive_dir().join(format!("{id}.seg"))
    }

    pub fn resolve(&self, path: &StorePath) -> PathBuf {
        match path {
            StorePath::Local(id) => self.partition_path(*id),
            StorePath::Archive(id) => self.archive_segment_path(*id),
        }
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        if let Some(lock) = self.write_locks.read().await.get(path) {
            return lock.clone();
        }
        let mut locks = self.write_locks.write().await;
        locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Writes `bytes` to `path`, serialized against any other writer of
    /// the same path. Creates parent directories as needed.
    pub async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Writes to `path.next`, then atomically renames over `path` --
    /// used by passive-partition erase to preserve the original filename
    /// (spec.md §4.3, "Erase").
    pub async fn write_atomic_replace(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        let path = path.to_path_buf();
        let tmp = next_path(&path);
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = path.to_path_buf();
        Ok(tokio::task::spawn_blocking(move || std::fs::read(&path)).await??)
    }

    /// Memory-maps `path` read-only. Reads proceed without serialization
    /// against writers of other paths; on unix, the mapping stays valid
    /// even if the file is later unlinked or replaced by a rename
    /// (spec.md §4.3, "Concurrent queries ... remain correct").
    pub async fn mmap(&self, path: &Path) -> Result<Arc<Mmap>> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || std::fs::File::open(&path)).await??;
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Arc::new(mmap))
    }

    pub async fn erase(&self, path: &Path) -> Result<()> {
        let lock = self.lock_for(path).await;
        let _guard = lock.lock().await;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        })
        .await?
    }

    /// Recursive size of the whole db directory, used by the disk
    /// monitor's scan (spec.md §4.8 step 1).
    pub async fn recursive_size(&self) -> Result<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut total = 0u64;
            for entry in walkdir::WalkDir::new(&root) {
                let entry = entry.map_err(|e| Error::Filesystem(e.to_string()))?;
                if entry.file_type().is_file() {
                    total += entry.metadata().map_err(|e| Error::Filesystem(e.to_string()))?.len();
                }
            }
            Ok(total)
        })
        .await?
    }

    /// Lists `(id, size, mtime)` for every partition artifact file under
    /// `index/` -- input to the disk monitor's oldest-first purge
    /// (spec.md §4.8 step 3).
    pub async fn list_partition_files(&self) -> Result<Vec<(uuid::Uuid, u64, std::time::SystemTime)>> {
        let dir = self.index_dir();
        tokio::task::spawn_blocking(move || -> Result<Vec<(uuid::Uuid, u64, std::time::SystemTime)>> {
            let mut out = Vec::new();
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
                Err(e) => return Err(Error::from(e)),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("part") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
                let Ok(id) = uuid::Uuid::parse_str(stem) else { continue };
                let meta = entry.metadata()?;
                out.push((id, meta.len(), meta.modified()?));
            }
            Ok(out)
        })
        .await?
    }
}

fn next_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".next");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::new(dir.path());
        let path = fs.index_dir().join("x.bin");
        fs.write(&path, vec![1, 2, 3]).await.unwrap();
        let data = fs.read(&path).await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn atomic_replace_preserves_filename() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::new(dir.path());
        let path = fs.index_dir().join("x.bin");
        fs.write(&path, vec![1]).await.unwrap();
        fs.write_atomic_replace(&path, vec![2, 3]).await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), vec![2, 3]);
        assert!(!next_path(&path).exists());
    }

    #[tokio::test]
    async fn erase_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::new(dir.path());
        fs.erase(&fs.index_dir().join("missing.bin")).await.unwrap();
    }
}
