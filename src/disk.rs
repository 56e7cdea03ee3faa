//! On-disk JSON tier

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::CacheError;
use crate::path::record_path;
use crate::record::CacheRecord;

/// Reads and writes records under the layered tree for one remote DB index.
pub struct DiskStore {
  db_root: PathBuf,
  db: u8,
}

impl DiskStore {
  pub fn new(db_root: impl AsRef<Path>, db: u8) -> Self {
    Self {
      db_root: db_root.as_ref().to_path_buf(),
      db,
    }
  }

  /// Per-DB root: `{db_root}/{db}`. Purge stops here and never removes it.
  pub fn root(&self) -> PathBuf {
    self.db_root.join(self.db.to_string())
  }

  pub async fn ensure_root(&self) -> Result<(), CacheError> {
    fs::create_dir_all(self.root()).await?;
    Ok(())
  }

  /// Serialize a record to its layered path, creating parent directories.
  /// Create-or-truncate; no rename dance, the in-memory copy stays correct
  /// if this loses a race.
  pub async fn write(&self, record: &CacheRecord) -> Result<(), CacheError> {
    let path = record_path(&self.db_root, self.db, &record.key);
    fs::create_dir_all(&path.dir).await?;

    let json =
      serde_json::to_vec(record).map_err(|e| CacheError::Decode(e.to_string()))?;

    let mut file = File::create(&path.file).await?;
    file.write_all(&json).await?;
    file.flush().await?;
    Ok(())
  }

  /// Read and parse the record for `key`. Missing file is `NotFound`,
  /// unparsable content is `Decode`.
  pub async fn read(&self, key: &str) -> Result<CacheRecord, CacheError> {
    let path = record_path(&self.db_root, self.db, key);
    let data = match fs::read(&path.file).await {
      Ok(data) => data,
      Err(e) if e.kind() == ErrorKind::NotFound => return Err(CacheError::NotFound),
      Err(e) => return Err(CacheError::Disk(e)),
    };
    serde_json::from_slice(&data).map_err(|e| CacheError::Decode(e.to_string()))
  }

  /// Parse a record from an arbitrary file inside the tree (recovery walk).
  pub async fn read_file(path: &Path) -> Result<CacheRecord, CacheError> {
    let data = fs::read(path).await?;
    serde_json::from_slice(&data).map_err(|e| CacheError::Decode(e.to_string()))
  }

  /// Remove the record file for `key`; a missing file is not an error.
  pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
    let path = record_path(&self.db_root, self.db, key);
    match fs::remove_file(&path.file).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(CacheError::Disk(e)),
    }
  }

  /// Collect every `.json` file under the per-DB root.
  pub async fn scan(&self) -> Result<Vec<PathBuf>, CacheError> {
    let (files, _) = self.walk().await?;
    Ok(files)
  }

  /// Remove every `.json` file under the per-DB root, then prune empty
  /// directories bottom-up, leaving the root itself in place. Returns the
  /// number of files removed.
  pub async fn purge(&self) -> Result<usize, CacheError> {
    let (files, mut dirs) = self.walk().await?;

    let mut removed = 0;
    for file in files {
      match fs::remove_file(&file).await {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::error!("failed to remove {}: {}", file.display(), e),
      }
    }

    // Deepest first so children vanish before their parents are tried.
    // remove_dir refuses non-empty directories, which is what we want.
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
      let _ = fs::remove_dir(&dir).await;
    }

    Ok(removed)
  }

  /// Iterative walk of the per-DB subtree. Returns `.json` files and every
  /// directory below the root. A missing root yields empty results.
  async fn walk(&self) -> Result<(Vec<PathBuf>, Vec<PathBuf>), CacheError> {
    let root = self.root();
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(dir) = stack.pop() {
      let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => return Err(CacheError::Disk(e)),
      };

      while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
          dirs.push(path.clone());
          stack.push(path);
        } else if path.extension().is_some_and(|ext| ext == "json") {
          files.push(path);
        }
      }
    }

    Ok((files, dirs))
  }
}
