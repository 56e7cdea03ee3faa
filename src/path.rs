//! Layered on-disk path derivation

use std::path::{Path, PathBuf};

/// Where a key's record lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
  /// Three-level prefix directory holding the file
  pub dir: PathBuf,
  /// Full path to the `.json` file
  pub file: PathBuf,
}

/// Derive the layered path for a key under `{db_root}/{db}`.
///
/// The file name is the full hex MD5 of the key; the three two-hex-digit
/// prefix levels bound per-directory fan-out. Keys colliding on the first
/// six digits share a directory but keep distinct files.
pub fn record_path(db_root: impl AsRef<Path>, db: u8, key: &str) -> RecordPath {
  let digest = format!("{:x}", md5::compute(key.as_bytes()));
  let dir = db_root
    .as_ref()
    .join(db.to_string())
    .join(&digest[0..2])
    .join(&digest[2..4])
    .join(&digest[4..6]);
  let file = dir.join(format!("{}.json", digest));
  RecordPath { dir, file }
}
