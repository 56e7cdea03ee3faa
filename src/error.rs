//! Error taxonomy for the fallback cache

/// Errors surfaced by cache operations.
///
/// Callers of the facade only ever observe `NotFound`, `Disk` (from the
/// queue-overflow write path) or `Config` (at construction).
/// `RemoteUnavailable` is internal: the facade converts it into a
/// fallback-mode dispatch instead of returning it.
#[derive(Debug)]
pub enum CacheError {
  /// Key absent or expired
  NotFound,
  /// Remote store unreachable after bounded retry
  RemoteUnavailable(String),
  /// A record on disk or returned from the remote failed to parse
  Decode(String),
  /// Disk I/O failure
  Disk(std::io::Error),
  /// Invalid configuration at construction
  Config(String),
}

impl CacheError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, CacheError::NotFound)
  }
}

impl std::fmt::Display for CacheError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheError::NotFound => write!(f, "not found"),
      CacheError::RemoteUnavailable(msg) => write!(f, "remote unavailable: {}", msg),
      CacheError::Decode(msg) => write!(f, "decode error: {}", msg),
      CacheError::Disk(e) => write!(f, "disk error: {}", e),
      CacheError::Config(msg) => write!(f, "config error: {}", msg),
    }
  }
}

impl std::error::Error for CacheError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      CacheError::Disk(e) => Some(e),
      _ => None,
    }
  }
}

impl From<std::io::Error> for CacheError {
  fn from(e: std::io::Error) -> Self {
    CacheError::Disk(e)
  }
}
