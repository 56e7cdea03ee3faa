//! In-process memory tier

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::CacheRecord;

/// Point-in-time counters for the memory tier
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
  pub entries: usize,
  pub hits: u64,
  pub misses: u64,
  pub expired: u64,
}

impl MemoryStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

/// Concurrent key-to-record map.
///
/// Process-local only; never a source of truth across restarts. In healthy
/// mode it owns its entries outright, in fallback mode it holds
/// read-through copies of the disk tier.
#[derive(Default)]
pub struct MemoryCache {
  entries: DashMap<String, CacheRecord>,
  hits: AtomicU64,
  misses: AtomicU64,
  expired: AtomicU64,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn load(&self, key: &str) -> Option<CacheRecord> {
    match self.entries.get(key) {
      Some(entry) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value().clone())
      }
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  pub fn store(&self, record: CacheRecord) {
    self.entries.insert(record.key.clone(), record);
  }

  pub fn remove(&self, key: &str) -> bool {
    self.entries.remove(key).is_some()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Snapshot every record (recovery pipelines from this).
  pub fn records(&self) -> Vec<CacheRecord> {
    self
      .entries
      .iter()
      .map(|entry| entry.value().clone())
      .collect()
  }

  /// Remove every entry expired at `now`, returning the swept keys so the
  /// caller can drop their on-disk copies too.
  pub fn take_expired(&self, now: i64) -> Vec<String> {
    let expired: Vec<String> = self
      .entries
      .iter()
      .filter(|entry| entry.value().is_expired_at(now))
      .map(|entry| entry.key().clone())
      .collect();

    for key in &expired {
      self.entries.remove(key);
    }
    self.expired.fetch_add(expired.len() as u64, Ordering::Relaxed);
    expired
  }

  pub fn stats(&self) -> MemoryStats {
    MemoryStats {
      entries: self.entries.len(),
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
    }
  }
}
