//! Recovery engine: drain the disk tier back into the remote

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::disk::DiskStore;
use crate::error::CacheError;
use crate::fallback::Core;
use crate::remote::{encode_remote_value, BatchSet};

/// Pipelined SETs are flushed every this many records, and once at the end.
const PIPELINE_BATCH: usize = 100;

impl Core {
  /// One-shot reconciliation after the health check sees the remote again:
  /// re-ingest persisted records, pipeline them to the remote, clean the
  /// tree, flip back to healthy. Guarded by the `recovering` single-flight
  /// flag; overlapping entries return immediately.
  pub(crate) async fn recover(self: &Arc<Self>) {
    if self
      .state
      .recovering
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      tracing::info!("recovery already in progress");
      return;
    }

    let restored = self.restore_from_disk().await;
    match restored {
      Ok(loaded) => {
        self.pipeline_to_remote().await;

        if let Err(e) = self.disk.purge().await {
          tracing::error!("failed to clean fallback tree: {}", e);
        }

        *self.state.healthy.write() = true;
        self.state.recovering.store(false, Ordering::Release);
        tracing::info!("recovery complete, {} records restored, back to healthy mode", loaded);
      }
      Err(e) => {
        tracing::error!("recovery failed: {}", e);
        self.state.recovering.store(false, Ordering::Release);
        // The fallback data path never touches the remote, so nothing else
        // would restart the ticker; re-enter fallback mode ourselves.
        self.observe_remote_failure();
      }
    }
  }

  /// Walk the per-DB tree and load every parsable record into memory,
  /// replacing stale entries. Per-file errors are logged and skipped; only
  /// a failed walk aborts recovery.
  async fn restore_from_disk(&self) -> Result<usize, CacheError> {
    let files = self.disk.scan().await?;
    let mut loaded = 0;

    for path in files {
      match DiskStore::read_file(&path).await {
        Ok(record) => {
          self.memory.store(record);
          loaded += 1;
        }
        Err(e) => {
          tracing::warn!("skipping unreadable record {}: {}", path.display(), e);
        }
      }
    }
    Ok(loaded)
  }

  /// SET every non-expired memory record on the remote, with its remaining
  /// TTL where one applies, in pipeline batches.
  async fn pipeline_to_remote(&self) {
    let now = Utc::now().timestamp();
    let mut batch = Vec::with_capacity(PIPELINE_BATCH);
    let mut shipped = 0usize;

    for record in self.memory.records() {
      if record.is_expired_at(now) {
        continue;
      }
      let ttl_seconds = match record.remaining_ttl(now) {
        Some(remaining) if remaining <= 0 => continue,
        Some(remaining) => Some(remaining as u64),
        None => None,
      };
      let value = match encode_remote_value(&record) {
        Ok(value) => value,
        Err(e) => {
          tracing::warn!("skipping unencodable record {}: {}", record.key, e);
          continue;
        }
      };

      batch.push(BatchSet {
        key: record.key,
        value,
        ttl_seconds,
      });

      if batch.len() == PIPELINE_BATCH {
        shipped += self.flush_batch(&mut batch).await;
      }
    }

    if !batch.is_empty() {
      shipped += self.flush_batch(&mut batch).await;
    }
    tracing::info!("recovery pipelined {} records to remote", shipped);
  }

  /// Send one pipeline batch; failures are logged, not retried. The next
  /// fallback/recovery cycle picks up whatever this one missed.
  async fn flush_batch(&self, batch: &mut Vec<BatchSet>) -> usize {
    let count = batch.len();
    match self.remote.set_batch(batch).await {
      Ok(()) => {
        batch.clear();
        count
      }
      Err(e) => {
        tracing::error!("recovery pipeline batch of {} failed: {}", count, e);
        batch.clear();
        0
      }
    }
  }
}
