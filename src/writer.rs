//! Write-behind queue for the fallback write path

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::disk::DiskStore;
use crate::record::CacheRecord;

/// Bounded channel feeding a coalescing pending map, drained to disk by a
/// periodic flusher. Single consumer: one background task owns both the
/// channel receiver and the flush ticker.
pub struct WriteBehindQueue {
  tx: mpsc::Sender<CacheRecord>,
  shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl WriteBehindQueue {
  /// Spawn the consumer task and return the queue handle.
  pub fn start(disk: Arc<DiskStore>, max_queue: usize, period: Duration) -> Self {
    let (tx, mut rx) = mpsc::channel::<CacheRecord>(max_queue);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
      let pending: Mutex<HashMap<String, CacheRecord>> = Mutex::new(HashMap::new());
      let mut ticker = tokio::time::interval(period);
      loop {
        tokio::select! {
          Some(record) = rx.recv() => {
            // coalesce: last write since the previous flush wins
            pending.lock().insert(record.key.clone(), record);
          }
          _ = ticker.tick() => {
            flush_pending(&pending, &disk).await;
          }
          _ = &mut shutdown_rx => {
            tracing::debug!("write-behind flusher stopped");
            break;
          }
        }
      }
    });

    Self {
      tx,
      shutdown: Mutex::new(Some(shutdown_tx)),
    }
  }

  /// Non-blocking enqueue. A full (or stopped) queue hands the record back
  /// so the caller can write it to disk synchronously.
  pub fn try_enqueue(&self, record: CacheRecord) -> Result<(), CacheRecord> {
    self.tx.try_send(record).map_err(|e| match e {
      TrySendError::Full(record) | TrySendError::Closed(record) => record,
    })
  }

  /// Stop the flusher. Records still queued or pending may be lost.
  pub fn stop(&self) {
    if let Some(tx) = self.shutdown.lock().take() {
      let _ = tx.send(());
    }
  }
}

/// Swap the pending map for an empty one and write every record to disk in
/// parallel. The lock is held only for the swap, never across I/O.
async fn flush_pending(
  pending: &Mutex<HashMap<String, CacheRecord>>,
  disk: &Arc<DiskStore>,
) {
  let batch = {
    let mut guard = pending.lock();
    if guard.is_empty() {
      return;
    }
    std::mem::take(&mut *guard)
  };

  let count = batch.len();
  let writes = batch.into_values().map(|record| {
    let disk = disk.clone();
    async move {
      if let Err(e) = disk.write(&record).await {
        tracing::error!("write-behind flush failed for {}: {}", record.key, e);
      }
    }
  });
  futures_util::future::join_all(writes).await;
  tracing::debug!("flushed {} pending records to disk", count);
}
