//! Public facade dispatching on the current mode

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::disk::DiskStore;
use crate::error::CacheError;
use crate::health::HealthState;
use crate::janitor::run_janitor;
use crate::memory::{MemoryCache, MemoryStats};
use crate::record::CacheRecord;
use crate::remote::{RedisRemote, RemoteBackend, RemoteStore};
use crate::writer::WriteBehindQueue;

/// Everything the facade and its background tasks share.
pub(crate) struct Core {
  pub(crate) config: Config,
  pub(crate) memory: MemoryCache,
  pub(crate) disk: Arc<DiskStore>,
  pub(crate) remote: RemoteStore,
  pub(crate) writer: WriteBehindQueue,
  pub(crate) state: HealthState,
}

/// Point-in-time view of the client: mode flags plus memory-tier counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub healthy: bool,
  pub recovering: bool,
  pub memory: MemoryStats,
}

/// Resilient cache client in front of a Redis-compatible store.
///
/// In healthy mode the remote is the write-through authority and memory is
/// a read cache. When the remote stops answering, the client flips to
/// fallback mode: reads serve from memory and the on-disk JSON tree,
/// writes go to memory plus a write-behind queue. A health-check loop
/// pings the remote and, once it answers, recovery drains the disk tree
/// back into it and flips the client back to healthy.
pub struct RedisFallback {
  core: Arc<Core>,
}

impl RedisFallback {
  /// Connect to the configured remote. A remote that is down at
  /// construction is not an error: the client starts in fallback mode and
  /// recovers later.
  pub async fn new(config: Config) -> Result<Self, CacheError> {
    let config = config.validated();
    let backend = RedisRemote::connect(&config.redis)?;
    Self::with_backend(config, Arc::new(backend)).await
  }

  /// Same as [`new`](Self::new) with a caller-supplied remote backend.
  pub async fn with_backend(
    config: Config,
    backend: Arc<dyn RemoteBackend>,
  ) -> Result<Self, CacheError> {
    let config = config.validated();

    let disk = Arc::new(DiskStore::new(&config.options.db_root, config.redis.db));
    if let Err(e) = disk.ensure_root().await {
      tracing::error!("failed to create fallback db directory: {}", e);
    }

    let writer = WriteBehindQueue::start(
      disk.clone(),
      config.options.max_queue,
      Duration::from_secs(config.options.time_to_write),
    );
    let remote = RemoteStore::new(backend, config.options.max_retry);

    let core = Arc::new(Core {
      config,
      memory: MemoryCache::new(),
      disk,
      remote,
      writer,
      state: HealthState::new(),
    });

    match core.remote.ping().await {
      Ok(()) => {
        *core.state.healthy.write() = true;
        tracing::info!("remote reachable, starting in healthy mode");
      }
      Err(e) => {
        tracing::warn!("remote unreachable at startup ({}), starting in fallback mode", e);
        core.observe_remote_failure();
      }
    }

    let (janitor_tx, janitor_rx) = oneshot::channel();
    *core.state.janitor.lock() = Some(janitor_tx);
    tokio::spawn(run_janitor(core.clone(), janitor_rx));

    Ok(Self { core })
  }

  /// Look up a key. Expired entries are purged on sight and reported as
  /// [`CacheError::NotFound`].
  pub async fn get(&self, key: &str) -> Result<Value, CacheError> {
    if self.core.is_healthy() {
      if let Some(record) = self.core.memory.load(key) {
        if record.is_expired() {
          self.core.memory.remove(key);
          self.drop_disk_copy(key).await;
          return Err(CacheError::NotFound);
        }

        // keep the remote warm without holding up the caller
        let core = self.core.clone();
        let refresh = record.clone();
        tokio::spawn(async move {
          core.remote.refresh(&refresh).await;
        });

        return Ok(record.data);
      }

      match self.core.remote.get(key).await {
        Ok(Some(raw)) => {
          let record = CacheRecord::from_remote(key, raw);
          let data = record.data.clone();
          self.core.memory.store(record);
          return Ok(data);
        }
        Ok(None) => return Err(CacheError::NotFound),
        Err(CacheError::RemoteUnavailable(_)) => {
          self.core.observe_remote_failure();
          // fall through to the local tiers
        }
        Err(CacheError::Decode(msg)) => {
          tracing::warn!("remote value for {} failed to decode: {}", key, msg);
          return Err(CacheError::NotFound);
        }
        Err(other) => return Err(other),
      }
    }

    self.get_local(key).await
  }

  /// Store a value with a TTL (floored to whole seconds; zero = never
  /// expires). The write lands on the remote in healthy mode, or on
  /// memory plus the write-behind queue in fallback mode.
  pub async fn set(
    &self,
    key: &str,
    value: impl Serialize,
    ttl: Duration,
  ) -> Result<(), CacheError> {
    let data = serde_json::to_value(value).map_err(|e| CacheError::Decode(e.to_string()))?;
    let record = CacheRecord::new(key, data, ttl.as_secs());

    if self.core.is_healthy() {
      match self.core.remote.set_record(&record).await {
        Ok(()) => {
          self.core.memory.store(record);
          return Ok(());
        }
        Err(CacheError::RemoteUnavailable(_)) => {
          self.core.observe_remote_failure();
          // fall through and re-run as a fallback write
        }
        Err(other) => return Err(other),
      }
    }

    self.set_local(record).await
  }

  /// Remove a key from every tier. A missing key is not an error.
  pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
    self.core.memory.remove(key);
    if let Err(e) = self.core.disk.remove(key).await {
      tracing::error!("failed to remove disk copy of {}: {}", key, e);
    }

    if self.core.is_healthy() {
      match self.core.remote.del(key).await {
        Ok(()) => {}
        Err(CacheError::RemoteUnavailable(_)) => {
          // Local removal already happened, which is all the fallback
          // path would do; flip modes and report success.
          self.core.observe_remote_failure();
        }
        Err(other) => return Err(other),
      }
    }
    Ok(())
  }

  /// Stop the health-check loop, the write-behind flusher and the janitor,
  /// then close the remote connection. Queued writes that have not been
  /// flushed are lost; durability is best-effort by design.
  pub fn close(&self) {
    if let Some(tx) = self.core.state.checker.lock().take() {
      let _ = tx.send(());
    }
    if let Some(tx) = self.core.state.janitor.lock().take() {
      let _ = tx.send(());
    }
    self.core.writer.stop();
    self.core.remote.close();
    tracing::info!("cache client closed");
  }

  /// Whether the remote is currently the authority.
  pub fn is_healthy(&self) -> bool {
    self.core.is_healthy()
  }

  /// Whether a recovery pass is running right now.
  pub fn is_recovering(&self) -> bool {
    self.core.is_recovering()
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      healthy: self.core.is_healthy(),
      recovering: self.core.is_recovering(),
      memory: self.core.memory.stats(),
    }
  }

  /// Fallback-mode read: memory first, then the disk tier (warming memory
  /// on a hit). Stale files are purged as they are observed.
  async fn get_local(&self, key: &str) -> Result<Value, CacheError> {
    if let Some(record) = self.core.memory.load(key) {
      if !record.is_expired() {
        return Ok(record.data);
      }
      self.core.memory.remove(key);
      self.drop_disk_copy(key).await;
      return Err(CacheError::NotFound);
    }

    match self.core.disk.read(key).await {
      Ok(record) if !record.is_expired() => {
        let data = record.data.clone();
        self.core.memory.store(record);
        Ok(data)
      }
      Ok(_) => {
        self.drop_disk_copy(key).await;
        Err(CacheError::NotFound)
      }
      Err(CacheError::NotFound) => Err(CacheError::NotFound),
      Err(CacheError::Decode(msg)) => {
        tracing::warn!("purging unparsable record for {}: {}", key, msg);
        self.drop_disk_copy(key).await;
        Err(CacheError::NotFound)
      }
      Err(e) => {
        tracing::error!("disk read for {} failed: {}", key, e);
        Err(CacheError::NotFound)
      }
    }
  }

  /// Fallback-mode write: memory, then the queue; a full queue degrades to
  /// a synchronous disk write whose failure is the only error surfaced.
  async fn set_local(&self, record: CacheRecord) -> Result<(), CacheError> {
    self.core.memory.store(record.clone());

    match self.core.writer.try_enqueue(record) {
      Ok(()) => Ok(()),
      Err(record) => self.core.disk.write(&record).await,
    }
  }

  async fn drop_disk_copy(&self, key: &str) {
    if let Err(e) = self.core.disk.remove(key).await {
      tracing::error!("failed to remove disk copy of {}: {}", key, e);
    }
  }
}
