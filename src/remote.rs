//! Remote store adapter

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;

use crate::config::RedisConfig;
use crate::error::CacheError;
use crate::record::CacheRecord;

/// One pipelined SET
#[derive(Debug, Clone)]
pub struct BatchSet {
  pub key: String,
  pub value: String,
  pub ttl_seconds: Option<u64>,
}

/// The four remote operations the cache consumes, plus the batched SET
/// accumulator used by recovery.
///
/// Implemented by [`RedisRemote`] for real deployments; test suites plug in
/// scripted implementations.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
  /// Raw value as previously stored; `None` when the key is absent.
  async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
  /// TTL is omitted for "no expiry".
  async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError>;
  async fn del(&self, key: &str) -> Result<(), CacheError>;
  async fn ping(&self) -> Result<(), CacheError>;
  async fn set_batch(&self, entries: &[BatchSet]) -> Result<(), CacheError>;
  /// Release the underlying connection. Later calls may reconnect.
  fn close(&self);
}

fn remote_err(e: redis::RedisError) -> CacheError {
  CacheError::RemoteUnavailable(e.to_string())
}

/// Redis-backed implementation over a lazily created connection manager.
pub struct RedisRemote {
  client: Client,
  connection: Mutex<Option<ConnectionManager>>,
}

impl RedisRemote {
  /// Build the client. Only the URL is validated here; no connection is
  /// attempted, so construction succeeds while the remote is down.
  pub fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
    let client =
      Client::open(config.connection_url()).map_err(|e| CacheError::Config(e.to_string()))?;
    Ok(Self {
      client,
      connection: Mutex::new(None),
    })
  }

  /// Clone the shared connection manager, creating it on first use. The
  /// manager reconnects on its own once established; until then every call
  /// retries the initial connect.
  async fn connection(&self) -> Result<ConnectionManager, CacheError> {
    {
      let guard = self.connection.lock();
      if let Some(conn) = guard.as_ref() {
        return Ok(conn.clone());
      }
    }

    let conn = ConnectionManager::new(self.client.clone())
      .await
      .map_err(remote_err)?;
    *self.connection.lock() = Some(conn.clone());
    Ok(conn)
  }
}

#[async_trait]
impl RemoteBackend for RedisRemote {
  async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    let mut conn = self.connection().await?;
    let raw: Option<Vec<u8>> = conn.get(key).await.map_err(remote_err)?;
    match raw {
      None => Ok(None),
      Some(bytes) => String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| CacheError::Decode(e.to_string())),
    }
  }

  async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError> {
    let mut conn = self.connection().await?;
    match ttl_seconds {
      Some(secs) => {
        let _: () = conn.set_ex(key, value, secs).await.map_err(remote_err)?;
      }
      None => {
        let _: () = conn.set(key, value).await.map_err(remote_err)?;
      }
    }
    Ok(())
  }

  async fn del(&self, key: &str) -> Result<(), CacheError> {
    let mut conn = self.connection().await?;
    let _: i64 = conn.del(key).await.map_err(remote_err)?;
    Ok(())
  }

  async fn ping(&self) -> Result<(), CacheError> {
    let mut conn = self.connection().await?;
    redis::cmd("PING")
      .query_async::<()>(&mut conn)
      .await
      .map_err(remote_err)?;
    Ok(())
  }

  async fn set_batch(&self, entries: &[BatchSet]) -> Result<(), CacheError> {
    let mut conn = self.connection().await?;
    let mut pipe = redis::pipe();
    for entry in entries {
      let cmd = pipe.cmd("SET").arg(&entry.key).arg(&entry.value);
      if let Some(secs) = entry.ttl_seconds {
        cmd.arg("EX").arg(secs);
      }
      cmd.ignore();
    }
    pipe.query_async::<()>(&mut conn).await.map_err(remote_err)?;
    Ok(())
  }

  fn close(&self) {
    // dropping the manager tears down its multiplexed connection
    self.connection.lock().take();
  }
}

/// Backend wrapper applying the bounded retry policy and the record
/// encoding rules. Retry is deliberately short with no backoff; the mode
/// controller is the real fallback mechanism.
pub struct RemoteStore {
  backend: Arc<dyn RemoteBackend>,
  max_retry: u32,
}

impl RemoteStore {
  pub fn new(backend: Arc<dyn RemoteBackend>, max_retry: u32) -> Self {
    Self { backend, max_retry }
  }

  pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    let mut last = String::new();
    for _ in 0..self.max_retry {
      match self.backend.get(key).await {
        Ok(value) => return Ok(value),
        Err(CacheError::RemoteUnavailable(msg)) => last = msg,
        Err(other) => return Err(other),
      }
    }
    Err(CacheError::RemoteUnavailable(last))
  }

  pub async fn set_record(&self, record: &CacheRecord) -> Result<(), CacheError> {
    let value = encode_remote_value(record)?;
    let ttl = remote_ttl(record);

    let mut last = String::new();
    for _ in 0..self.max_retry {
      match self.backend.set(&record.key, &value, ttl).await {
        Ok(()) => return Ok(()),
        Err(CacheError::RemoteUnavailable(msg)) => last = msg,
        Err(other) => return Err(other),
      }
    }
    Err(CacheError::RemoteUnavailable(last))
  }

  pub async fn del(&self, key: &str) -> Result<(), CacheError> {
    let mut last = String::new();
    for _ in 0..self.max_retry {
      match self.backend.del(key).await {
        Ok(()) => return Ok(()),
        Err(CacheError::RemoteUnavailable(msg)) => last = msg,
        Err(other) => return Err(other),
      }
    }
    Err(CacheError::RemoteUnavailable(last))
  }

  /// Single PING, no retry: the health-check ticker supplies the cadence.
  pub async fn ping(&self) -> Result<(), CacheError> {
    self.backend.ping().await
  }

  /// Single-attempt best-effort SET used by the async read refresh.
  pub async fn refresh(&self, record: &CacheRecord) {
    let value = match encode_remote_value(record) {
      Ok(value) => value,
      Err(e) => {
        tracing::debug!("refresh skipped for {}: {}", record.key, e);
        return;
      }
    };
    if let Err(e) = self.backend.set(&record.key, &value, remote_ttl(record)).await {
      tracing::debug!("refresh failed for {}: {}", record.key, e);
    }
  }

  /// Single attempt; recovery logs per-batch failures and moves on.
  pub async fn set_batch(&self, entries: &[BatchSet]) -> Result<(), CacheError> {
    self.backend.set_batch(entries).await
  }

  pub fn close(&self) {
    self.backend.close();
  }
}

fn remote_ttl(record: &CacheRecord) -> Option<u64> {
  (record.ttl > 0).then_some(record.ttl as u64)
}

/// JSON-encode a record's data for the remote, stripping one enclosing
/// pair of double quotes so plain strings are stored naked. The on-disk
/// encoding never gets this treatment.
pub(crate) fn encode_remote_value(record: &CacheRecord) -> Result<String, CacheError> {
  let encoded =
    serde_json::to_string(&record.data).map_err(|e| CacheError::Decode(e.to_string()))?;
  Ok(strip_enclosing_quotes(encoded))
}

fn strip_enclosing_quotes(s: String) -> String {
  if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
    s[1..s.len() - 1].to_string()
  } else {
    s
  }
}
