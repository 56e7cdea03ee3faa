//! End-to-end tests for the fallback cache client

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

use redis_fallback::path::record_path;
use redis_fallback::{BatchSet, CacheError, Config, RedisFallback, RemoteBackend};

// =============================================================================
// Scripted remote
// =============================================================================

/// In-memory stand-in for the remote store whose availability the test
/// scripts. While "offline" every operation fails like a dead connection.
struct ScriptedRemote {
  online: AtomicBool,
  closed: AtomicBool,
  store: Mutex<HashMap<String, (String, Option<u64>)>>,
}

impl ScriptedRemote {
  fn new(online: bool) -> Arc<Self> {
    Arc::new(Self {
      online: AtomicBool::new(online),
      closed: AtomicBool::new(false),
      store: Mutex::new(HashMap::new()),
    })
  }

  fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  fn check(&self) -> Result<(), CacheError> {
    if self.online.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(CacheError::RemoteUnavailable("connection refused".to_string()))
    }
  }

  fn value(&self, key: &str) -> Option<String> {
    self.store.lock().get(key).map(|(value, _)| value.clone())
  }

  fn ttl(&self, key: &str) -> Option<u64> {
    self.store.lock().get(key).and_then(|(_, ttl)| *ttl)
  }

  fn contains(&self, key: &str) -> bool {
    self.store.lock().contains_key(key)
  }

  fn seed(&self, key: &str, value: &str) {
    self
      .store
      .lock()
      .insert(key.to_string(), (value.to_string(), None));
  }
}

#[async_trait]
impl RemoteBackend for ScriptedRemote {
  async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    self.check()?;
    Ok(self.value(key))
  }

  async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError> {
    self.check()?;
    self
      .store
      .lock()
      .insert(key.to_string(), (value.to_string(), ttl_seconds));
    Ok(())
  }

  async fn del(&self, key: &str) -> Result<(), CacheError> {
    self.check()?;
    self.store.lock().remove(key);
    Ok(())
  }

  async fn ping(&self) -> Result<(), CacheError> {
    self.check()
  }

  async fn set_batch(&self, entries: &[BatchSet]) -> Result<(), CacheError> {
    self.check()?;
    let mut store = self.store.lock();
    for entry in entries {
      store.insert(entry.key.clone(), (entry.value.clone(), entry.ttl_seconds));
    }
    Ok(())
  }

  fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_config(root: &TempDir) -> Config {
  let mut config = Config::default();
  config.options.db_root = root.path().display().to_string();
  config.options.time_to_write = 1;
  config.options.time_to_check = 1;
  config
}

fn disk_file(root: &TempDir, key: &str) -> std::path::PathBuf {
  record_path(root.path(), 0, key).file
}

/// Poll a condition for up to five seconds.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
  for _ in 0..100 {
    if cond() {
      return;
    }
    sleep(Duration::from_millis(50)).await;
  }
  panic!("timed out waiting for {}", what);
}

// =============================================================================
// Healthy mode
// =============================================================================

#[tokio::test]
async fn test_healthy_round_trip() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  assert!(cache.is_healthy());

  cache.set("k1", "hello", Duration::from_secs(60)).await.unwrap();
  assert_eq!(cache.get("k1").await.unwrap(), json!("hello"));

  // strings are stored naked on the remote, with the TTL attached
  assert_eq!(remote.value("k1"), Some("hello".to_string()));
  assert_eq!(remote.ttl("k1"), Some(60));

  cache.close();
}

#[tokio::test]
async fn test_missing_key() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  assert!(cache.get("missing").await.unwrap_err().is_not_found());
  // an absent key is an ordinary answer, not a remote failure
  assert!(cache.is_healthy());

  cache.delete("missing").await.unwrap();
  cache.close();
}

#[tokio::test]
async fn test_healthy_miss_fetches_from_remote_and_warms_memory() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  remote.seed("pre", "val");

  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  assert_eq!(cache.get("pre").await.unwrap(), json!("val"));

  // served from memory even once the remote goes dark
  remote.set_online(false);
  assert_eq!(cache.get("pre").await.unwrap(), json!("val"));

  cache.close();
}

#[tokio::test]
async fn test_structured_values_round_trip() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.set("obj", json!({"a": 1}), Duration::ZERO).await.unwrap();
  cache.set("arr", json!([1, 2, 3]), Duration::ZERO).await.unwrap();
  cache.set("num", 42i64, Duration::ZERO).await.unwrap();

  assert_eq!(cache.get("obj").await.unwrap(), json!({"a": 1}));
  assert_eq!(cache.get("arr").await.unwrap(), json!([1, 2, 3]));
  assert_eq!(cache.get("num").await.unwrap(), json!(42));

  // structures keep their JSON encoding on the remote
  assert_eq!(remote.value("obj"), Some(r#"{"a":1}"#.to_string()));
  assert_eq!(remote.value("num"), Some("42".to_string()));

  cache.close();
}

// =============================================================================
// Fallback mode
// =============================================================================

#[tokio::test]
async fn test_startup_with_dead_remote_enters_fallback() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  assert!(!cache.is_healthy());
  cache.close();
}

#[tokio::test]
async fn test_fallback_write_lands_on_disk() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  cache.set("k3", "v3", Duration::from_secs(300)).await.unwrap();

  let file = disk_file(&root, "k3");
  wait_for("write-behind flush", || file.exists()).await;

  let raw = std::fs::read_to_string(&file).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
  assert_eq!(parsed["key"], "k3");
  assert_eq!(parsed["data"], "v3");
  assert_eq!(parsed["type"], "string");
  assert_eq!(parsed["ttl"], 300);
  assert!(parsed["timestamp"].is_i64());

  cache.close();
}

#[tokio::test]
async fn test_healthy_write_failure_flips_to_fallback() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();
  assert!(cache.is_healthy());

  remote.set_online(false);

  // the write is not lost: it re-runs through the fallback path
  cache.set("k", "v", Duration::ZERO).await.unwrap();
  assert!(!cache.is_healthy());
  assert_eq!(cache.get("k").await.unwrap(), json!("v"));

  let file = disk_file(&root, "k");
  wait_for("write-behind flush", || file.exists()).await;

  // remote never stops the tests from recovering later on
  remote.set_online(true);
  wait_for("recovery", || cache.is_healthy()).await;
  assert_eq!(remote.value("k"), Some("v".to_string()));

  cache.close();
}

#[tokio::test]
async fn test_expired_entry_is_purged_on_read() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  cache.set("k2", "bye", Duration::from_secs(2)).await.unwrap();

  let file = disk_file(&root, "k2");
  wait_for("write-behind flush", || file.exists()).await;

  sleep(Duration::from_secs(3)).await;

  assert!(cache.get("k2").await.unwrap_err().is_not_found());
  assert!(!file.exists());

  cache.close();
}

#[tokio::test]
async fn test_fallback_read_warms_memory_from_disk() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  // a record left behind by a previous run, in the stable on-disk format
  let path = record_path(root.path(), 0, "warm");
  std::fs::create_dir_all(&path.dir).unwrap();
  std::fs::write(
    &path.file,
    format!(
      r#"{{"key":"warm","data":"x","type":"string","timestamp":{}}}"#,
      chrono::Utc::now().timestamp()
    ),
  )
  .unwrap();

  assert_eq!(cache.get("warm").await.unwrap(), json!("x"));
  // second read is a memory hit
  assert_eq!(cache.get("warm").await.unwrap(), json!("x"));

  cache.close();
}

#[tokio::test]
async fn test_unparsable_disk_record_is_purged() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  let path = record_path(root.path(), 0, "bad");
  std::fs::create_dir_all(&path.dir).unwrap();
  std::fs::write(&path.file, b"{not json").unwrap();

  assert!(cache.get("bad").await.unwrap_err().is_not_found());
  assert!(!path.file.exists());

  cache.close();
}

#[tokio::test]
async fn test_queue_overflow_degrades_to_sync_writes() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let mut config = test_config(&root);
  config.options.max_queue = 2;

  let cache = RedisFallback::with_backend(config, remote).await.unwrap();

  // a tight burst must never block, whatever mix of queued and
  // synchronous writes it produces
  let burst = async {
    for i in 0..10 {
      let result = cache.set(&format!("burst{}", i), i, Duration::ZERO).await;
      assert!(result.is_ok() || matches!(result, Err(CacheError::Disk(_))));
    }
  };
  tokio::time::timeout(Duration::from_secs(5), burst)
    .await
    .expect("burst of sets blocked");

  sleep(Duration::from_millis(2_500)).await;

  let landed = (0..10)
    .filter(|i| disk_file(&root, &format!("burst{}", i)).exists())
    .count();
  assert!(landed >= 8, "only {} of 10 burst keys landed on disk", landed);

  cache.close();
}

#[tokio::test]
async fn test_set_twice_overwrites() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  cache.set("k", "first", Duration::from_secs(60)).await.unwrap();
  cache.set("k", "second", Duration::from_secs(60)).await.unwrap();

  assert_eq!(cache.get("k").await.unwrap(), json!("second"));

  let file = disk_file(&root, "k");
  wait_for("write-behind flush", || file.exists()).await;
  let parsed: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
  assert_eq!(parsed["data"], "second");

  cache.close();
}

#[tokio::test]
async fn test_delete_is_idempotent() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  cache.set("k", "v", Duration::ZERO).await.unwrap();
  cache.delete("k").await.unwrap();
  cache.delete("k").await.unwrap();

  assert!(cache.get("k").await.unwrap_err().is_not_found());
  cache.close();
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn test_recovery_drains_disk_to_remote() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.set("k3", "v3", Duration::from_secs(300)).await.unwrap();
  cache.set("forever", "f", Duration::ZERO).await.unwrap();

  let file = disk_file(&root, "k3");
  let forever_file = disk_file(&root, "forever");
  wait_for("write-behind flush", || {
    file.exists() && forever_file.exists()
  })
  .await;

  remote.set_online(true);
  wait_for("recovery", || cache.is_healthy()).await;

  // remote got every record, with remaining TTL where one applies
  assert_eq!(remote.value("k3"), Some("v3".to_string()));
  let ttl = remote.ttl("k3").expect("k3 should carry a TTL");
  assert!(ttl > 0 && ttl <= 300);
  assert_eq!(remote.value("forever"), Some("f".to_string()));
  assert_eq!(remote.ttl("forever"), None);

  // the fallback tree was purged
  assert!(!file.exists());
  assert!(!forever_file.exists());

  // and reads flow through the healthy path again
  assert_eq!(cache.get("k3").await.unwrap(), json!("v3"));

  cache.close();
}

#[tokio::test]
async fn test_delete_during_fallback_is_not_resurrected() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.set("k3", "v3", Duration::from_secs(300)).await.unwrap();
  let file = disk_file(&root, "k3");
  wait_for("write-behind flush", || file.exists()).await;

  cache.delete("k3").await.unwrap();
  assert!(!file.exists());

  remote.set_online(true);
  wait_for("recovery", || cache.is_healthy()).await;

  assert!(!remote.contains("k3"));
  cache.close();
}

#[tokio::test]
async fn test_expired_records_are_not_pipelined() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.set("short", "s", Duration::from_secs(1)).await.unwrap();
  cache.set("long", "l", Duration::from_secs(600)).await.unwrap();

  wait_for("write-behind flush", || disk_file(&root, "long").exists()).await;
  sleep(Duration::from_secs(2)).await;

  remote.set_online(true);
  wait_for("recovery", || cache.is_healthy()).await;

  assert!(!remote.contains("short"));
  assert_eq!(remote.value("long"), Some("l".to_string()));
  cache.close();
}

// =============================================================================
// Stats and concurrency
// =============================================================================

#[tokio::test]
async fn test_stats_track_mode_and_memory() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.set("k", "v", Duration::ZERO).await.unwrap();
  cache.get("k").await.unwrap();
  let _ = cache.get("absent").await;

  let stats = cache.stats();
  assert!(stats.healthy);
  assert!(!stats.recovering);
  assert_eq!(stats.memory.entries, 1);
  assert!(stats.memory.hits >= 1);
  assert!(stats.memory.misses >= 1);

  remote.set_online(false);
  cache.set("k2", "v2", Duration::ZERO).await.unwrap();
  assert!(!cache.stats().healthy);

  cache.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fallback_writes() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = Arc::new(
    RedisFallback::with_backend(test_config(&root), remote)
      .await
      .unwrap(),
  );

  let mut handles = Vec::new();
  for i in 0..20 {
    let cache = cache.clone();
    handles.push(tokio::spawn(async move {
      let key = format!("con{}", i);
      cache.set(&key, i, Duration::from_secs(120)).await.unwrap();
      cache.get(&key).await.unwrap()
    }));
  }

  for (i, handle) in handles.into_iter().enumerate() {
    assert_eq!(handle.await.unwrap(), json!(i));
  }

  cache.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_survive_remote_outage() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = Arc::new(
    RedisFallback::with_backend(test_config(&root), remote.clone())
      .await
      .unwrap(),
  );

  cache.set("shared", "stable", Duration::ZERO).await.unwrap();

  // readers hammer the key while the remote goes away mid-flight; every
  // read must keep answering from whichever tier is authoritative
  let mut handles = Vec::new();
  for _ in 0..8 {
    let cache = cache.clone();
    handles.push(tokio::spawn(async move {
      for _ in 0..50 {
        assert_eq!(cache.get("shared").await.unwrap(), json!("stable"));
      }
    }));
  }

  sleep(Duration::from_millis(10)).await;
  remote.set_online(false);

  for handle in handles {
    handle.await.unwrap();
  }

  cache.close();
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_releases_remote_connection() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(true);
  let cache = RedisFallback::with_backend(test_config(&root), remote.clone())
    .await
    .unwrap();

  cache.close();
  assert!(remote.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_set_after_close_still_reaches_disk() {
  let root = TempDir::new().unwrap();
  let remote = ScriptedRemote::new(false);
  let cache = RedisFallback::with_backend(test_config(&root), remote)
    .await
    .unwrap();

  cache.close();
  sleep(Duration::from_millis(100)).await;

  // the queue is gone, so the write degrades to a synchronous one
  cache.set("late", "v", Duration::ZERO).await.unwrap();
  assert!(disk_file(&root, "late").exists());
}
