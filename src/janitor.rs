//! Background sweep of expired entries

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant};

use crate::fallback::Core;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Every 30 s, drop expired entries from memory and their files from disk.
/// Sits out any tick that lands during recovery.
pub(crate) async fn run_janitor(core: Arc<Core>, mut shutdown: oneshot::Receiver<()>) {
  let mut ticker = interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if core.is_recovering() {
          continue;
        }

        let expired = core.memory.take_expired(Utc::now().timestamp());
        for key in &expired {
          if let Err(e) = core.disk.remove(key).await {
            tracing::error!("failed to drop expired file for {}: {}", key, e);
          }
        }
        if !expired.is_empty() {
          tracing::debug!("janitor swept {} expired entries", expired.len());
        }
      }
      _ = &mut shutdown => {
        tracing::debug!("janitor stopped");
        return;
      }
    }
  }
}
