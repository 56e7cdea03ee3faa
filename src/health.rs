//! Mode controller: healthy flag, fallback trigger, health-check loop

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant};

use crate::fallback::Core;

/// Shared mode state.
///
/// `healthy` is read on every public call, so it sits behind a read/write
/// lock rather than a channel. `recovering` is a compare-and-swap
/// single-flight flag. The two task slots hold shutdown senders; `Some`
/// doubles as the "already running" guard for the health-check loop.
pub(crate) struct HealthState {
  pub(crate) healthy: RwLock<bool>,
  pub(crate) recovering: AtomicBool,
  pub(crate) checker: Mutex<Option<oneshot::Sender<()>>>,
  pub(crate) janitor: Mutex<Option<oneshot::Sender<()>>>,
}

impl HealthState {
  pub(crate) fn new() -> Self {
    Self {
      healthy: RwLock::new(false),
      recovering: AtomicBool::new(false),
      checker: Mutex::new(None),
      janitor: Mutex::new(None),
    }
  }
}

impl Core {
  pub(crate) fn is_healthy(&self) -> bool {
    *self.state.healthy.read()
  }

  pub(crate) fn is_recovering(&self) -> bool {
    self.state.recovering.load(Ordering::Acquire)
  }

  /// Called after the remote adapter exhausts its retries (or a startup
  /// PING fails). Flips to fallback mode and starts the health-check loop
  /// unless one is already live. Idempotent.
  pub(crate) fn observe_remote_failure(self: &Arc<Self>) {
    {
      let mut healthy = self.state.healthy.write();
      if *healthy {
        tracing::warn!("remote unreachable, switching to fallback mode");
      }
      *healthy = false;
    }

    let mut checker = self.state.checker.lock();
    if checker.is_some() {
      return;
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *checker = Some(shutdown_tx);

    let core = self.clone();
    tokio::spawn(run_health_check_loop(core, shutdown_rx));
  }
}

/// PING the remote every `time_to_check`. On the first success, release
/// the ticker slot and hand off to the recovery engine on a fresh task.
async fn run_health_check_loop(core: Arc<Core>, mut shutdown: oneshot::Receiver<()>) {
  let period = Duration::from_secs(core.config.options.time_to_check);
  let mut ticker = interval_at(Instant::now() + period, period);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if core.remote.ping().await.is_ok() {
          tracing::info!("remote reachable again, starting recovery");
          core.state.checker.lock().take();

          let core = core.clone();
          tokio::spawn(async move {
            core.recover().await;
          });
          return;
        }
        tracing::debug!("health check: remote still unreachable");
      }
      _ = &mut shutdown => {
        tracing::debug!("health-check loop stopped");
        return;
      }
    }
  }
}
