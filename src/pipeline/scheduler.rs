//! Debounce scheduler: coalesces bursts of ingest signals into one pass.
//!
//! Each `signal` replaces the countdown for its key. A countdown that runs
//! out starts a pass on a blocking thread unless one is already running, in
//! which case a single re-run is queued for when it finishes. Cancelling a
//! countdown never touches a pass that has started. `flush` fires whatever
//! is still armed at once, for a worker about to exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{DebounceConfig, DebounceMode};
use crate::pipeline::batch::PassRunner;

const GLOBAL_KEY: &str = "global";
const IDLE_POLL: Duration = Duration::from_millis(50);

struct Countdown {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PassState {
    running: bool,
    /// Key of a countdown that fired while a pass was running.
    rerun: Option<String>,
}

struct Inner {
    runner: Arc<dyn PassRunner>,
    config: DebounceConfig,
    countdowns: Mutex<HashMap<String, Countdown>>,
    pass: Mutex<PassState>,
    generation: AtomicU64,
    passes_started: AtomicUsize,
    shut_down: AtomicBool,
}

/// Cheap to clone; clones share countdowns and the pass guard.
#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<Inner>,
}

impl DebounceScheduler {
    pub fn new(runner: Arc<dyn PassRunner>, config: DebounceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                config,
                countdowns: Mutex::new(HashMap::new()),
                pass: Mutex::new(PassState::default()),
                generation: AtomicU64::new(0),
                passes_started: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// New data arrived for `source_key`. Restarts the countdown, with a
    /// length picked from the pending-row count at this moment.
    pub async fn signal(&self, source_key: &str) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            tracing::debug!(source_key, "Signal ignored after shutdown");
            return;
        }

        let runner = self.inner.runner.clone();
        let pending = match tokio::task::spawn_blocking(move || runner.pending_count()).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Pending count unavailable, using incremental delay");
                0
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pending count task failed, using incremental delay");
                0
            }
        };
        let delay = self.inner.config.delay_for(pending);

        let key = match self.inner.config.mode {
            DebounceMode::Global => GLOBAL_KEY.to_string(),
            DebounceMode::PerSource => source_key.to_string(),
        };
        tracing::debug!(source_key, pending, delay_ms = delay.as_millis() as u64, "Countdown restarted");
        Inner::arm(&self.inner, key, delay);
    }

    /// Cancel every countdown and ignore further signals. A running pass
    /// finishes normally.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let mut countdowns = self
            .inner
            .countdowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, countdown) in countdowns.drain() {
            countdown.handle.abort();
        }
        tracing::info!("Debounce scheduler shut down");
    }

    /// Stop accepting signals and run now whatever was waiting: armed
    /// countdowns fire at once instead of being dropped. Several armed keys
    /// collapse into one pass. Resolves when no pass is running.
    pub async fn flush(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let armed = {
            let mut countdowns = self
                .inner
                .countdowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<String> = countdowns.keys().cloned().collect();
            for (_, countdown) in countdowns.drain() {
                countdown.handle.abort();
            }
            keys
        };

        // A running pass may queue a re-run; with arming disabled it would be
        // lost, so it is taken here instead.
        self.wait_idle().await;
        let rerun = self
            .inner
            .pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rerun
            .take();

        let key = armed.into_iter().next().or(rerun);
        if let Some(key) = key {
            tracing::info!(key = %key, "Flushing pending countdown");
            Inner::start_pass(self.inner.clone(), key).await;
        }
        self.wait_idle().await;
        tracing::info!("Debounce scheduler flushed");
    }

    pub fn passes_started(&self) -> usize {
        self.inner.passes_started.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    /// Resolve once no pass is running.
    pub async fn wait_idle(&self) {
        while self.is_running() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Countdowns waiting to fire.
    pub fn armed(&self) -> usize {
        self.inner
            .countdowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Inner {
    fn arm(this: &Arc<Self>, key: String, delay: Duration) {
        // Hold the lock across the spawn so the new countdown is registered
        // before it can possibly fire. Checking shutdown under it too means a
        // flush either drains this countdown or never sees it armed.
        let mut countdowns = this.countdowns.lock().unwrap_or_else(PoisonError::into_inner);
        if this.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = this.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Inner::fire(task, task_key, generation).await;
        });
        if let Some(previous) = countdowns.insert(key, Countdown { generation, handle }) {
            previous.handle.abort();
        }
    }

    async fn fire(this: Arc<Self>, key: String, generation: u64) {
        // Leave the map before starting work: from here on no signal can
        // abort this task.
        {
            let mut countdowns = this.countdowns.lock().unwrap_or_else(PoisonError::into_inner);
            if countdowns.get(&key).map(|c| c.generation) != Some(generation) {
                return;
            }
            countdowns.remove(&key);
        }
        Inner::start_pass(this, key).await;
    }

    /// Run one pass unless one is already running, in which case a re-run is
    /// queued under `key`.
    async fn start_pass(this: Arc<Self>, key: String) {
        {
            let mut pass = this.pass.lock().unwrap_or_else(PoisonError::into_inner);
            if pass.running {
                tracing::debug!(key = %key, "Pass already running, re-run queued");
                pass.rerun = Some(key);
                return;
            }
            pass.running = true;
        }

        this.passes_started.fetch_add(1, Ordering::SeqCst);
        let runner = this.runner.clone();
        match tokio::task::spawn_blocking(move || runner.run_pass()).await {
            Ok(Ok(result)) => tracing::info!(
                pass_id = %result.pass_id,
                completed = result.completed,
                failed = result.failed,
                duration_ms = result.duration_ms,
                "Scheduled pass complete"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Processing pass aborted"),
            Err(e) => tracing::error!(error = %e, "Processing pass task failed"),
        }

        let rerun = {
            let mut pass = this.pass.lock().unwrap_or_else(PoisonError::into_inner);
            pass.running = false;
            // After shutdown the re-run stays queued for `flush` to pick up.
            if this.shut_down.load(Ordering::SeqCst) {
                None
            } else {
                pass.rerun.take()
            }
        };
        if let Some(key) = rerun {
            let delay = this.config.incremental_delay;
            Inner::arm(&this, key, delay);
        }
    }
}
