//! The pool manager: acquires warm workers for callers, keeps the ring topped
//! up, recycles workers past their task threshold, and reacts to crashes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::config::PoolConfig;
use crate::errors::{InvalidStateError, PoolError, QueueTimeoutError, WorkerCrashError};
use crate::pool::events::{new_event_channel, PoolEvent};
use crate::pool::handle::{WorkerExitNotice, WorkerHandle};
use crate::task::{ComputeResult, ComputeTask};

/// A waiter blocked in [`Pool::compute`] waiting for a warm handle.
type Waiter = oneshot::Sender<Arc<WorkerHandle>>;

struct PoolInner {
    ring: VecDeque<Arc<WorkerHandle>>,
    waiters: VecDeque<Waiter>,
    /// Workers scheduled for termination but not yet reaped; kept alive here so
    /// the pool can still account for them when computing how many replacements
    /// to spawn.
    retiring: Vec<Arc<WorkerHandle>>,
}

/// A snapshot of pool occupancy, useful for dashboards and tests.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub warm_workers: usize,
    pub waiting_callers: usize,
    pub total_spawned: u64,
}

/// Supervises a fixed-size ring of warm worker subprocesses.
///
/// Cloning a `Pool` is cheap and shares the same underlying state — clones are
/// meant to be handed to multiple callers the way a connection pool handle is.
#[derive(Clone)]
pub struct Pool {
    config: Arc<PoolConfig>,
    inner: Arc<Mutex<PoolInner>>,
    running: Arc<AtomicBool>,
    repopulating: Arc<AtomicBool>,
    total_spawned: Arc<AtomicU64>,
    /// Workers currently spawned and not yet reaped, warm or retiring.
    /// The target `trigger_repopulation` tries to keep at `pool_size`.
    live: Arc<AtomicU64>,
    events_tx: broadcast::Sender<PoolEvent>,
    exit_tx: mpsc::UnboundedSender<WorkerExitNotice>,
    exit_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<WorkerExitNotice>>>>,
}

impl Pool {
    /// Construct a pool from `config`. No workers are spawned until [`Pool::start`].
    pub fn new(config: PoolConfig) -> Self {
        let (events_tx, _events_rx) = new_event_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(PoolInner {
                ring: VecDeque::new(),
                waiters: VecDeque::new(),
                retiring: Vec::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            repopulating: Arc::new(AtomicBool::new(false)),
            total_spawned: Arc::new(AtomicU64::new(0)),
            live: Arc::new(AtomicU64::new(0)),
            events_tx,
            exit_tx,
            exit_rx: Arc::new(Mutex::new(Some(exit_rx))),
        }
    }

    /// Subscribe to lifecycle events. Lagging subscribers silently drop the
    /// oldest events rather than block the pool.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    /// Returns a point-in-time snapshot of occupancy.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            warm_workers: inner.ring.len(),
            waiting_callers: inner.waiters.len(),
            total_spawned: self.total_spawned.load(Ordering::Acquire),
        }
    }

    /// Spawns `pool_size` workers and starts the janitor task that watches for
    /// crashes. Idempotent: calling `start` twice on an already-running pool is
    /// a no-op.
    pub async fn start(&self) -> Result<(), PoolError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut exit_rx = self
            .exit_rx
            .lock()
            .await
            .take()
            .expect("start() called twice past the running guard");
        let janitor_pool = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = exit_rx.recv().await {
                janitor_pool.on_worker_exit(notice).await;
            }
        });

        for _ in 0..self.config.pool_size.get() {
            self.spawn_and_enqueue().await;
        }

        Ok(())
    }

    /// Stops the pool: no further work is accepted, every warm and retiring
    /// worker is terminated, and any queued waiters are dropped (their
    /// `compute()` calls observe a closed channel and surface
    /// [`PoolError::InvalidState`]). Best-effort: individual terminate()
    /// failures are swallowed, mirroring [`WorkerHandle::terminate`].
    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let handles: Vec<Arc<WorkerHandle>> = {
            let mut inner = self.inner.lock().await;
            inner.waiters.clear();
            let mut all: Vec<Arc<WorkerHandle>> = inner.ring.drain(..).collect();
            all.extend(inner.retiring.drain(..));
            all
        };

        let kill_timeout = self.config.kill_timeout;
        let mut terminations = Vec::with_capacity(handles.len());
        for handle in handles {
            terminations.push(tokio::spawn(async move {
                handle.terminate(kill_timeout).await;
            }));
        }
        for join in terminations {
            let _ = join.await;
        }
    }

    /// Runs `task` against a warm worker, retrying against a fresh worker up to
    /// `config.retries` times if the chosen worker crashes or returns a
    /// malformed response.
    pub async fn compute(&self, task: ComputeTask) -> Result<ComputeResult, PoolError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(PoolError::InvalidState(InvalidStateError::new(
                "pool is not running",
            )));
        }

        let mut last_err = None;
        for attempt in 0..=self.config.retries {
            let handle = self.acquire_handle().await?;
            handle.record_task_accepted();

            match handle.compute(&task).await {
                Ok(result) => {
                    self.maybe_recycle(&handle).await;
                    self.return_handle(handle).await;
                    return Ok(result);
                }
                Err(err) => {
                    self.maybe_recycle(&handle).await;
                    let retryable = err.is_retryable();
                    if handle.has_exited() {
                        self.retire_handle(handle).await;
                    } else {
                        self.return_handle(handle).await;
                    }
                    if !retryable || attempt == self.config.retries {
                        return Err(err);
                    }
                    tracing::debug!(attempt, error = %err, "retrying compute against a fresh worker");
                    last_err = Some(err);
                }
            }
        }

        // Unreachable in practice: the loop above always returns. Kept as a
        // defensive fallback so this function remains total.
        Err(last_err.unwrap_or_else(|| {
            PoolError::WorkerCrash(WorkerCrashError::new("unknown", None))
        }))
    }

    /// Pops a warm handle off the front of the ring, or registers as a waiter
    /// and blocks until one is offered, or `queue_wait_timeout` elapses.
    async fn acquire_handle(&self) -> Result<Arc<WorkerHandle>, PoolError> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(handle) = inner.ring.pop_front() {
                drop(inner);
                self.trigger_repopulation();
                return Ok(handle);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        self.trigger_repopulation();

        match tokio::time::timeout(self.config.queue_wait_timeout, rx).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(_)) | Err(_) => {
                let waited_ms = self.config.queue_wait_timeout.as_millis() as u64;
                Err(PoolError::QueueTimeout(QueueTimeoutError::new(waited_ms)))
            }
        }
    }

    /// Returns `handle` to the ring, or hands it directly to the
    /// longest-waiting caller if one is queued. Never offers a handle that has
    /// been scheduled for termination.
    async fn return_handle(&self, handle: Arc<WorkerHandle>) {
        if handle.is_terminating() {
            self.retire_handle(handle).await;
            return;
        }

        let mut inner = self.inner.lock().await;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Arc::clone(&handle)) {
                Ok(()) => return,
                Err(_) => continue, // waiter's compute() already timed out
            }
        }
        inner.ring.push_back(handle);
    }

    async fn retire_handle(&self, handle: Arc<WorkerHandle>) {
        handle.schedule_termination();
        self.inner.lock().await.retiring.push(handle);
        self.trigger_repopulation();
    }

    /// Recycles `handle` once it has served `recycle_threshold` tasks. The
    /// handle is scheduled for termination immediately but is only actually
    /// removed from circulation once the caller returns or retires it, so a
    /// task that is in flight when the threshold is crossed still completes
    /// normally.
    async fn maybe_recycle(&self, handle: &Arc<WorkerHandle>) {
        if handle.tasks_processed() >= self.config.recycle_threshold.get() && !handle.is_terminating() {
            handle.schedule_termination();
            let _ = self.events_tx.send(PoolEvent::OnRecycle {
                worker_id: handle.id().to_string(),
            });
        }
    }

    /// Reacts to a worker's child process exiting. A crash while the handle
    /// was warm or retiring needs a replacement; a clean exit during
    /// `stop()`/recycle does not.
    async fn on_worker_exit(&self, notice: WorkerExitNotice) {
        let _ = self.events_tx.send(PoolEvent::OnWorkerExit {
            worker_id: notice.worker_id.clone(),
            exit_code: notice.exit_code,
        });

        let was_recognized = {
            let mut inner = self.inner.lock().await;
            let before = inner.ring.len() + inner.retiring.len();
            inner.ring.retain(|h| h.id() != notice.worker_id);
            inner.retiring.retain(|h| h.id() != notice.worker_id);
            before != inner.ring.len() + inner.retiring.len()
        };

        if was_recognized {
            self.live.fetch_sub(1, Ordering::AcqRel);
            if self.running.load(Ordering::Acquire) {
                self.trigger_repopulation();
            }
        }
    }

    /// Spawns replacement workers until `live` is back up to `pool_size`.
    /// Guarded by a single-flight flag so concurrent triggers don't overshoot
    /// the target; a worker that exits mid-repopulation re-triggers itself via
    /// `on_worker_exit`.
    fn trigger_repopulation(&self) {
        if self
            .repopulating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            while pool.running.load(Ordering::Acquire)
                && pool.live.load(Ordering::Acquire) < pool.config.pool_size.get() as u64
            {
                pool.spawn_and_enqueue().await;
            }
            pool.repopulating.store(false, Ordering::Release);
        });
    }

    /// Spawns one worker, waits for readiness, and either offers it directly
    /// to a waiting caller or parks it in the ring. Spawn or readiness
    /// failures are logged and reported as an event rather than propagated —
    /// `trigger_repopulation`'s loop will simply try again.
    async fn spawn_and_enqueue(&self) {
        match self.spawn_one().await {
            Ok(handle) => {
                let _ = self.events_tx.send(PoolEvent::OnSpawn {
                    worker_id: handle.id().to_string(),
                });
                self.return_handle(handle).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn replacement worker");
                let _ = self.events_tx.send(PoolEvent::OnSpawnError {
                    message: err.to_string(),
                });
            }
        }
    }

    async fn spawn_one(&self) -> Result<Arc<WorkerHandle>, PoolError> {
        let handle = WorkerHandle::spawn(
            &self.config.worker_binary,
            &self.config.work_dir,
            self.exit_tx.clone(),
        )?;
        if let Err(err) = handle.wait_for_ready(self.config.readiness_timeout).await {
            // The process spawned but never became ready; it was never counted
            // in `live` and never entered the ring, so no bookkeeping elsewhere
            // needs to hear about its exit — just make sure it's actually dead.
            handle.terminate(self.config.kill_timeout).await;
            return Err(err);
        }
        self.total_spawned.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }
}

/// Directory layout helper: a unique socket-bearing work directory under `base`.
pub fn default_work_dir(base: impl Into<PathBuf>, pool_name: &str) -> PathBuf {
    base.into().join(format!("taskpool-{pool_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stats_on_fresh_pool_are_zero() {
        let config = PoolConfig::new("/tmp/taskpool-manager-test", "/bin/true");
        let pool = Pool::new(config);
        let stats = pool.stats().await;
        assert_eq!(stats.warm_workers, 0);
        assert_eq!(stats.waiting_callers, 0);
        assert_eq!(stats.total_spawned, 0);
    }

    #[tokio::test]
    async fn compute_before_start_is_invalid_state() {
        let config = PoolConfig::new("/tmp/taskpool-manager-test", "/bin/true");
        let pool = Pool::new(config);
        let task = ComputeTask::new("registry://echo", serde_json::json!({}), Duration::from_secs(1));
        let err = pool.compute(task).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidState(_)));
    }
}
