//! Per-subprocess supervisor-side state: spawning, readiness, task accounting,
//! and termination for a single worker process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use crate::errors::{ComputeTimeoutError, PoolError, ProtocolError, WorkerCrashError, WorkerStartupError};
use crate::task::{ComputeResult, ComputeTask, WireRequest, WireResponse};

/// A notice delivered to the pool's janitor task when a worker's child process exits.
///
/// Handles never hold a reference back to the pool; instead they fire this
/// notice over a channel and let the pool decide, by identity, whether the
/// exit represents a crash it needs to react to.
#[derive(Debug, Clone)]
pub struct WorkerExitNotice {
    pub worker_id: String,
    pub exit_code: Option<i32>,
}

/// Supervisor-side proxy for a single worker child process.
///
/// Lifecycle: Spawning -> Ready -> Terminating -> Dead. `ready`,
/// `tasks_processed`, and `terminating` are atomics so that concurrent
/// `compute()` calls and the pool's acquisition loop never need to take a lock
/// just to inspect a handle's state.
pub struct WorkerHandle {
    id: String,
    socket_path: PathBuf,
    pid: u32,
    ready: AtomicBool,
    tasks_processed: AtomicU64,
    terminating: AtomicBool,
    pending_tasks: AtomicUsize,
    exited: Arc<Notify>,
    exit_code: AtomicI64,
}

const NO_EXIT: i64 = i64::MIN;

impl WorkerHandle {
    /// Forks the worker binary with `socket_path` as its sole argument.
    ///
    /// The child's environment is reset to empty and stdio is inherited for
    /// diagnostics. Returns immediately — the caller must still await
    /// [`WorkerHandle::wait_for_ready`].
    pub fn spawn(
        worker_binary: &Path,
        work_dir: &Path,
        on_exit: mpsc::UnboundedSender<WorkerExitNotice>,
    ) -> Result<Arc<WorkerHandle>, PoolError> {
        let id = new_handle_id();
        let socket_path = work_dir.join(format!("{id}.sock"));

        let mut command = Command::new(worker_binary);
        command
            .arg(&socket_path)
            .env_clear()
            .stdin(std::process::Stdio::inherit())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| {
            PoolError::WorkerStartup(WorkerStartupError::new(
                format!("failed to spawn worker binary {}: {e}", worker_binary.display()),
                Some(socket_path.clone()),
            ))
        })?;

        let pid = child.id().ok_or_else(|| {
            PoolError::WorkerStartup(WorkerStartupError::new(
                "worker process exited before its pid could be read",
                Some(socket_path.clone()),
            ))
        })?;

        let handle = Arc::new(WorkerHandle {
            id: id.clone(),
            socket_path,
            pid,
            ready: AtomicBool::new(false),
            tasks_processed: AtomicU64::new(0),
            terminating: AtomicBool::new(false),
            pending_tasks: AtomicUsize::new(0),
            exited: Arc::new(Notify::new()),
            exit_code: AtomicI64::new(NO_EXIT),
        });

        // Reaper: the only task that ever touches the owned `Child`. Runs for the
        // lifetime of the process and is the sole source of truth for "has this
        // worker's process exited".
        let reaper_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit_code = status.ok().and_then(|s| s.code());
            reaper_handle
                .exit_code
                .store(exit_code.map(i64::from).unwrap_or(-1), Ordering::SeqCst);
            reaper_handle.exited.notify_waiters();
            let _ = on_exit.send(WorkerExitNotice {
                worker_id: reaper_handle.id.clone(),
                exit_code,
            });
        });

        Ok(handle)
    }

    /// Unique handle id (16 hex chars), also used as the socket file's stem.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The absolute path of this worker's Unix-domain socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the handle has observed its socket file and may serve tasks.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of tasks accepted by this handle so far.
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Acquire)
    }

    /// Whether `schedule_termination` or `terminate` has been called.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Whether the reaper has observed the child process exit.
    pub fn has_exited(&self) -> bool {
        self.exit_code.load(Ordering::Acquire) != NO_EXIT
    }

    /// Polls for the socket file with geometric backoff (20ms * attempt).
    pub async fn wait_for_ready(&self, readiness_timeout: Duration) -> Result<(), PoolError> {
        let deadline = tokio::time::Instant::now() + readiness_timeout;
        let mut attempt: u32 = 1;
        loop {
            if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
                self.ready.store(true, Ordering::Release);
                return Ok(());
            }
            if self.has_exited() {
                return Err(PoolError::WorkerStartup(WorkerStartupError::new(
                    format!("worker {} exited before becoming ready", self.id),
                    Some(self.socket_path.clone()),
                )));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(PoolError::WorkerStartup(WorkerStartupError::new(
                    format!(
                        "worker {} did not become ready within {:?}",
                        self.id, readiness_timeout
                    ),
                    Some(self.socket_path.clone()),
                )));
            }
            let backoff = Duration::from_millis(20 * u64::from(attempt));
            tokio::time::sleep(backoff.min(deadline - now)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Records that this handle accepted a task; returns the new task count.
    ///
    /// Called by the pool manager exactly once per accepted `compute()` call,
    /// before the fresh connection is opened.
    pub fn record_task_accepted(&self) -> u64 {
        self.pending_tasks.fetch_add(1, Ordering::AcqRel);
        self.tasks_processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Opens a fresh connection to the worker's socket, performs one
    /// request/response exchange, and enforces `task.timeout`. Each call is
    /// independent; the handle supports multiple concurrent connections.
    pub async fn compute(&self, task: &ComputeTask) -> Result<ComputeResult, PoolError> {
        let outcome = timeout(task.timeout, self.exchange(task)).await;
        self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
        self.maybe_fire_deferred_sigterm();

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // A timed-out call leaves its request abandoned mid-flight on
                // the worker side; the handle is tainted and must not be
                // handed to another caller.
                self.schedule_termination();
                Err(PoolError::ComputeTimeout(ComputeTimeoutError::new(
                    task.timeout.as_millis() as u64,
                )))
            }
        }
    }

    async fn exchange(&self, task: &ComputeTask) -> Result<ComputeResult, PoolError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.transport_error(format!("failed to connect to worker socket: {e}")))?;

        let request = WireRequest::from(task);
        let payload = serde_json::to_vec(&request)
            .map_err(|e| PoolError::Protocol(ProtocolError::new(format!("failed to encode request: {e}"))))?;
        stream
            .write_all(&payload)
            .await
            .map_err(|e| self.transport_error(format!("failed to write request: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| self.transport_error(format!("failed to half-close request: {e}")))?;

        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;

        let response: WireResponse = serde_json::from_slice(&buf).map_err(|e| {
            PoolError::Protocol(ProtocolError::new(format!(
                "malformed worker response ({} bytes): {e}",
                buf.len()
            )))
        })?;

        match response {
            WireResponse::Result { result } => Ok(result),
            WireResponse::Error { error } => Err(PoolError::UserCompute(error.into())),
        }
    }

    /// Maps a transport-level IO failure talking to this handle's socket to a
    /// retryable crash error. A connect refusal or a broken pipe mid-exchange
    /// means the worker behind this handle is gone or going; the caller
    /// should retry against a fresh handle rather than see a bare IO error.
    fn transport_error(&self, message: String) -> PoolError {
        tracing::debug!(worker_id = %self.id, %message, "transport error talking to worker socket");
        PoolError::WorkerCrash(WorkerCrashError::new(self.id.clone(), None))
    }

    /// Marks the handle *Terminating* and arranges for SIGTERM to be sent once
    /// in-flight tasks drain to zero. Idempotent: a second call is a no-op,
    /// guarded by `compare_exchange` so it cannot re-enter and double-signal
    /// the child.
    pub fn schedule_termination(&self) {
        if self
            .terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.maybe_fire_deferred_sigterm();
    }

    fn maybe_fire_deferred_sigterm(&self) {
        if self.terminating.load(Ordering::Acquire) && self.pending_tasks.load(Ordering::Acquire) == 0 {
            self.send_signal(libc::SIGTERM);
        }
    }

    /// Unconditionally terminates the child: SIGTERM, then SIGKILL after
    /// `kill_timeout` if the process hasn't exited. Never returns an error —
    /// escalation failures are swallowed, matching `Pool::stop`'s best-effort
    /// contract.
    pub async fn terminate(&self, kill_timeout: Duration) {
        self.terminating.store(true, Ordering::Release);

        // `notified()` must be constructed before the liveness check below so that
        // an exit racing concurrently with this call is never missed: tokio
        // guarantees a `Notified` future observes any notification sent after its
        // construction, even if that happens before the future is first polled.
        let notified = self.exited.notified();
        if self.has_exited() {
            return;
        }
        self.send_signal(libc::SIGTERM);
        if timeout(kill_timeout, notified).await.is_ok() {
            return;
        }
        if self.has_exited() {
            return;
        }

        tracing::warn!(worker_id = %self.id, "worker did not exit within kill_timeout, escalating to SIGKILL");
        let notified = self.exited.notified();
        if self.has_exited() {
            return;
        }
        self.send_signal(libc::SIGKILL);
        notified.await;
        self.remove_socket_file().await;
    }

    /// Best-effort cleanup of this worker's socket file; never errors.
    pub async fn remove_socket_file(&self) {
        let _ = tokio::fs::remove_file(&self.socket_path).await;
    }

    fn send_signal(&self, signal: libc::c_int) {
        // SAFETY: `pid` came from `Child::id()` for a process this handle owns;
        // sending a signal to a pid that has already exited is a harmless ESRCH.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(worker_id = %self.id, signal, error = %err, "failed to signal worker");
            }
        }
    }
}

fn new_handle_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_ids_are_sixteen_hex_chars() {
        for _ in 0..32 {
            let id = new_handle_id();
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
