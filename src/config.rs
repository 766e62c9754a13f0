//! Pool configuration
//!
//! `PoolConfig` is a plain, programmatically-constructed struct: this crate
//! does not parse config files or environment variables itself — the
//! embedding application builds a `PoolConfig` however it likes and hands it
//! to [`crate::pool::Pool::new`].

use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

/// Default kill-escalation timeout: SIGTERM -> SIGKILL.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default acquisition deadline.
pub const DEFAULT_QUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default readiness poll deadline for a freshly spawned worker.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of tasks a worker serves before being recycled.
pub const DEFAULT_RECYCLE_THRESHOLD: u64 = 500;
/// Default number of times a crashed task is retried against a fresh worker.
pub const DEFAULT_RETRIES: usize = 1;

/// Immutable-after-`start()` configuration for a [`crate::pool::Pool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Directory under which per-worker Unix-domain sockets are created.
    pub work_dir: PathBuf,
    /// Number of warm workers the pool maintains.
    pub pool_size: NonZeroUsize,
    /// SIGTERM -> SIGKILL escalation window per worker.
    pub kill_timeout: Duration,
    /// Deadline for `compute()` to acquire a warm worker.
    pub queue_wait_timeout: Duration,
    /// Number of tasks a worker serves before it is recycled.
    pub recycle_threshold: NonZeroU64,
    /// Deadline for a freshly spawned worker's socket to appear.
    pub readiness_timeout: Duration,
    /// Additional attempts against a fresh worker after a crash/transport error.
    pub retries: usize,
    /// Path to the worker binary; spawned as `argv = [worker_binary, socket_path]`.
    pub worker_binary: PathBuf,
}

impl PoolConfig {
    /// Start building a configuration with the given work directory and worker binary.
    ///
    /// All other fields take their documented defaults and can be overridden with the
    /// builder methods below.
    pub fn new(work_dir: impl Into<PathBuf>, worker_binary: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            pool_size: NonZeroUsize::new(4).unwrap(),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            queue_wait_timeout: DEFAULT_QUEUE_WAIT_TIMEOUT,
            recycle_threshold: NonZeroU64::new(DEFAULT_RECYCLE_THRESHOLD).unwrap(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            retries: DEFAULT_RETRIES,
            worker_binary: worker_binary.into(),
        }
    }

    /// Set the number of warm workers to maintain.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = NonZeroUsize::new(size).expect("pool_size must be >= 1");
        self
    }

    /// Set the SIGTERM -> SIGKILL escalation window.
    pub fn kill_timeout(mut self, duration: Duration) -> Self {
        self.kill_timeout = duration;
        self
    }

    /// Set the acquisition deadline.
    pub fn queue_wait_timeout(mut self, duration: Duration) -> Self {
        self.queue_wait_timeout = duration;
        self
    }

    /// Set the per-worker recycle threshold.
    pub fn recycle_threshold(mut self, threshold: u64) -> Self {
        self.recycle_threshold = NonZeroU64::new(threshold).expect("recycle_threshold must be >= 1");
        self
    }

    /// Set the readiness poll deadline.
    pub fn readiness_timeout(mut self, duration: Duration) -> Self {
        self.readiness_timeout = duration;
        self
    }

    /// Set the number of retries against a fresh worker after a crash/transport error.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_overrides() {
        let config = PoolConfig::new("/tmp/taskpool", "/usr/local/bin/taskpool-worker")
            .pool_size(8)
            .recycle_threshold(10)
            .retries(2);

        assert_eq!(config.pool_size.get(), 8);
        assert_eq!(config.recycle_threshold.get(), 10);
        assert_eq!(config.retries, 2);
        assert_eq!(config.kill_timeout, DEFAULT_KILL_TIMEOUT);
    }

    #[test]
    #[should_panic(expected = "pool_size must be >= 1")]
    fn zero_pool_size_panics() {
        PoolConfig::new("/tmp/taskpool", "/bin/true").pool_size(0);
    }
}
