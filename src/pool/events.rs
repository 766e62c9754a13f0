//! Pool lifecycle events: `OnSpawn`, `OnRecycle`, `OnSpawnError`, `OnWorkerExit`.

use tokio::sync::broadcast;

/// A lifecycle event emitted by the [`super::manager::Pool`].
///
/// Delivered over a `broadcast` channel (see [`super::manager::Pool::subscribe`])
/// so that zero or more observers — test harnesses, metrics exporters, admin
/// tooling — can watch the pool without the pool holding a registry of callbacks.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker finished spawning and became ready.
    OnSpawn { worker_id: String },
    /// A worker was recycled after reaching `recycle_threshold`.
    OnRecycle { worker_id: String },
    /// A worker failed to spawn or never became ready.
    OnSpawnError { message: String },
    /// A worker's child process exited (cleanly or otherwise).
    OnWorkerExit { worker_id: String, exit_code: Option<i32> },
}

/// The default channel capacity for [`super::manager::Pool::subscribe`].
///
/// Lagging receivers drop the oldest events rather than block the pool;
/// observability is best-effort and must never slow down task dispatch.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn new_event_channel() -> (broadcast::Sender<PoolEvent>, broadcast::Receiver<PoolEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
