//! Supervises a pool of subprocess workers that execute untrusted compute
//! modules in isolation, talking to each over a private Unix-domain socket.
//!
//! A [`pool::Pool`] keeps `config.pool_size` workers warm, load-balances
//! [`task::ComputeTask`]s across them in FIFO order, enforces per-task and
//! per-acquisition deadlines, and recycles or replaces workers as they wear
//! out or crash. Resolving a task's `module_url` into executable code — and
//! actually sandboxing it — is left to a [`module_loader::ModuleLoader`]
//! the embedding application supplies; this crate only ships an in-process
//! reference loader for its own tests.

pub mod config;
pub mod errors;
pub mod module_loader;
pub mod pool;
pub mod task;
pub mod worker;

#[cfg(feature = "observability")]
pub mod observability;

pub use config::PoolConfig;
pub use errors::{PoolError, Result};
pub use module_loader::{ComputeModule, EvalContext, ModuleLoader, RegistryModuleLoader};
pub use pool::{Pool, PoolEvent, PoolStats};
pub use task::{ComputeResult, ComputeTask};
