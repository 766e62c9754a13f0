//! Worker binary entry point.
//!
//! Invoked by the supervisor as `taskpool-worker <socket_path>`. Resolves
//! `module_url`s through an in-process registry of reference modules — a real
//! deployment would build a different binary linking its own
//! [`taskpool::ModuleLoader`] instead of reusing this one.

use std::path::PathBuf;
use std::sync::Arc;

use taskpool::module_loader::RegistryModuleLoader;
use taskpool::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "observability")]
    taskpool::observability::init_default();

    let socket_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: taskpool-worker <socket_path>"))?;

    let loader = Arc::new(RegistryModuleLoader::with_reference_modules());
    worker::serve(&socket_path, loader).await
}
