//! The module-loader seam.
//!
//! Resolving a `module_url` to an executable `compute` entry point, and actually
//! sandboxing that entry point against the host, is treated as a black-box
//! external collaborator rather than something this crate implements. This
//! module defines the trait boundary a real loader (a WASM engine, an embedded
//! scripting VM, whatever the embedding application wants) plugs into, plus a
//! small in-process reference loader used by this crate's own tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::UserComputeError;

/// Opaque evaluation context handed to a [`ComputeModule`] alongside its params.
///
/// Owned by the caller for the lifetime of one `compute` invocation and must be
/// finalized after the call completes, win or lose. The reference loader's
/// context carries nothing; a real sandboxing loader would stash per-call
/// resources (a VM instance, a memory arena, a cancellation handle) here instead.
#[derive(Default)]
pub struct EvalContext {
    _private: (),
}

impl EvalContext {
    /// Construct an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release ctx-scoped resources. Called by the worker's IPC loop exactly once
    /// per connection, after `compute` returns (successfully or not).
    pub async fn finalize(self) {}
}

/// A resolved, invocable compute module.
#[async_trait]
pub trait ComputeModule: Send + Sync {
    /// Invoke the module's `compute` export with the caller's params.
    async fn compute(&self, params: Value, ctx: &EvalContext) -> Result<Value, UserComputeError>;
}

/// Resolves a `module_url` to a [`ComputeModule`].
///
/// Implementations are free to fetch code over the network, read it from disk,
/// or — as with [`RegistryModuleLoader`] — simply look it up in memory. A real
/// deployment swaps this for something that actually sandboxes untrusted code.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Resolve `module_url` to an executable module.
    async fn load(&self, module_url: &str) -> anyhow::Result<Arc<dyn ComputeModule>>;
}

/// An in-process loader backed by a name -> module map, keyed by the
/// `registry://<name>` scheme. This is the reference implementation used by
/// this crate's own integration tests; it performs no sandboxing whatsoever
/// and must never be used to run untrusted code.
#[derive(Clone, Default)]
pub struct RegistryModuleLoader {
    modules: HashMap<String, Arc<dyn ComputeModule>>,
}

impl RegistryModuleLoader {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `registry://{name}`.
    pub fn register(mut self, name: impl Into<String>, module: Arc<dyn ComputeModule>) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// A registry pre-populated with the reference modules used in this crate's
    /// end-to-end tests: `echo`, `crash`, `sleep`, and `sleep_forever`.
    pub fn with_reference_modules() -> Self {
        Self::new()
            .register("echo", Arc::new(reference::Echo))
            .register("crash", Arc::new(reference::Crash))
            .register("sleep", Arc::new(reference::Sleep))
            .register("sleep_forever", Arc::new(reference::SleepForever))
    }
}

#[async_trait]
impl ModuleLoader for RegistryModuleLoader {
    async fn load(&self, module_url: &str) -> anyhow::Result<Arc<dyn ComputeModule>> {
        let name = module_url
            .strip_prefix("registry://")
            .ok_or_else(|| anyhow::anyhow!("unsupported module url scheme: {module_url}"))?;
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no module registered under registry://{name}"))
    }
}

/// Reference modules used only by this crate's own tests and examples.
pub mod reference {
    use super::*;

    /// `compute(p) = { "greeting": "Hello, " + p.name }`.
    pub struct Echo;

    #[async_trait]
    impl ComputeModule for Echo {
        async fn compute(&self, params: Value, _ctx: &EvalContext) -> Result<Value, UserComputeError> {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| UserComputeError::new("TypeError", "params.name must be a string", 400))?;
            Ok(serde_json::json!({ "greeting": format!("Hello, {name}") }))
        }
    }

    /// Exits the worker process immediately, simulating a crashing module.
    pub struct Crash;

    #[async_trait]
    impl ComputeModule for Crash {
        async fn compute(&self, _params: Value, _ctx: &EvalContext) -> Result<Value, UserComputeError> {
            std::process::exit(1);
        }
    }

    /// Sleeps for `params.ms` milliseconds, then returns `{"slept_ms": ms}`.
    pub struct Sleep;

    #[async_trait]
    impl ComputeModule for Sleep {
        async fn compute(&self, params: Value, _ctx: &EvalContext) -> Result<Value, UserComputeError> {
            let ms = params
                .get("ms")
                .and_then(Value::as_u64)
                .ok_or_else(|| UserComputeError::new("TypeError", "params.ms must be a non-negative integer", 400))?;
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(serde_json::json!({ "slept_ms": ms }))
        }
    }

    /// Awaits an unresolvable future, exercising the supervisor's compute timeout.
    pub struct SleepForever;

    #[async_trait]
    impl ComputeModule for SleepForever {
        async fn compute(&self, _params: Value, _ctx: &EvalContext) -> Result<Value, UserComputeError> {
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_greeting() {
        let loader = RegistryModuleLoader::with_reference_modules();
        let module = loader.load("registry://echo").await.unwrap();
        let ctx = EvalContext::new();
        let result = module
            .compute(serde_json::json!({"name": "World"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"greeting": "Hello, World"}));
        ctx.finalize().await;
    }

    #[tokio::test]
    async fn echo_rejects_missing_name() {
        let loader = RegistryModuleLoader::with_reference_modules();
        let module = loader.load("registry://echo").await.unwrap();
        let ctx = EvalContext::new();
        let err = module.compute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn sleep_reports_elapsed_time() {
        let loader = RegistryModuleLoader::with_reference_modules();
        let module = loader.load("registry://sleep").await.unwrap();
        let ctx = EvalContext::new();
        let result = module.compute(serde_json::json!({"ms": 5}), &ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"slept_ms": 5}));
    }

    #[tokio::test]
    async fn unknown_module_url_fails_to_resolve() {
        let loader = RegistryModuleLoader::with_reference_modules();
        assert!(loader.load("registry://does-not-exist").await.is_err());
        assert!(loader.load("https://example.com/mod.js").await.is_err());
    }
}
