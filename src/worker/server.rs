//! The worker-side IPC loop: accept connections on a Unix-domain socket, read
//! one JSON request per connection, resolve and invoke the named compute
//! module, and write back one JSON response.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use crate::module_loader::{EvalContext, ModuleLoader};
use crate::task::{WireError, WireRequest, WireResponse};

/// Binds `socket_path` and serves requests until SIGTERM is received.
///
/// Connections are handled one at a time on the accept loop's task but each
/// request spawns its own task, so a slow or hung module invocation never
/// blocks new connections from being accepted.
pub async fn serve(socket_path: &Path, loader: Arc<dyn ModuleLoader>) -> anyhow::Result<()> {
    if tokio::fs::try_exists(socket_path).await.unwrap_or(false) {
        tokio::fs::remove_file(socket_path).await?;
    }
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket = %socket_path.display(), "worker listening");

    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let loader = Arc::clone(&loader);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, loader).await {
                        tracing::warn!(error = %err, "connection handling failed");
                    }
                });
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    let _ = tokio::fs::remove_file(socket_path).await;
    Ok(())
}

async fn handle_connection(mut stream: UnixStream, loader: Arc<dyn ModuleLoader>) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;

    let response = match serde_json::from_slice::<WireRequest>(&buf) {
        Ok(request) => dispatch(request, loader).await,
        Err(err) => WireResponse::Error {
            error: WireError {
                name: "ProtocolError".into(),
                message: format!("malformed request: {err}"),
                status: 400,
            },
        },
    };

    let payload = serde_json::to_vec(&response)?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn dispatch(request: WireRequest, loader: Arc<dyn ModuleLoader>) -> WireResponse {
    let module = match loader.load(&request.module_url).await {
        Ok(module) => module,
        Err(err) => {
            return WireResponse::Error {
                error: WireError {
                    name: "ModuleLoadError".into(),
                    message: err.to_string(),
                    status: 500,
                },
            }
        }
    };

    let ctx = EvalContext::new();
    let outcome = module.compute(request.params, &ctx).await;
    ctx.finalize().await;

    match outcome {
        Ok(result) => WireResponse::Result { result },
        Err(err) => WireResponse::Error { error: err.into() },
    }
}
