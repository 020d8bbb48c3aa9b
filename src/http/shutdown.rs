//! Process termination hook.
//!
//! On SIGTERM or SIGINT every listener stops accepting new connections and
//! open connections get `stop_timeout` to complete. The hook also raises a
//! stop request so the facade blocked in `join` finishes with `stop`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;

/// Resolves with the name of the first termination signal received.
///
/// A signal that cannot be listened for is logged and never fires.
pub async fn termination_signal() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::error!(error = %e, "Can't listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::error!(error = %e, "Can't listen for SIGTERM");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}

/// Spawn a task stopping `handles` gracefully once `signal` resolves.
///
/// `stop_requested` is raised before the listeners are told to drain.
/// Must be called from within the server runtime.
pub fn spawn_shutdown_hook<F>(
    signal: F,
    handles: Vec<Handle>,
    stop_timeout: Duration,
    stop_requested: Arc<AtomicBool>,
) where
    F: Future<Output = &'static str> + Send + 'static,
{
    tokio::spawn(async move {
        let signal = signal.await;
        tracing::info!(
            signal,
            listeners = handles.len(),
            timeout_ms = stop_timeout.as_millis() as u64,
            "Stopping server"
        );
        stop_requested.store(true, Ordering::SeqCst);
        for handle in &handles {
            handle.graceful_shutdown(Some(stop_timeout));
        }
    });
}
