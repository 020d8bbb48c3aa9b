//! Listener startup.
//!
//! Each [`ConnectorSpec`] becomes one axum-server task with its own
//! [`Handle`]. Plain listeners serve the application (or the HTTPS redirect),
//! TLS listeners terminate TLS with the keystore entry through rustls.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

use crate::connector::{ConnectorSpec, Protocol};
use crate::error::{BootstrapError, LifecycleError, Result};
use crate::keystore::Keystore;

use super::idle::IdleTimeoutAcceptor;
use super::redirect;

pub(crate) type ServeTask = JoinHandle<Result<(), LifecycleError>>;

/// A bound listener
pub(crate) struct Listener {
    pub handle: Handle,
    pub task: ServeTask,
    pub addr: SocketAddr,
}

/// rustls needs a process-wide provider when more than one is compiled in.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

async fn resolve(spec: &ConnectorSpec) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((spec.host.as_str(), spec.port))
        .await
        .map_err(|e| BootstrapError::io(format!("Can't resolve {}:{}", spec.host, spec.port), e))?;
    addrs.next().ok_or_else(|| {
        LifecycleError::Resolve {
            host: spec.host.clone(),
            port: spec.port,
        }
        .into()
    })
}

async fn rustls_config(keystore: &Keystore, alias: &str) -> Result<RustlsConfig> {
    let (name, entry) = keystore.entry_for(alias)?;
    let (chain, key) = entry.to_der()?;
    tracing::debug!(alias = %name, chain_len = chain.len(), "Loading TLS identity");
    RustlsConfig::from_der(chain, key)
        .await
        .map_err(|e| LifecycleError::TlsConfig(e.to_string()).into())
}

/// Router served by `spec`: the redirect when requested, `app` otherwise.
fn connector_router(spec: &ConnectorSpec, app: &Router, redirect_to_tls: bool) -> Router {
    let router = match spec.secure_redirect() {
        Some(target) if redirect_to_tls => redirect::redirect_router(target),
        _ => app.clone(),
    };
    match spec.blocking_timeout {
        Some(timeout) => router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        )),
        None => router,
    }
}

/// Bind every connector and wait until each one is listening.
///
/// On failure, listeners already started are shut down before returning.
pub(crate) async fn start_listeners(
    connectors: &[ConnectorSpec],
    app: &Router,
    redirect_to_tls: bool,
) -> Result<Vec<Listener>> {
    ensure_crypto_provider();

    let mut listeners: Vec<Listener> = Vec::with_capacity(connectors.len());
    for spec in connectors {
        match start_listener(spec, app, redirect_to_tls).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                for listener in &listeners {
                    listener.handle.shutdown();
                }
                return Err(e);
            }
        }
    }
    Ok(listeners)
}

async fn start_listener(spec: &ConnectorSpec, app: &Router, redirect_to_tls: bool) -> Result<Listener> {
    let addr = resolve(spec).await?;
    let router = connector_router(spec, app, redirect_to_tls);
    let handle = Handle::new();
    let idle = IdleTimeoutAcceptor::new(spec.idle_timeout);
    let kind = spec.kind();

    let task: ServeTask = match &spec.protocol {
        Protocol::Plain { .. } => {
            let server = axum_server::bind(addr).acceptor(idle).handle(handle.clone());
            tokio::spawn(async move {
                server
                    .serve(router.into_make_service())
                    .await
                    .map_err(|e| LifecycleError::Server(format!("{kind} listener on {addr}: {e}")))
            })
        }
        Protocol::Tls { keystore, alias } => {
            let config = rustls_config(keystore, alias).await?;
            let acceptor = RustlsAcceptor::new(config).acceptor(idle);
            let server = axum_server::bind(addr).acceptor(acceptor).handle(handle.clone());
            tokio::spawn(async move {
                server
                    .serve(router.into_make_service())
                    .await
                    .map_err(|e| LifecycleError::Server(format!("{kind} listener on {addr}: {e}")))
            })
        }
    };

    match handle.listening().await {
        Some(bound) => {
            tracing::debug!(%kind, %bound, "Listener started");
            Ok(Listener {
                handle,
                task,
                addr: bound,
            })
        }
        None => {
            let error = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => LifecycleError::Server(format!("{kind} listener on {addr} exited")),
                Err(e) => LifecycleError::Server(format!("{kind} listener on {addr}: {e}")),
            };
            Err(error.into())
        }
    }
}

/// Wait for a listener task, flattening panics into lifecycle errors.
pub(crate) async fn wait(task: ServeTask) -> Result<(), LifecycleError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(LifecycleError::Server(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    fn plain_spec(blocking_timeout: Option<Duration>) -> ConnectorSpec {
        ConnectorSpec {
            host: "127.0.0.1".to_string(),
            port: 0,
            protocol: Protocol::Plain {
                secure_redirect: None,
            },
            idle_timeout: None,
            blocking_timeout,
        }
    }

    fn slow_app() -> Router {
        Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "done"
            }),
        )
    }

    async fn status(router: Router) -> StatusCode {
        router
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn blocking_timeout_answers_request_timeout() {
        let spec = plain_spec(Some(Duration::from_millis(20)));
        let router = connector_router(&spec, &slow_app(), false);
        assert_eq!(status(router).await, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn no_blocking_timeout_waits_for_handler() {
        let router = connector_router(&plain_spec(None), &slow_app(), false);
        assert_eq!(status(router).await, StatusCode::OK);
    }
}
