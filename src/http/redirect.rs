//! HTTP to HTTPS redirect served on the plain listener.
//!
//! Used when `redirect_to_tls` is set: every request on the plain listener is
//! answered with a permanent redirect to the advertised secure port.

use axum::http::Uri;
use axum::response::Redirect;
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;

use crate::connector::SecureRedirect;

/// Router redirecting every request to `target`.
pub fn redirect_router(target: SecureRedirect) -> Router {
    Router::new().fallback(any(move |Host(host): Host, uri: Uri| async move {
        redirect_to_secure(&host, &uri, target)
    }))
}

fn secure_url(host: &str, uri: &Uri, target: SecureRedirect) -> String {
    // Remove port from host if present, keeping bracketed IPv6 literals intact
    let host_without_port = match host.rfind(':') {
        Some(idx) if !host[idx..].contains(']') => &host[..idx],
        _ => host,
    };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    if target.port == 443 {
        format!("{}://{}{}", target.scheme, host_without_port, path)
    } else {
        format!("{}://{}:{}{}", target.scheme, host_without_port, target.port, path)
    }
}

fn redirect_to_secure(host: &str, uri: &Uri, target: SecureRedirect) -> Redirect {
    let url = secure_url(host, uri, target);
    tracing::debug!(from = %uri, to = %url, "Redirecting HTTP to HTTPS");
    Redirect::permanent(&url)
}
