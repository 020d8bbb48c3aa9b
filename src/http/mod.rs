//! HTTP server plumbing.
//!
//! - Plain and TLS listeners (rustls) built from connector descriptors
//! - Connection idle timeout and per-request blocking timeout
//! - HTTP to HTTPS redirect on the plain listener
//! - Graceful shutdown on SIGTERM/SIGINT

mod idle;
mod redirect;
mod server;
mod shutdown;

pub use idle::{IdleTimeoutAcceptor, IdleTimeoutStream};
pub use redirect::redirect_router;
pub(crate) use server::{start_listeners, wait, Listener, ServeTask};
pub use shutdown::{spawn_shutdown_hook, termination_signal};
