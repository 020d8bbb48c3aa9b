//! embark - embedded web server bootstrap
//!
//! Turns a declarative [`ServerConfig`] into running HTTP/HTTPS listeners
//! serving packaged or unpacked web applications and custom axum routers.
//! TLS material comes from a keystore, a key/certificate pair, or a
//! self-signed keystore generated on first start.

pub mod bootstrap;
pub mod config;
pub mod connector;
pub mod error;
pub mod handlers;
pub mod http;
pub mod keystore;
pub mod middleware;
pub mod tempdir;
pub mod validate;

pub use bootstrap::{Bootstrap, Lifecycle, ServerHandle};
pub use config::{ConnectorKind, ServerConfig, TlsConfig};
pub use error::{BootstrapError, LifecycleError, Result};
