use std::io;

use crate::config::ConfigError;
use crate::keystore::KeystoreError;

/// Error returned by every fallible bootstrap operation.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl BootstrapError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        BootstrapError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        BootstrapError::Config(ConfigError::Validation(message.into()))
    }
}

/// Failures of the server lifecycle itself.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Cannot {action} while server is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Failed to build server runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("Failed to resolve listen address {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
