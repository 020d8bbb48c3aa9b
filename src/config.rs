//! Configuration loading and constants.
//!
//! `ServerConfig` is the declarative description of the server handed to
//! [`Bootstrap`](crate::Bootstrap). `ConfigFile` is the root of the TOML file
//! read by the binary: server settings, the applications to mount, and logging.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::keystore::Keystore;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/embark.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "embark=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Name of the working directory created next to the executable
pub const TEMP_DIRECTORY_NAME: &str = ".temp";

/// File name of the generated keystore inside the temp directory
pub const DEFAULT_KEYSTORE_FILENAME: &str = "default.keystore";

/// Context path used when none is given
pub const CONTEXT_PATH_ROOT: &str = "/";

/// Directory (relative to the executable) mounted by `add_self`
pub const RESOURCE_WEBAPP: &str = "webapp";

// =============================================================================
// Server Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SSL_PORT: u16 = 8443;
pub const DEFAULT_MAX_THREADS: usize = 16;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Self-signed Keystore Defaults
// =============================================================================

pub const DEFAULT_KEYSTORE_ALIAS: &str = "embark";
pub const DEFAULT_KEYSTORE_PASSWORD: &str = "embark";
pub const DEFAULT_DOMAIN_NAME: &str = "localhost";
pub const DEFAULT_RDN_OU: &str = "Development";
pub const DEFAULT_RDN_O: &str = "Embark";
pub const DEFAULT_VALIDITY_DAYS: u32 = 3650;
pub const DEFAULT_KEY_ALGORITHM: &str = "RSA";
pub const DEFAULT_SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

/// Network listener kinds that can be enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Http,
    Https,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorKind::Http => f.write_str("http"),
            ConnectorKind::Https => f.write_str("https"),
        }
    }
}

/// Encoding of externally supplied private key or certificate material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialFormat {
    /// PEM or DER, PKCS#8 keys and X.509 certificates
    Pkcs8,
    /// PKCS#12 container
    Pkcs12,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_ssl_port")]
    pub ssl_port: u16,
    /// Enabled listeners (default: http only)
    #[serde(default = "ServerConfig::default_connectors")]
    pub connectors: BTreeSet<ConnectorKind>,
    /// Worker threads of the server runtime
    #[serde(default = "ServerConfig::default_max_threads")]
    pub max_threads: usize,
    /// Connection idle timeout in milliseconds
    #[serde(default = "ServerConfig::default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Request handling timeout in milliseconds (plain listener)
    pub blocking_timeout_ms: Option<u64>,
    /// Graceful stop timeout in milliseconds
    #[serde(default = "ServerConfig::default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// Block the caller in `start` until the server halts
    #[serde(default = "ServerConfig::default_true")]
    pub auto_join: bool,
    /// Ask the binary to install the shutdown hook
    #[serde(default = "ServerConfig::default_true")]
    pub stop_at_shutdown: bool,
    /// Working directory (default: `.temp` next to the executable)
    pub temp_dir: Option<PathBuf>,
    /// Delete the working directory before use
    #[serde(default)]
    pub clean_temp_dir: bool,
    /// Serve a redirect to the TLS listener on the plain listener
    #[serde(default)]
    pub redirect_to_tls: bool,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            ssl_port: Self::default_ssl_port(),
            connectors: Self::default_connectors(),
            max_threads: Self::default_max_threads(),
            idle_timeout_ms: Self::default_idle_timeout(),
            blocking_timeout_ms: None,
            stop_timeout_ms: Self::default_stop_timeout(),
            auto_join: true,
            stop_at_shutdown: true,
            temp_dir: None,
            clean_temp_dir: false,
            redirect_to_tls: false,
            tls: TlsConfig::default(),
        }
    }
}

impl ServerConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_ssl_port() -> u16 {
        DEFAULT_SSL_PORT
    }

    fn default_connectors() -> BTreeSet<ConnectorKind> {
        BTreeSet::from([ConnectorKind::Http])
    }

    fn default_max_threads() -> usize {
        DEFAULT_MAX_THREADS
    }

    fn default_idle_timeout() -> u64 {
        DEFAULT_IDLE_TIMEOUT_MS
    }

    fn default_stop_timeout() -> u64 {
        DEFAULT_STOP_TIMEOUT_MS
    }

    fn default_true() -> bool {
        true
    }

    pub fn has_connector(&self, kind: ConnectorKind) -> bool {
        self.connectors.contains(&kind)
    }
}

/// TLS material and self-signed generation parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Pre-built keystore, takes precedence over every other source
    #[serde(skip)]
    pub keystore: Option<Keystore>,
    pub keystore_path: Option<PathBuf>,
    pub keystore_password: String,
    pub keystore_alias: String,

    pub domain_name: String,
    pub organizational_unit: String,
    pub organization: String,
    pub validity_days: u32,
    pub key_algorithm: String,
    pub signature_algorithm: String,

    pub private_key_path: Option<PathBuf>,
    pub private_key_format: Option<MaterialFormat>,
    pub private_key_password: Option<String>,
    pub certificate_path: Option<PathBuf>,
    pub certificate_format: Option<MaterialFormat>,
    pub certificate_password: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            keystore: None,
            keystore_path: None,
            keystore_password: DEFAULT_KEYSTORE_PASSWORD.to_string(),
            keystore_alias: DEFAULT_KEYSTORE_ALIAS.to_string(),
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            organizational_unit: DEFAULT_RDN_OU.to_string(),
            organization: DEFAULT_RDN_O.to_string(),
            validity_days: DEFAULT_VALIDITY_DAYS,
            key_algorithm: DEFAULT_KEY_ALGORITHM.to_string(),
            signature_algorithm: DEFAULT_SIGNATURE_ALGORITHM.to_string(),
            private_key_path: None,
            private_key_format: None,
            private_key_password: None,
            certificate_path: None,
            certificate_format: None,
            certificate_password: None,
        }
    }
}

impl TlsConfig {
    /// Key and certificate paths, when both are set and non-empty
    pub fn key_pair_paths(&self) -> Option<(&Path, &Path)> {
        let key = non_empty(self.private_key_path.as_deref())?;
        let cert = non_empty(self.certificate_path.as_deref())?;
        Some((key, cert))
    }

    /// Keystore path, when set and non-empty
    pub fn keystore_path(&self) -> Option<&Path> {
        non_empty(self.keystore_path.as_deref())
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Kind of application listed in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// Packaged application archive (tar)
    Archive,
    /// Unpacked application directory
    Exploded,
}

/// Application to mount, as listed in `[[app]]` sections
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub kind: AppKind,
    pub path: PathBuf,
    /// Descriptor override (exploded applications only)
    pub descriptor: Option<PathBuf>,
    #[serde(default = "AppConfig::default_context_path")]
    pub context_path: String,
}

impl AppConfig {
    fn default_context_path() -> String {
        CONTEXT_PATH_ROOT.to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

/// Root of the TOML configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub app: Vec<AppConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: ConfigFile = toml::from_str(contents)?;

        if config.server.connectors.is_empty() {
            return Err(ConfigError::Validation(
                "No connectors configured. Set server.connectors to [\"http\"], [\"https\"] or both"
                    .to_string(),
            ));
        }

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
