//! Configuration validation and defaulting.
//!
//! Runs once per [`Bootstrap`](crate::Bootstrap): checks the configuration for
//! consistency, prepares the temp directory, and resolves which TLS source the
//! TLS listener will use. A keystore file that does not exist yet is generated
//! (self-signed) and saved, so later runs reuse it.

use std::path::PathBuf;

use crate::config::{ConnectorKind, ServerConfig, DEFAULT_KEYSTORE_FILENAME};
use crate::error::{BootstrapError, Result};
use crate::keystore::{self, Keystore, SelfSignedParams};
use crate::tempdir;

/// Where the TLS listener gets its key material from, in precedence order
#[derive(Debug, Clone)]
pub enum TlsSource {
    /// Keystore handed over programmatically
    Keystore(Keystore),
    /// Private key and certificate files
    KeyPair {
        private_key: PathBuf,
        certificate: PathBuf,
    },
    /// PKCS#12 keystore file; `generated` when written during validation
    KeystoreFile { path: PathBuf, generated: bool },
}

/// Configuration after defaults are applied and side effects performed
#[derive(Debug, Clone)]
pub struct FinalizedConfig {
    pub server: ServerConfig,
    pub temp_dir: PathBuf,
    pub tls: Option<TlsSource>,
}

pub fn validate(config: &ServerConfig) -> Result<FinalizedConfig> {
    tracing::debug!("Init Configuration...");

    tracing::trace!("Check required properties...");
    if config.host.trim().is_empty() {
        return Err(BootstrapError::validation("Host not specified"));
    }
    if config.connectors.is_empty() {
        return Err(BootstrapError::validation("No connector enabled"));
    }
    if config.redirect_to_tls
        && !(config.has_connector(ConnectorKind::Http) && config.has_connector(ConnectorKind::Https))
    {
        return Err(BootstrapError::validation(
            "Redirecting HTTP to HTTPS requires both http and https connectors",
        ));
    }

    tracing::trace!("Check Temp Directory...");
    let temp_dir = config.temp_dir.clone().unwrap_or_else(tempdir::default_location);
    tempdir::prepare(&temp_dir, config.clean_temp_dir)?;

    let mut server = config.clone();
    server.temp_dir = Some(temp_dir.clone());

    tracing::trace!("Check connectors...");
    let tls = if server.has_connector(ConnectorKind::Https) {
        Some(resolve_tls(&mut server, &temp_dir)?)
    } else {
        None
    };

    let finalized = FinalizedConfig {
        server,
        temp_dir,
        tls,
    };
    tracing::trace!(config = ?finalized, "Configuration");
    Ok(finalized)
}

fn resolve_tls(server: &mut ServerConfig, temp_dir: &std::path::Path) -> Result<TlsSource> {
    let tls = &mut server.tls;

    if let Some(keystore) = &tls.keystore {
        return Ok(TlsSource::Keystore(keystore.clone()));
    }
    if let Some((key, cert)) = tls.key_pair_paths() {
        return Ok(TlsSource::KeyPair {
            private_key: key.to_path_buf(),
            certificate: cert.to_path_buf(),
        });
    }

    let path = match tls.keystore_path() {
        Some(path) => path.to_path_buf(),
        None => temp_dir.join(DEFAULT_KEYSTORE_FILENAME),
    };
    tls.keystore_path = Some(path.clone());

    let generated = !path.exists();
    if generated {
        tracing::info!(path = %path.display(), "Generating self-signed keystore");
        let keystore = keystore::generate(SelfSignedParams::from_tls_config(tls))?;
        keystore.save(&path)?;
    } else {
        tracing::debug!(path = %path.display(), "Using existing keystore");
    }

    Ok(TlsSource::KeystoreFile { path, generated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::collections::BTreeSet;

    fn config(dir: &std::path::Path, connectors: &[ConnectorKind]) -> ServerConfig {
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            connectors: connectors.iter().copied().collect::<BTreeSet<_>>(),
            temp_dir: Some(dir.join("work")),
            ..ServerConfig::default()
        };
        config.tls.key_algorithm = "EC".to_string();
        config.tls.signature_algorithm = "SHA256withECDSA".to_string();
        config
    }

    #[test]
    fn empty_host_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path(), &[ConnectorKind::Http]);
        c.host = String::new();
        let err = validate(&c).unwrap_err();
        assert!(matches!(err, BootstrapError::Config(ConfigError::Validation(_))));
        assert!(!dir.path().join("work").exists());
    }

    #[test]
    fn redirect_requires_both_connectors() {
        let dir = tempfile::tempdir().unwrap();
        for connectors in [&[ConnectorKind::Http][..], &[ConnectorKind::Https][..]] {
            let mut c = config(dir.path(), connectors);
            c.redirect_to_tls = true;
            assert!(matches!(validate(&c), Err(BootstrapError::Config(_))));
        }

        let mut c = config(dir.path(), &[ConnectorKind::Http, ConnectorKind::Https]);
        c.redirect_to_tls = true;
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn plain_only_creates_temp_dir_without_tls() {
        let dir = tempfile::tempdir().unwrap();
        let finalized = validate(&config(dir.path(), &[ConnectorKind::Http])).unwrap();
        assert!(finalized.temp_dir.is_dir());
        assert!(finalized.tls.is_none());
        assert_eq!(finalized.server.temp_dir.as_deref(), Some(finalized.temp_dir.as_path()));
    }

    #[test]
    fn default_keystore_is_generated_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path(), &[ConnectorKind::Https]);

        let first = validate(&c).unwrap();
        let path = dir.path().join("work").join(DEFAULT_KEYSTORE_FILENAME);
        assert!(matches!(
            &first.tls,
            Some(TlsSource::KeystoreFile { path: p, generated: true }) if *p == path
        ));
        assert_eq!(first.server.tls.keystore_path.as_deref(), Some(path.as_path()));
        let bytes = std::fs::read(&path).unwrap();

        let second = validate(&c).unwrap();
        assert!(matches!(second.tls, Some(TlsSource::KeystoreFile { generated: false, .. })));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn key_pair_takes_precedence_over_keystore_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path(), &[ConnectorKind::Https]);
        c.tls.keystore_path = Some(dir.path().join("other.p12"));
        c.tls.private_key_path = Some(dir.path().join("key.pem"));
        c.tls.certificate_path = Some(dir.path().join("cert.pem"));

        let finalized = validate(&c).unwrap();
        assert!(matches!(finalized.tls, Some(TlsSource::KeyPair { .. })));
        assert!(!dir.path().join("other.p12").exists());
    }

    #[test]
    fn keystore_handle_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path(), &[ConnectorKind::Https]);
        c.tls.private_key_path = Some(dir.path().join("key.pem"));
        c.tls.certificate_path = Some(dir.path().join("cert.pem"));
        c.tls.keystore = Some(
            keystore::generate(SelfSignedParams::from_tls_config(&c.tls)).unwrap(),
        );

        let finalized = validate(&c).unwrap();
        assert!(matches!(finalized.tls, Some(TlsSource::Keystore(_))));
    }

    #[test]
    fn bad_generation_parameters_are_keystore_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path(), &[ConnectorKind::Https]);
        c.tls.key_algorithm = "DSA".to_string();
        assert!(matches!(validate(&c), Err(BootstrapError::Keystore(_))));
    }
}
