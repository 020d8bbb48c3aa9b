//! Listener descriptors built from the finalized configuration.

use std::path::Path;
use std::time::Duration;

use crate::config::{ConnectorKind, MaterialFormat};
use crate::error::{BootstrapError, Result};
use crate::keystore::{self, ConvertParams, Keystore, MaterialSource};
use crate::validate::{FinalizedConfig, TlsSource};

/// Scheme and port the plain listener advertises for secure redirects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureRedirect {
    pub scheme: &'static str,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub enum Protocol {
    Plain {
        secure_redirect: Option<SecureRedirect>,
    },
    Tls {
        keystore: Keystore,
        alias: String,
    },
}

/// One network listener to bind
#[derive(Debug, Clone)]
pub struct ConnectorSpec {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub idle_timeout: Option<Duration>,
    pub blocking_timeout: Option<Duration>,
}

impl ConnectorSpec {
    pub fn kind(&self) -> ConnectorKind {
        match self.protocol {
            Protocol::Plain { .. } => ConnectorKind::Http,
            Protocol::Tls { .. } => ConnectorKind::Https,
        }
    }

    pub fn secure_redirect(&self) -> Option<SecureRedirect> {
        match self.protocol {
            Protocol::Plain { secure_redirect } => secure_redirect,
            Protocol::Tls { .. } => None,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

pub fn build_connectors(config: &FinalizedConfig) -> Result<Vec<ConnectorSpec>> {
    tracing::trace!("Creating Connectors...");

    let server = &config.server;
    let idle_timeout = millis(server.idle_timeout_ms);
    let mut connectors = Vec::with_capacity(2);

    if server.has_connector(ConnectorKind::Http) {
        tracing::trace!("Adding HTTP Connector...");
        let secure_redirect = server
            .has_connector(ConnectorKind::Https)
            .then_some(SecureRedirect {
                scheme: "https",
                port: server.ssl_port,
            });

        connectors.push(ConnectorSpec {
            host: server.host.clone(),
            port: server.port,
            protocol: Protocol::Plain { secure_redirect },
            idle_timeout,
            blocking_timeout: server.blocking_timeout_ms.and_then(millis),
        });
    }

    if server.has_connector(ConnectorKind::Https) {
        tracing::trace!("Adding HTTPS Connector...");
        let source = config.tls.as_ref().ok_or_else(|| {
            BootstrapError::validation("HTTPS connector enabled but no TLS source resolved")
        })?;

        connectors.push(ConnectorSpec {
            host: server.host.clone(),
            port: server.ssl_port,
            protocol: Protocol::Tls {
                keystore: load_keystore(config, source)?,
                alias: server.tls.keystore_alias.clone(),
            },
            idle_timeout,
            blocking_timeout: None,
        });
    }

    Ok(connectors)
}

fn load_keystore(config: &FinalizedConfig, source: &TlsSource) -> Result<Keystore> {
    let tls = &config.server.tls;
    match source {
        TlsSource::Keystore(keystore) => Ok(keystore.clone()),
        TlsSource::KeyPair {
            private_key,
            certificate,
        } => {
            check_readable(private_key, "Private key")?;
            check_readable(certificate, "Certificate")?;

            let keystore = keystore::convert(ConvertParams {
                private_key: read_material(
                    private_key,
                    tls.private_key_format,
                    tls.private_key_password.clone(),
                    "private key",
                )?,
                certificate: read_material(
                    certificate,
                    tls.certificate_format,
                    tls.certificate_password.clone(),
                    "certificate",
                )?,
                alias: tls.keystore_alias.clone(),
                passphrase: tls.keystore_password.clone(),
            })?;
            Ok(keystore)
        }
        TlsSource::KeystoreFile { path, .. } => {
            Ok(Keystore::load(path, &tls.keystore_password)?)
        }
    }
}

fn check_readable(path: &Path, what: &str) -> Result<()> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(BootstrapError::validation(format!(
            "{what} {} does not exist or is unreadable: {e}",
            path.display()
        ))),
    }
}

fn read_material(
    path: &Path,
    format: Option<MaterialFormat>,
    password: Option<String>,
    what: &'static str,
) -> Result<MaterialSource> {
    Ok(MaterialSource::from_path(path, format, password, what)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, ServerConfig};
    use crate::keystore::{generate, SelfSignedParams};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn finalized(connectors: &[ConnectorKind], tls: Option<TlsSource>) -> FinalizedConfig {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8081,
            ssl_port: 8444,
            connectors: connectors.iter().copied().collect::<BTreeSet<_>>(),
            idle_timeout_ms: 1000,
            blocking_timeout_ms: Some(500),
            ..ServerConfig::default()
        };
        FinalizedConfig {
            server,
            temp_dir: PathBuf::from("/tmp"),
            tls,
        }
    }

    fn keystore() -> Keystore {
        generate(SelfSignedParams {
            key_algorithm: "EC".to_string(),
            signature_algorithm: "SHA256withECDSA".to_string(),
            ..SelfSignedParams::default()
        })
        .unwrap()
    }

    #[test]
    fn plain_only_yields_one_plain_connector() {
        let specs = build_connectors(&finalized(&[ConnectorKind::Http], None)).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.kind(), ConnectorKind::Http);
        assert_eq!((spec.host.as_str(), spec.port), ("127.0.0.1", 8081));
        assert_eq!(spec.secure_redirect(), None);
        assert_eq!(spec.blocking_timeout, Some(Duration::from_millis(500)));
        assert_eq!(spec.idle_timeout, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn tls_only_yields_one_tls_connector() {
        let config = finalized(&[ConnectorKind::Https], Some(TlsSource::Keystore(keystore())));
        let specs = build_connectors(&config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind(), ConnectorKind::Https);
        assert_eq!(specs[0].port, 8444);
        assert_eq!(specs[0].idle_timeout, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn both_connectors_advertise_secure_redirect() {
        let config = finalized(
            &[ConnectorKind::Http, ConnectorKind::Https],
            Some(TlsSource::Keystore(keystore())),
        );
        let specs = build_connectors(&config).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0].secure_redirect(),
            Some(SecureRedirect {
                scheme: "https",
                port: 8444
            })
        );
        assert!(specs.iter().all(|s| s.idle_timeout.is_some()));
    }

    #[test]
    fn zero_timeouts_are_disabled() {
        let mut config = finalized(&[ConnectorKind::Http], None);
        config.server.idle_timeout_ms = 0;
        config.server.blocking_timeout_ms = Some(0);
        let specs = build_connectors(&config).unwrap();
        assert_eq!(specs[0].idle_timeout, None);
        assert_eq!(specs[0].blocking_timeout, None);
    }

    #[test]
    fn missing_key_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, b"unused").unwrap();

        let config = finalized(
            &[ConnectorKind::Https],
            Some(TlsSource::KeyPair {
                private_key: dir.path().join("missing.pem"),
                certificate: cert,
            }),
        );
        let err = build_connectors(&config).unwrap_err();
        assert!(matches!(err, BootstrapError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn key_pair_files_are_converted() {
        let dir = tempfile::tempdir().unwrap();
        let store = keystore();
        let (_, entry) = store.entry_for("").unwrap();
        let key = dir.path().join("key.pem");
        let cert = dir.path().join("cert.pem");
        std::fs::write(&key, entry.private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        std::fs::write(&cert, entry.certificate().unwrap().to_pem().unwrap()).unwrap();

        let mut config = finalized(
            &[ConnectorKind::Https],
            Some(TlsSource::KeyPair {
                private_key: key,
                certificate: cert,
            }),
        );
        config.server.tls.private_key_format = Some(MaterialFormat::Pkcs8);
        config.server.tls.certificate_format = Some(MaterialFormat::Pkcs8);

        let specs = build_connectors(&config).unwrap();
        match &specs[0].protocol {
            Protocol::Tls { keystore, alias } => {
                assert!(keystore.get(alias).is_some());
            }
            other => panic!("unexpected protocol {other:?}"),
        }
    }
}
