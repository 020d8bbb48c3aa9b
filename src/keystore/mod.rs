//! In-memory keystore and its PKCS#12 persistence.
//!
//! A [`Keystore`] maps an alias to a private key and its certificate chain,
//! protected by a passphrase. Keystores come from [`generate`] (self-signed)
//! or [`convert`] (external PEM/PKCS#8/PKCS#12 material) and are written to
//! disk as PKCS#12 files whose friendly name carries the alias.

mod convert;
mod generate;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;

pub use convert::{convert, ConvertParams, MaterialSource};
pub use generate::{generate, KeyAlgorithm, SelfSignedParams, SignatureAlgorithm};

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature algorithm {signature} cannot be used with a {key} key")]
    IncompatibleSignature { signature: String, key: String },

    #[error("Certificate validity must be at least one day, got {0}")]
    InvalidValidity(u32),

    #[error("{0} format not set")]
    FormatNotSet(&'static str),

    #[error("Unknown {0} format")]
    UnknownFormat(&'static str),

    #[error("Failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: ErrorStack,
    },

    #[error("{0} missing from PKCS#12 container")]
    Missing(&'static str),

    #[error("Private key does not match the certificate")]
    KeyMismatch,

    #[error("Alias '{0}' not found in keystore")]
    AliasNotFound(String),

    #[error("A keystore file holds exactly one entry, found {0}")]
    EntryCount(usize),

    #[error("Failed to write keystore to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Openssl(#[from] ErrorStack),
}

/// A private key with its certificate chain, leaf first
#[derive(Clone)]
pub struct KeyEntry {
    pub private_key: PKey<Private>,
    pub chain: Vec<X509>,
}

impl KeyEntry {
    pub fn new(private_key: PKey<Private>, chain: Vec<X509>) -> Self {
        Self { private_key, chain }
    }

    pub fn certificate(&self) -> Option<&X509> {
        self.chain.first()
    }

    /// DER certificate chain and PKCS#8 DER key, as rustls expects them
    pub fn to_der(&self) -> Result<(Vec<Vec<u8>>, Vec<u8>), KeystoreError> {
        let chain = self
            .chain
            .iter()
            .map(|cert| cert.to_der())
            .collect::<Result<Vec<_>, _>>()?;
        let key = self.private_key.private_key_to_pkcs8()?;
        Ok((chain, key))
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key", &self.private_key.id())
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Passphrase-protected collection of key entries
#[derive(Clone)]
pub struct Keystore {
    passphrase: String,
    entries: BTreeMap<String, KeyEntry>,
}

impl Keystore {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn insert(&mut self, alias: impl Into<String>, entry: KeyEntry) {
        self.entries.insert(alias.into(), entry);
    }

    pub fn get(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `alias`, or the only entry when the alias is absent
    pub fn entry_for(&self, alias: &str) -> Result<(&str, &KeyEntry), KeystoreError> {
        if let Some((name, entry)) = self.entries.get_key_value(alias) {
            return Ok((name.as_str(), entry));
        }
        match self.entries.iter().next() {
            Some((name, entry)) if self.entries.len() == 1 => {
                tracing::debug!(requested = %alias, found = %name, "Using the only keystore entry");
                Ok((name.as_str(), entry))
            }
            _ => Err(KeystoreError::AliasNotFound(alias.to_string())),
        }
    }

    /// Encode as a PKCS#12 container protected by the keystore passphrase.
    pub fn to_pkcs12_der(&self) -> Result<Vec<u8>, KeystoreError> {
        let (alias, entry) = match self.entries.iter().next() {
            Some(first) if self.entries.len() == 1 => first,
            _ => return Err(KeystoreError::EntryCount(self.entries.len())),
        };

        let mut builder = Pkcs12::builder();
        builder.name(alias).pkey(&entry.private_key);
        if let Some((leaf, rest)) = entry.chain.split_first() {
            builder.cert(leaf);
            if !rest.is_empty() {
                let mut ca = Stack::new()?;
                for cert in rest {
                    ca.push(cert.clone())?;
                }
                builder.ca(ca);
            }
        }
        let pkcs12 = builder.build2(&self.passphrase)?;
        Ok(pkcs12.to_der()?)
    }

    pub fn save(&self, path: &Path) -> Result<(), KeystoreError> {
        let der = self.to_pkcs12_der()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| KeystoreError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, der).map_err(|source| KeystoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Keystore saved");
        Ok(())
    }

    pub fn load(path: &Path, passphrase: &str) -> Result<Self, KeystoreError> {
        let der = std::fs::read(path).map_err(|source| KeystoreError::Read {
            what: "keystore",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs12_der(&der, passphrase)
    }

    pub fn from_pkcs12_der(der: &[u8], passphrase: &str) -> Result<Self, KeystoreError> {
        let (private_key, chain) = decode_pkcs12(der, passphrase, "keystore")?;
        let private_key = private_key.ok_or(KeystoreError::Missing("private key"))?;
        if chain.is_empty() {
            return Err(KeystoreError::Missing("certificate"));
        }

        let alias = chain[0]
            .alias()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_else(|| crate::config::DEFAULT_KEYSTORE_ALIAS.to_string());

        let mut keystore = Keystore::new(passphrase);
        keystore.insert(alias, KeyEntry::new(private_key, chain));
        Ok(keystore)
    }
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("aliases", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Open a PKCS#12 container; certificate chain is returned leaf first.
pub(crate) fn decode_pkcs12(
    der: &[u8],
    passphrase: &str,
    what: &'static str,
) -> Result<(Option<PKey<Private>>, Vec<X509>), KeystoreError> {
    let decode = |source| KeystoreError::Decode { what, source };
    let parsed = Pkcs12::from_der(der).map_err(decode)?.parse2(passphrase).map_err(decode)?;

    let mut chain = Vec::new();
    if let Some(cert) = parsed.cert {
        chain.push(cert);
    }
    if let Some(ca) = parsed.ca {
        chain.extend(ca);
    }
    Ok((parsed.pkey, chain))
}
