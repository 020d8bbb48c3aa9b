//! Assemble a keystore from externally supplied key and certificate material.
//!
//! The private key and the certificate are decoded independently, each in its
//! own format, then combined under one alias. A PEM key next to a PKCS#12
//! certificate is legal.

use std::path::Path;

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use super::{decode_pkcs12, KeyEntry, Keystore, KeystoreError};
use crate::config::MaterialFormat;

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// Raw key or certificate bytes together with their encoding
#[derive(Clone)]
pub struct MaterialSource {
    pub data: Vec<u8>,
    pub format: Option<MaterialFormat>,
    pub password: Option<String>,
}

impl MaterialSource {
    pub fn new(data: Vec<u8>, format: Option<MaterialFormat>, password: Option<String>) -> Self {
        Self {
            data,
            format,
            password,
        }
    }

    pub fn from_path(
        path: &Path,
        format: Option<MaterialFormat>,
        password: Option<String>,
        what: &'static str,
    ) -> Result<Self, KeystoreError> {
        let data = std::fs::read(path).map_err(|source| KeystoreError::Read {
            what,
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(data, format, password))
    }

    fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

pub struct ConvertParams {
    pub private_key: MaterialSource,
    pub certificate: MaterialSource,
    pub alias: String,
    pub passphrase: String,
}

/// Decode both sources and store them under `params.alias`.
pub fn convert(params: ConvertParams) -> Result<Keystore, KeystoreError> {
    let chain = decode_certificates(&params.certificate)?;
    let private_key = decode_private_key(&params.private_key)?;

    let leaf = chain.first().ok_or(KeystoreError::Missing("certificate"))?;
    if !leaf.public_key()?.public_eq(&private_key) {
        return Err(KeystoreError::KeyMismatch);
    }

    tracing::debug!(alias = %params.alias, chain_len = chain.len(), "Converted external TLS material");

    let mut keystore = Keystore::new(params.passphrase);
    keystore.insert(params.alias, KeyEntry::new(private_key, chain));
    Ok(keystore)
}

fn require_format(
    format: Option<MaterialFormat>,
    what: &'static str,
) -> Result<MaterialFormat, KeystoreError> {
    match format {
        None => Err(KeystoreError::FormatNotSet(what)),
        Some(MaterialFormat::Unknown) => Err(KeystoreError::UnknownFormat(what)),
        Some(format) => Ok(format),
    }
}

fn is_pem(data: &[u8]) -> bool {
    data.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER)
}

fn decode_private_key(source: &MaterialSource) -> Result<PKey<Private>, KeystoreError> {
    const WHAT: &str = "private key";
    let decode = |source| KeystoreError::Decode { what: WHAT, source };

    match require_format(source.format, WHAT)? {
        MaterialFormat::Pkcs8 => match (&source.password, is_pem(&source.data)) {
            (Some(password), true) => {
                PKey::private_key_from_pem_passphrase(&source.data, password.as_bytes())
                    .map_err(decode)
            }
            (None, true) => PKey::private_key_from_pem(&source.data).map_err(decode),
            (Some(password), false) => {
                PKey::private_key_from_pkcs8_passphrase(&source.data, password.as_bytes())
                    .map_err(decode)
            }
            (None, false) => PKey::private_key_from_pkcs8(&source.data).map_err(decode),
        },
        MaterialFormat::Pkcs12 => {
            let (key, _) = decode_pkcs12(&source.data, source.password(), WHAT)?;
            key.ok_or(KeystoreError::Missing(WHAT))
        }
        MaterialFormat::Unknown => Err(KeystoreError::UnknownFormat(WHAT)),
    }
}

fn decode_certificates(source: &MaterialSource) -> Result<Vec<X509>, KeystoreError> {
    const WHAT: &str = "certificate";
    let decode = |source| KeystoreError::Decode { what: WHAT, source };

    let chain = match require_format(source.format, WHAT)? {
        MaterialFormat::Pkcs8 if is_pem(&source.data) => {
            X509::stack_from_pem(&source.data).map_err(decode)?
        }
        MaterialFormat::Pkcs8 => vec![X509::from_der(&source.data).map_err(decode)?],
        MaterialFormat::Pkcs12 => decode_pkcs12(&source.data, source.password(), WHAT)?.1,
        MaterialFormat::Unknown => return Err(KeystoreError::UnknownFormat(WHAT)),
    };

    if chain.is_empty() {
        return Err(KeystoreError::Missing(WHAT));
    }
    Ok(chain)
}
