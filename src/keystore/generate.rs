//! Self-signed keystore generation.
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same (`CN=<domain>, OU, O`)
//! - **Serial Number**: Random 128-bit number
//! - **Subject Alternative Name**: the domain, as DNS name or IP address
//! - **Validity**: not-before = now, not-after = not-before + `validity_days`
//! - **Version**: X.509v3

use std::net::IpAddr;
use std::str::FromStr;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{ExtendedKeyUsage, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Name, X509};

use super::{KeyEntry, Keystore, KeystoreError};
use crate::config;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Ed25519,
}

impl FromStr for KeyAlgorithm {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(KeyAlgorithm::Rsa),
            "EC" | "ECDSA" => Ok(KeyAlgorithm::Ec),
            "ED25519" => Ok(KeyAlgorithm::Ed25519),
            _ => Err(KeystoreError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl KeyAlgorithm {
    fn generate_key(self) -> Result<PKey<Private>, KeystoreError> {
        let key = match self {
            KeyAlgorithm::Rsa => PKey::from_rsa(Rsa::generate(RSA_KEY_SIZE_DEFAULT)?)?,
            KeyAlgorithm::Ec => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
            KeyAlgorithm::Ed25519 => PKey::generate_ed25519()?,
        };
        Ok(key)
    }
}

/// Signature algorithm, named as `<DIGEST>with<KEY>` (e.g. `SHA256withRSA`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAlgorithm {
    digest: Option<Digest>,
    key: KeyAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Digest {
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for SignatureAlgorithm {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || KeystoreError::UnsupportedAlgorithm(s.to_string());
        let upper = s.to_ascii_uppercase();
        if upper == "ED25519" {
            return Ok(SignatureAlgorithm {
                digest: None,
                key: KeyAlgorithm::Ed25519,
            });
        }

        let (digest, key) = upper.split_once("WITH").ok_or_else(unsupported)?;
        let digest = match digest {
            "SHA256" => Digest::Sha256,
            "SHA384" => Digest::Sha384,
            "SHA512" => Digest::Sha512,
            _ => return Err(unsupported()),
        };
        let key = match key {
            "RSA" => KeyAlgorithm::Rsa,
            "ECDSA" => KeyAlgorithm::Ec,
            _ => return Err(unsupported()),
        };
        Ok(SignatureAlgorithm {
            digest: Some(digest),
            key,
        })
    }
}

impl SignatureAlgorithm {
    fn message_digest(self) -> MessageDigest {
        match self.digest {
            Some(Digest::Sha256) => MessageDigest::sha256(),
            Some(Digest::Sha384) => MessageDigest::sha384(),
            Some(Digest::Sha512) => MessageDigest::sha512(),
            None => MessageDigest::null(),
        }
    }
}

/// Parameters of a self-signed keystore
#[derive(Debug, Clone)]
pub struct SelfSignedParams {
    pub domain_name: String,
    pub alias: String,
    pub passphrase: String,
    pub organizational_unit: String,
    pub organization: String,
    pub validity_days: u32,
    pub key_algorithm: String,
    pub signature_algorithm: String,
}

impl Default for SelfSignedParams {
    fn default() -> Self {
        Self {
            domain_name: config::DEFAULT_DOMAIN_NAME.to_string(),
            alias: config::DEFAULT_KEYSTORE_ALIAS.to_string(),
            passphrase: config::DEFAULT_KEYSTORE_PASSWORD.to_string(),
            organizational_unit: config::DEFAULT_RDN_OU.to_string(),
            organization: config::DEFAULT_RDN_O.to_string(),
            validity_days: config::DEFAULT_VALIDITY_DAYS,
            key_algorithm: config::DEFAULT_KEY_ALGORITHM.to_string(),
            signature_algorithm: config::DEFAULT_SIGNATURE_ALGORITHM.to_string(),
        }
    }
}

impl SelfSignedParams {
    pub fn from_tls_config(tls: &config::TlsConfig) -> Self {
        Self {
            domain_name: tls.domain_name.clone(),
            alias: tls.keystore_alias.clone(),
            passphrase: tls.keystore_password.clone(),
            organizational_unit: tls.organizational_unit.clone(),
            organization: tls.organization.clone(),
            validity_days: tls.validity_days,
            key_algorithm: tls.key_algorithm.clone(),
            signature_algorithm: tls.signature_algorithm.clone(),
        }
    }
}

/// Generate a key pair and a self-signed certificate, stored under
/// `params.alias` in a fresh keystore.
pub fn generate(params: SelfSignedParams) -> Result<Keystore, KeystoreError> {
    if params.validity_days == 0 {
        return Err(KeystoreError::InvalidValidity(0));
    }
    let key_algorithm: KeyAlgorithm = params.key_algorithm.parse()?;
    let signature: SignatureAlgorithm = params.signature_algorithm.parse()?;
    if signature.key != key_algorithm {
        return Err(KeystoreError::IncompatibleSignature {
            signature: params.signature_algorithm,
            key: params.key_algorithm,
        });
    }

    tracing::debug!(
        domain = %params.domain_name,
        alias = %params.alias,
        key_algorithm = %params.key_algorithm,
        signature_algorithm = %params.signature_algorithm,
        validity_days = params.validity_days,
        "Generating self-signed certificate"
    );

    let private_key = key_algorithm.generate_key()?;

    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, &params.domain_name)?;
    if !params.organizational_unit.is_empty() {
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, &params.organizational_unit)?;
    }
    if !params.organization.is_empty() {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &params.organization)?;
    }
    let name = name.build();
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;

    // Both bounds derive from one instant so the window is exactly N days.
    let now = chrono::Utc::now().timestamp();
    let not_after = now + i64::from(params.validity_days) * SECONDS_PER_DAY;
    let not_before = Asn1Time::from_unix(now)?;
    let not_after = Asn1Time::from_unix(not_after)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.set_pubkey(&private_key)?;

    let mut san = SubjectAlternativeName::new();
    match params.domain_name.parse::<IpAddr>() {
        Ok(_) => san.ip(&params.domain_name),
        Err(_) => san.dns(&params.domain_name),
    };
    let san = san.build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;
    builder.append_extension(KeyUsage::new().critical().digital_signature().key_encipherment().build()?)?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

    builder.sign(&private_key, signature.message_digest())?;
    let certificate = builder.build();

    let mut keystore = Keystore::new(params.passphrase);
    keystore.insert(params.alias, KeyEntry::new(private_key, vec![certificate]));
    Ok(keystore)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(key: &str, signature: &str) -> SelfSignedParams {
        SelfSignedParams {
            domain_name: "example.test".to_string(),
            alias: "site".to_string(),
            passphrase: "secret".to_string(),
            organizational_unit: "Ops".to_string(),
            organization: "Example".to_string(),
            validity_days: 30,
            key_algorithm: key.to_string(),
            signature_algorithm: signature.to_string(),
        }
    }

    fn entry_text(cert: &X509, nid: Nid) -> String {
        cert.subject_name()
            .entries_by_nid(nid)
            .next()
            .unwrap()
            .data()
            .to_string()
            .unwrap()
    }

    #[test]
    fn generates_single_self_signed_entry() {
        let keystore = generate(params("EC", "SHA256withECDSA")).unwrap();
        assert_eq!(keystore.aliases().collect::<Vec<_>>(), vec!["site"]);
        assert_eq!(keystore.passphrase(), "secret");

        let entry = keystore.get("site").unwrap();
        let cert = entry.certificate().unwrap();
        assert_eq!(entry_text(cert, Nid::COMMONNAME), "example.test");
        assert_eq!(entry_text(cert, Nid::ORGANIZATIONALUNITNAME), "Ops");
        assert_eq!(entry_text(cert, Nid::ORGANIZATIONNAME), "Example");
        assert_eq!(
            cert.subject_name().to_der().unwrap(),
            cert.issuer_name().to_der().unwrap()
        );
        assert!(cert.public_key().unwrap().public_eq(&entry.private_key));
        assert!(cert.verify(&entry.private_key).unwrap());
    }

    #[test]
    fn validity_window_is_exactly_configured_days() {
        let keystore = generate(params("EC", "SHA384withECDSA")).unwrap();
        let cert = keystore.get("site").unwrap().certificate().unwrap();
        let diff = cert.not_before().diff(cert.not_after()).unwrap();
        assert_eq!(diff.days, 30);
        assert_eq!(diff.secs, 0);
    }

    #[test]
    fn zero_day_validity_is_rejected() {
        let mut p = params("EC", "SHA256withECDSA");
        p.validity_days = 0;
        assert!(matches!(generate(p), Err(KeystoreError::InvalidValidity(0))));
    }

    #[test]
    fn rsa_and_ed25519_are_supported() {
        assert!(generate(params("RSA", "SHA256withRSA")).is_ok());
        assert!(generate(params("Ed25519", "Ed25519")).is_ok());
    }

    #[test]
    fn ip_domain_gets_ip_subject_alt_name() {
        let mut p = params("EC", "SHA256withECDSA");
        p.domain_name = "127.0.0.1".to_string();
        let keystore = generate(p).unwrap();
        let cert = keystore.get("site").unwrap().certificate().unwrap();
        let names = cert.subject_alt_names().unwrap();
        assert_eq!(names.iter().next().unwrap().ipaddress(), Some(&[127, 0, 0, 1][..]));
    }

    #[test]
    fn unknown_algorithms_are_rejected() {
        assert!(matches!(
            generate(params("DSA", "SHA256withDSA")),
            Err(KeystoreError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            generate(params("RSA", "MD5withRSA")),
            Err(KeystoreError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn mismatched_signature_is_rejected() {
        assert!(matches!(
            generate(params("EC", "SHA256withRSA")),
            Err(KeystoreError::IncompatibleSignature { .. })
        ));
    }
}
