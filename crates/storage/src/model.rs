//! Persisted entities: users, domains and ACME account keys.

use std::fmt;

use acmeproxy_common::UserId;
use rcgen::{KeyPair, SignatureAlgorithm};

use crate::error::CodecError;

const PKCS8_PEM_TAG: &str = "PRIVATE KEY";

/// Algorithm family of a persisted private key
///
/// The numeric tag is part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// ECDSA (P-256 or P-384)
    Ec,
    /// RSA (PKCS#1 v1.5)
    Rsa,
}

impl KeyFamily {
    /// On-disk tag
    pub fn tag(self) -> u8 {
        match self {
            KeyFamily::Ec => 1,
            KeyFamily::Rsa => 2,
        }
    }

    /// Family for an on-disk tag
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            1 => Ok(KeyFamily::Ec),
            2 => Ok(KeyFamily::Rsa),
            other => Err(CodecError::UnknownKeyFamily(other)),
        }
    }

    /// Family of a signature algorithm, if it is one we persist
    pub fn of(alg: &SignatureAlgorithm) -> Result<Self, CodecError> {
        if alg == &rcgen::PKCS_ECDSA_P256_SHA256 || alg == &rcgen::PKCS_ECDSA_P384_SHA384 {
            Ok(KeyFamily::Ec)
        } else if alg == &rcgen::PKCS_RSA_SHA256
            || alg == &rcgen::PKCS_RSA_SHA384
            || alg == &rcgen::PKCS_RSA_SHA512
        {
            Ok(KeyFamily::Rsa)
        } else {
            Err(CodecError::UnsupportedKey(format!("{alg:?}")))
        }
    }

    /// Human-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            KeyFamily::Ec => "EC",
            KeyFamily::Rsa => "RSA",
        }
    }

    fn algorithms(self) -> Vec<&'static SignatureAlgorithm> {
        match self {
            KeyFamily::Ec => vec![&rcgen::PKCS_ECDSA_P256_SHA256, &rcgen::PKCS_ECDSA_P384_SHA384],
            KeyFamily::Rsa => vec![&rcgen::PKCS_RSA_SHA256],
        }
    }

    /// Parse PKCS#8 DER with this family's parser
    fn parse(self, der: &[u8]) -> Result<KeyPair, CodecError> {
        let pem = pkcs8_pem(der);
        let mut last_error = None;
        for alg in self.algorithms() {
            match KeyPair::from_pem_and_sign_algo(&pem, alg) {
                Ok(key_pair) => return Ok(key_pair),
                Err(e) => last_error = Some(e),
            }
        }
        Err(CodecError::InvalidKey {
            family: self.as_str(),
            reason: last_error.map_or_else(|| "no parser".to_string(), |e| e.to_string()),
        })
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key used to authenticate with the ACME certificate authority
///
/// Held as PKCS#8 DER together with its family. Construction always parses
/// the key, so an `AccountKey` is known to be usable.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey {
    family: KeyFamily,
    der: Vec<u8>,
}

impl AccountKey {
    /// Generate a fresh ECDSA P-256 key
    pub fn generate() -> Result<Self, CodecError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        Self::from_key_pair(&key_pair)
    }

    /// Capture an existing key pair
    ///
    /// Fails for algorithms other than ECDSA and RSA.
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self, CodecError> {
        let family = KeyFamily::of(key_pair.algorithm())?;
        Ok(Self {
            family,
            der: key_pair.serialize_der(),
        })
    }

    /// Parse a PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        let key_pair = KeyPair::from_pem(pem)?;
        Self::from_key_pair(&key_pair)
    }

    /// Parse PKCS#8 DER bytes, detecting the family
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CodecError> {
        Self::from_pem(&pkcs8_pem(der))
    }

    /// Rebuild a key from its tagged on-disk form
    pub(crate) fn from_tagged(family: KeyFamily, der: Vec<u8>) -> Result<Self, CodecError> {
        family.parse(&der)?;
        Ok(Self { family, der })
    }

    /// Key algorithm family
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// PKCS#8 DER encoding
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.der
    }

    /// PKCS#8 PEM encoding
    pub fn to_pem(&self) -> String {
        pkcs8_pem(&self.der)
    }

    /// Signing key pair, for handing to an ACME client
    pub fn key_pair(&self) -> Result<KeyPair, CodecError> {
        self.family.parse(&self.der)
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("family", &self.family)
            .field("der", &"<redacted>")
            .finish()
    }
}

fn pkcs8_pem(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(PKCS8_PEM_TAG, der.to_vec()))
}

/// A tenant with an ACME account
///
/// Only fully populated users are ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Tenant identifier
    pub id: UserId,
    /// ACME account key
    pub key: AccountKey,
    /// Account URL assigned by the CA
    pub account_url: String,
}

/// A DNS name with its issued certificate
#[derive(Clone, PartialEq, Eq)]
pub struct Domain {
    /// DNS name, unique across all tenants
    pub name: String,
    /// Tenant that registered the domain; never changes once set
    pub owner: UserId,
    /// PEM certificate chain
    pub certificate: Vec<u8>,
    /// PEM private key for the certificate
    pub private_key: Vec<u8>,
}

impl Domain {
    /// Whether a certificate has been stored yet
    pub fn has_certificate(&self) -> bool {
        !self.certificate.is_empty()
    }

    /// Whether `user` registered this domain
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}
