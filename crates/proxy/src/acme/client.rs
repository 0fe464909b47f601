//! Seams to the ACME wire client
//!
//! The protocol client itself (directory discovery, JWS signing, order
//! polling) lives outside this crate. [`Agent`](super::Agent) drives it
//! through these traits, and the client drives the HTTP-01 solver through
//! [`ChallengeProvider`].

use std::fmt;

use acmeproxy_common::ProxyResult;
use acmeproxy_storage::AccountKey;
use serde::Deserialize;

/// Key algorithm for newly issued certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// ECDSA P-256
    #[default]
    Ec256,
    /// ECDSA P-384
    Ec384,
    /// RSA 2048-bit
    Rsa2048,
    /// RSA 4096-bit
    Rsa4096,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Ec256 => "ec256",
            KeyType::Ec384 => "ec384",
            KeyType::Rsa2048 => "rsa2048",
            KeyType::Rsa4096 => "rsa4096",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates ACME accounts
pub trait AccountCreator: Send + Sync {
    /// Register a new account for `key`; returns the account URL
    ///
    /// `email` may be empty.
    fn create_account(&self, key: &AccountKey, email: &str) -> ProxyResult<String>;
}

/// Runs a complete ACME order and returns the issued certificate
///
/// Implementations solve HTTP-01 challenges through a [`ChallengeProvider`]
/// before finalizing.
pub trait CertificateObtainer: Send + Sync {
    fn obtain_certificate(&self, request: &ObtainRequest) -> ProxyResult<CertificateResource>;
}

/// HTTP-01 provider callbacks used by the ACME client
pub trait ChallengeProvider: Send + Sync {
    /// Make `key_auth` available for `domain` and `token`
    fn present(&self, domain: &str, token: &str, key_auth: &str) -> ProxyResult<()>;

    /// Withdraw the challenge once the CA has validated it
    fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> ProxyResult<()>;
}

/// Certificate order parameters
#[derive(Debug, Clone)]
pub struct ObtainRequest {
    /// Contact address; may be empty
    pub email: String,
    /// Account the order is placed under
    pub account_url: String,
    /// Key the order requests are signed with
    pub account_key: AccountKey,
    /// Algorithm for the certificate's private key
    pub key_type: KeyType,
    /// Identifiers to include; the first becomes the subject
    pub domains: Vec<String>,
    /// Append the issuer chain to the certificate PEM
    pub bundle: bool,
}

/// Issued certificate as returned by the CA
#[derive(Clone, Default)]
pub struct CertificateResource {
    /// Certificate URL at the CA
    pub url: String,
    /// Account the certificate was issued under
    pub account_url: String,
    /// PEM certificate (chain when bundled)
    pub certificate: Vec<u8>,
    /// PEM private key of the certificate
    pub private_key: Vec<u8>,
    /// PEM issuer certificate
    pub issuer_certificate: Vec<u8>,
}

impl fmt::Debug for CertificateResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateResource")
            .field("url", &self.url)
            .field("account_url", &self.account_url)
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("issuer_certificate_len", &self.issuer_certificate.len())
            .finish()
    }
}
