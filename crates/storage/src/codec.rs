//! Binary record format
//!
//! Every record is a one-byte schema version followed by a `bincode` body:
//!
//! ```text
//! +---------+----------------------------------------------+
//! | version | body (fixint, big-endian, no trailing bytes) |
//! +---------+----------------------------------------------+
//! ```
//!
//! Version 1 bodies:
//!
//! - user: `id[16] | account_url | key { family tag, PKCS#8 DER }`
//! - domain: `owner[16] | name | certificate | private_key`
//!
//! A schema change adds a new version and a new decode arm; existing arms
//! stay so records written by older builds keep decoding.

use acmeproxy_common::UserId;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{AccountKey, Domain, KeyFamily, User};

/// Schema version written by this build
pub const SCHEMA_VERSION: u8 = 1;

/// Upper bound on a single record body
const MAX_RECORD_SIZE: u64 = 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct KeyRecordV1 {
    family: u8,
    der: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct UserRecordV1 {
    id: [u8; 16],
    account_url: String,
    key: KeyRecordV1,
}

#[derive(Serialize, Deserialize)]
struct DomainRecordV1 {
    owner: [u8; 16],
    name: String,
    certificate: Vec<u8>,
    private_key: Vec<u8>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .reject_trailing_bytes()
        .with_limit(MAX_RECORD_SIZE)
}

fn encode_record<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![SCHEMA_VERSION];
    options().serialize_into(&mut out, body)?;
    Ok(out)
}

fn split_version(bytes: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    match bytes.split_first() {
        Some((version, body)) => Ok((*version, body)),
        None => Err(CodecError::Empty),
    }
}

/// Binary form of an identifier
pub fn encode_id(id: &UserId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Identifier from its binary form
pub fn decode_id(bytes: &[u8]) -> Result<UserId, CodecError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| CodecError::InvalidId(bytes.len()))?;
    Ok(UserId::from_bytes(raw))
}

/// Encode a user
///
/// Users without an account URL are rejected so that a half-created account
/// can never reach disk.
pub fn encode_user(user: &User) -> Result<Vec<u8>, CodecError> {
    if user.account_url.is_empty() {
        return Err(CodecError::Incomplete {
            entity: "user",
            field: "account URL",
        });
    }
    encode_record(&UserRecordV1 {
        id: *user.id.as_bytes(),
        account_url: user.account_url.clone(),
        key: KeyRecordV1 {
            family: user.key.family().tag(),
            der: user.key.pkcs8_der().to_vec(),
        },
    })
}

/// Decode a user
pub fn decode_user(bytes: &[u8]) -> Result<User, CodecError> {
    let (version, body) = split_version(bytes)?;
    match version {
        1 => {
            let record: UserRecordV1 = options().deserialize(body)?;
            let family = KeyFamily::from_tag(record.key.family)?;
            let key = AccountKey::from_tagged(family, record.key.der)?;
            Ok(User {
                id: UserId::from_bytes(record.id),
                key,
                account_url: record.account_url,
            })
        }
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}

/// Encode a domain
pub fn encode_domain(domain: &Domain) -> Result<Vec<u8>, CodecError> {
    if domain.name.is_empty() {
        return Err(CodecError::Incomplete {
            entity: "domain",
            field: "name",
        });
    }
    encode_record(&DomainRecordV1 {
        owner: *domain.owner.as_bytes(),
        name: domain.name.clone(),
        certificate: domain.certificate.clone(),
        private_key: domain.private_key.clone(),
    })
}

/// Decode a domain
pub fn decode_domain(bytes: &[u8]) -> Result<Domain, CodecError> {
    let (version, body) = split_version(bytes)?;
    match version {
        1 => {
            let record: DomainRecordV1 = options().deserialize(body)?;
            Ok(Domain {
                name: record.name,
                owner: UserId::from_bytes(record.owner),
                certificate: record.certificate,
                private_key: record.private_key,
            })
        }
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}
