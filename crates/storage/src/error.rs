//! Storage and codec error types.

use thiserror::Error;

/// Errors reported by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store has not been opened, or has been closed
    #[error("store is not open")]
    Closed,

    /// Read transaction against a bucket that was never written
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Put with a zero-length key
    #[error("empty key rejected in bucket {bucket}")]
    EmptyKey { bucket: String },

    /// Record changed between the read and the write of an update
    #[error("record in bucket {bucket} changed during update")]
    Modified { bucket: String },

    /// Failure inside the embedded engine
    #[error("storage engine error: {0}")]
    Engine(#[from] redb::Error),

    /// Filesystem failure while opening the database file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Zero-length record
    #[error("record is empty")]
    Empty,

    /// Record written by a schema this build does not know
    #[error("unsupported record schema version {0}")]
    UnsupportedVersion(u8),

    /// Key record tagged with an unknown family
    #[error("unrecognized key family tag {0}")]
    UnknownKeyFamily(u8),

    /// Key algorithm that cannot be persisted
    #[error("unsupported key type: {0}")]
    UnsupportedKey(String),

    /// Key bytes that do not parse for their tagged family
    #[error("invalid {family} private key: {reason}")]
    InvalidKey { family: &'static str, reason: String },

    /// Entity missing a mandatory field
    #[error("incomplete {entity} record: missing {field}")]
    Incomplete {
        entity: &'static str,
        field: &'static str,
    },

    /// Identifier of the wrong length
    #[error("invalid identifier: expected 16 bytes, got {0}")]
    InvalidId(usize),

    /// Key generation or PEM handling failure
    #[error("key error: {0}")]
    Key(#[from] rcgen::Error),

    /// Body serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
