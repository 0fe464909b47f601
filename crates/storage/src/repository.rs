//! Typed repositories over the storage engine
//!
//! A [`Repository`] maps one entity type to one bucket. Absence is explicit:
//! [`Repository::update`] hands the callback an `Option<E>` that is `None`
//! when no record exists, and [`Repository::get`] fails with a `NotFound`
//! error instead of returning an empty value.

use std::marker::PhantomData;

use acmeproxy_common::{ProxyError, ProxyResult, UserId};
use tracing::{debug, trace};

use crate::codec;
use crate::engine::Store;
use crate::error::{CodecError, StorageError};
use crate::model::{Domain, User};

/// Bucket holding users, keyed by the binary user ID
pub const USERS_BUCKET: &str = "users";

/// Bucket holding domains, keyed by the DNS name bytes
pub const DOMAINS_BUCKET: &str = "domains";

/// An entity that can be stored in a repository
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    /// Bucket the entity lives in
    const BUCKET: &'static str;
    /// Name used in error messages and logs
    const KIND: &'static str;

    /// Encode to the persisted record format
    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    /// Decode from the persisted record format
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    /// Render a record key for messages
    fn describe_key(key: &[u8]) -> String;
}

impl Entity for User {
    const BUCKET: &'static str = USERS_BUCKET;
    const KIND: &'static str = "user";

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode_user(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode_user(bytes)
    }

    fn describe_key(key: &[u8]) -> String {
        codec::decode_id(key).map_or_else(|_| format!("{key:02x?}"), |id| id.to_string())
    }
}

impl Entity for Domain {
    const BUCKET: &'static str = DOMAINS_BUCKET;
    const KIND: &'static str = "domain";

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode_domain(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode_domain(bytes)
    }

    fn describe_key(key: &[u8]) -> String {
        String::from_utf8_lossy(key).into_owned()
    }
}

/// Repository for one entity type
pub struct Repository<E> {
    store: Store,
    _entity: PhantomData<fn() -> E>,
}

/// Users keyed by [`UserId`]
pub type UserRepository = Repository<User>;

/// Domains keyed by DNS name
pub type DomainRepository = Repository<Domain>;

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    /// Bind a repository to a store
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    fn context(key: &[u8]) -> String {
        format!("{} {}", E::KIND, E::describe_key(key))
    }

    /// Raw bytes under `key`, `None` if absent
    fn load_raw(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        match self.store.with_read(E::BUCKET, |bucket| bucket.get(key)) {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::BucketNotFound(_)) => Ok(None),
            Err(e) => Err(ProxyError::wrap("store.read", e)),
        }
    }

    fn decode_raw(raw: Option<&[u8]>) -> ProxyResult<Option<E>> {
        raw.map(E::decode)
            .transpose()
            .map_err(|e| ProxyError::wrap("codec.decode", e))
    }

    /// Read and decode the record under `key`, `None` if absent
    fn load(&self, key: &[u8]) -> ProxyResult<Option<E>> {
        let raw = self.load_raw(key)?;
        Self::decode_raw(raw.as_deref())
    }

    /// Look up the entity stored under `key`
    ///
    /// Fails with a `NotFound` error when the key or the whole bucket is
    /// absent.
    pub fn get(&self, key: &[u8]) -> ProxyResult<E> {
        match self.load(key) {
            Ok(Some(entity)) => {
                trace!(bucket = E::BUCKET, key = %E::describe_key(key), "Loaded record");
                Ok(entity)
            }
            Ok(None) => Err(ProxyError::not_found(format!("{} not found", Self::context(key)))
                .with_op("repository.get")),
            Err(e) => Err(ProxyError::wrap("repository.get", e).with_message(Self::context(key))),
        }
    }

    /// Atomically read, modify and write the record under `key`
    ///
    /// `update_fn` receives the current entity, or `None` if there is no
    /// record yet, and may replace or mutate it in place. Then:
    ///
    /// - if `update_fn` fails nothing is written and the error is returned
    /// - if the slot is still `None` nothing is written and `None` is returned
    /// - if the entity is unchanged nothing is written
    /// - otherwise the entity is encoded and written in one transaction
    ///
    /// Calls for the same key are linearized across every repository bound
    /// to the same store. The callback runs outside any engine transaction
    /// so it may block on the network; the write transaction re-reads the
    /// record and fails with a `Conflict` error if it no longer matches what
    /// the callback saw. Clearing an existing record is rejected; there is
    /// no delete operation.
    pub fn update<F>(&self, key: &[u8], update_fn: F) -> ProxyResult<Option<E>>
    where
        F: FnOnce(&mut Option<E>) -> ProxyResult<()>,
    {
        let wrap = |e: ProxyError| ProxyError::wrap("repository.update", e).with_message(Self::context(key));

        self.store.with_key_lock(E::BUCKET, key, || {
            let raw = self.load_raw(key).map_err(wrap)?;
            let current = Self::decode_raw(raw.as_deref()).map_err(wrap)?;
            let mut slot = current.clone();
            update_fn(&mut slot).map_err(wrap)?;

            let entity = match (current, slot) {
                (None, None) => {
                    trace!(bucket = E::BUCKET, key = %E::describe_key(key), "Nothing to write");
                    return Ok(None);
                }
                (Some(_), None) => {
                    return Err(wrap(ProxyError::unspecified(
                        "update cleared an existing record",
                    )));
                }
                (Some(old), Some(new)) if old == new => {
                    trace!(bucket = E::BUCKET, key = %E::describe_key(key), "Record unchanged");
                    return Ok(Some(new));
                }
                (_, Some(new)) => new,
            };

            let bytes = entity
                .encode()
                .map_err(|e| wrap(ProxyError::wrap("codec.encode", e)))?;
            self.store
                .with_write(E::BUCKET, |bucket| {
                    if bucket.get(key)? != raw {
                        return Err(StorageError::Modified {
                            bucket: bucket.name().to_string(),
                        });
                    }
                    bucket.put(key, &bytes)
                })
                .map_err(|e: StorageError| match e {
                    StorageError::Modified { .. } => {
                        wrap(ProxyError::conflict("record changed during update").with_source(e))
                    }
                    e => wrap(ProxyError::wrap("store.write", e)),
                })?;

            debug!(
                bucket = E::BUCKET,
                key = %E::describe_key(key),
                bytes = bytes.len(),
                "Persisted record"
            );
            Ok(Some(entity))
        })
    }

    /// Every entity in the bucket, in key order
    pub fn list(&self) -> ProxyResult<Vec<E>> {
        let entries = match self.store.with_read(E::BUCKET, |bucket| bucket.entries()) {
            Ok(entries) => entries,
            Err(StorageError::BucketNotFound(_)) => Vec::new(),
            Err(e) => {
                return Err(ProxyError::wrap("repository.list", ProxyError::wrap("store.read", e))
                    .with_message(E::BUCKET))
            }
        };
        entries
            .iter()
            .map(|(_, raw)| E::decode(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                ProxyError::wrap("repository.list", ProxyError::wrap("codec.decode", e))
                    .with_message(E::BUCKET)
            })
    }
}

impl Repository<User> {
    /// Look up a user
    pub fn get_user(&self, id: &UserId) -> ProxyResult<User> {
        self.get(id.as_bytes())
    }

    /// Read-modify-write a user
    pub fn update_user<F>(&self, id: &UserId, update_fn: F) -> ProxyResult<Option<User>>
    where
        F: FnOnce(&mut Option<User>) -> ProxyResult<()>,
    {
        self.update(id.as_bytes(), update_fn)
    }
}

impl Repository<Domain> {
    /// Look up a domain
    pub fn get_domain(&self, name: &str) -> ProxyResult<Domain> {
        self.get(name.as_bytes())
    }

    /// Read-modify-write a domain
    pub fn update_domain<F>(&self, name: &str, update_fn: F) -> ProxyResult<Option<Domain>>
    where
        F: FnOnce(&mut Option<Domain>) -> ProxyResult<()>,
    {
        self.update(name.as_bytes(), update_fn)
    }
}

impl Store {
    /// User repository bound to this store
    pub fn users(&self) -> UserRepository {
        Repository::new(self.clone())
    }

    /// Domain repository bound to this store
    pub fn domains(&self) -> DomainRepository {
        Repository::new(self.clone())
    }
}
