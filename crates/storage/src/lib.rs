//! Persistence for acmeproxy.
//!
//! Layers, leaf to root:
//!
//! - [`Store`] - embedded transactional key-value engine with named buckets
//! - [`codec`] - versioned binary records for users, domains and account keys
//! - [`Repository`] - typed read / read-modify-write access per entity
//!
//! ```ignore
//! let store = Store::open_at("/var/lib/acmeproxy/state.redb")?;
//! let users = store.users();
//! let user = users.get_user(&id)?;
//! ```

pub mod codec;
mod engine;
mod error;
mod model;
mod repository;

pub use engine::{ReadBucket, Store, StoreOptions, StoreState, WriteBucket, DEFAULT_FILE_MODE};
pub use error::{CodecError, StorageError};
pub use model::{AccountKey, Domain, KeyFamily, User};
pub use repository::{DomainRepository, Entity, Repository, UserRepository};
