//! Shared types for the acmeproxy workspace.
//!
//! - [`ids`]: typed tenant identifiers
//! - [`errors`]: the operation-chained [`ProxyError`] and its [`ErrorKind`]

pub mod errors;
pub mod ids;

pub use errors::{ErrorKind, ProxyError, ProxyResult, TraceFrame};
pub use ids::UserId;
