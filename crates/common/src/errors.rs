//! Operation-chained error type shared by every acmeproxy layer.
//!
//! Each layer wraps the failure it received with the name of the operation it
//! was performing, so a caller can both branch on the [`ErrorKind`] and print
//! the full path a failure took:
//!
//! ```text
//! agent.register_domain: domain example.com: domains.update: ... : bucket not found
//! ```
//!
//! The kind of a chain is the first non-[`ErrorKind::Unspecified`] kind found
//! walking from the outermost error inwards, so wrapping never hides a
//! `NotFound` or `RetryLater` raised further down.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for operations that fail with a [`ProxyError`].
pub type ProxyResult<T> = Result<T, ProxyError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classification callers are allowed to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Unexpected failure; treat as fatal.
    #[default]
    Unspecified,
    /// The requested user, domain or bucket does not exist.
    NotFound,
    /// The resource exists and belongs to somebody else.
    Conflict,
    /// The artifact is not available yet; retry after the hinted delay.
    RetryLater {
        /// Suggested wait before retrying
        after: Duration,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unspecified => write!(f, "unspecified"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::RetryLater { after } => write!(f, "retry after {after:?}"),
        }
    }
}

/// One entry of a reconstructed error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Operation that produced or wrapped the error, if recorded
    pub op: Option<&'static str>,
    /// Message attached at this level
    pub message: String,
}

/// Error carrying `{op, kind, message, source}`.
///
/// Displays as the non-empty parts joined with `": "`, for example
/// `domains.get: domain example.com: no record`.
#[derive(Debug, Error)]
#[error("{}", render(.op, .kind, .message, .source))]
pub struct ProxyError {
    op: Option<&'static str>,
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

fn render(
    op: &Option<&'static str>,
    kind: &ErrorKind,
    message: &str,
    source: &Option<BoxError>,
) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(op) = op {
        parts.push(op.to_string());
    }
    if !message.is_empty() {
        parts.push(message.to_string());
    }
    if let Some(source) = source {
        parts.push(source.to_string());
    }
    if parts.is_empty() {
        return kind.to_string();
    }
    parts.join(": ")
}

impl ProxyError {
    /// Create a leaf error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            op: None,
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Leaf `NotFound` error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Leaf `Conflict` error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Leaf `RetryLater` error with a wait hint
    pub fn retry_later(message: impl Into<String>, after: Duration) -> Self {
        Self::new(ErrorKind::RetryLater { after }, message)
    }

    /// Leaf `Unspecified` error
    pub fn unspecified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unspecified, message)
    }

    /// Wrap `cause` as the failure of operation `op`.
    ///
    /// The new error is `Unspecified` itself, so [`ProxyError::kind`] keeps
    /// reporting whatever kind the cause carries.
    pub fn wrap(op: &'static str, cause: impl Into<BoxError>) -> Self {
        Self {
            op: Some(op),
            kind: ErrorKind::Unspecified,
            message: String::new(),
            source: Some(cause.into()),
        }
    }

    /// Record the operation name on this error
    pub fn with_op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }

    /// Attach a context message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Operation recorded at this level
    pub fn op(&self) -> Option<&'static str> {
        self.op
    }

    /// Message recorded at this level
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Effective kind of the whole chain.
    pub fn kind(&self) -> ErrorKind {
        if self.kind != ErrorKind::Unspecified {
            return self.kind;
        }
        let mut next = self.source.as_deref().map(|e| e as &(dyn StdError + 'static));
        while let Some(err) = next {
            if let Some(proxy) = err.downcast_ref::<ProxyError>() {
                if proxy.kind != ErrorKind::Unspecified {
                    return proxy.kind;
                }
            }
            next = err.source();
        }
        ErrorKind::Unspecified
    }

    /// Whether the chain is a lookup miss
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether the chain is an ownership conflict
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Wait hint if the chain is `RetryLater`
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind() {
            ErrorKind::RetryLater { after } => Some(after),
            _ => None,
        }
    }

    /// Reconstruct the chain outermost-first.
    ///
    /// Foreign errors in the chain contribute a frame with no operation and
    /// their `Display` text as the message.
    pub fn trace(&self) -> Vec<TraceFrame> {
        let mut frames = vec![TraceFrame {
            op: self.op,
            message: self.message.clone(),
        }];
        let mut next = self.source.as_deref().map(|e| e as &(dyn StdError + 'static));
        while let Some(err) = next {
            match err.downcast_ref::<ProxyError>() {
                Some(proxy) => frames.push(TraceFrame {
                    op: proxy.op,
                    message: proxy.message.clone(),
                }),
                None => frames.push(TraceFrame {
                    op: None,
                    message: err.to_string(),
                }),
            }
            next = err.source();
        }
        frames
    }
}
