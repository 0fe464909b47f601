//! HTTP-01 ACME challenge management
//!
//! Stores the key authorization for each pending `(domain, token)` pair so
//! the CA's validation request to
//! `http://<domain>/.well-known/acme-challenge/<token>` can be answered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use acmeproxy_common::ProxyResult;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::client::ChallengeProvider;
use super::error::ChallengeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Registry key; domains compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChallengeKey {
    domain: String,
    token: String,
}

impl ChallengeKey {
    fn new(domain: &str, token: &str) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
            token: token.to_string(),
        }
    }
}

impl fmt::Display for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.domain, self.token)
    }
}

/// Registry of pending HTTP-01 challenges
///
/// Challenges for different tenants' domains are presented, solved and
/// cleaned up concurrently while their certificates are issued in parallel.
///
/// # Thread Safety
///
/// All operations are serialized by one mutex around the backing map.
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct ChallengeSolver {
    /// (domain, token) -> key authorization
    challenges: Arc<Mutex<HashMap<ChallengeKey, String>>>,
}

impl ChallengeSolver {
    /// Create an empty solver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the key authorization for a challenge
    ///
    /// Presenting the same pair again replaces the stored value.
    pub fn present(&self, domain: &str, token: &str, key_auth: &str) {
        let key = ChallengeKey::new(domain, token);
        debug!(challenge = %key, "Registering ACME HTTP-01 challenge");
        self.challenges.lock().insert(key, key_auth.to_string());
    }

    /// Remove a completed or abandoned challenge
    ///
    /// `_key_auth` mirrors the ACME client callback shape; removal is keyed
    /// only by domain and token.
    pub fn clean_up(&self, domain: &str, token: &str, _key_auth: &str) {
        let key = ChallengeKey::new(domain, token);
        if self.challenges.lock().remove(&key).is_some() {
            debug!(challenge = %key, "Removed ACME challenge");
        }
    }

    /// Key authorization for a presented challenge
    pub fn solve_challenge(&self, domain: &str, token: &str) -> Result<String, ChallengeError> {
        let key = ChallengeKey::new(domain, token);
        let result = self.challenges.lock().get(&key).cloned();
        match result {
            Some(key_auth) => {
                trace!(challenge = %key, "ACME challenge token found");
                Ok(key_auth)
            }
            None => {
                trace!(challenge = %key, "ACME challenge token not found");
                Err(ChallengeError::ChallengeFailed {
                    domain: domain.to_string(),
                    token: token.to_string(),
                })
            }
        }
    }

    /// Check if this is an ACME challenge request path
    ///
    /// Returns `Some(token)` if the path matches the challenge prefix,
    /// `None` otherwise.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Number of pending challenges
    pub fn pending_count(&self) -> usize {
        self.challenges.lock().len()
    }

    /// Drop all pending challenges
    pub fn clear(&self) {
        let mut challenges = self.challenges.lock();
        let count = challenges.len();
        challenges.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared all pending ACME challenges");
        }
    }
}

impl ChallengeProvider for ChallengeSolver {
    fn present(&self, domain: &str, token: &str, key_auth: &str) -> ProxyResult<()> {
        ChallengeSolver::present(self, domain, token, key_auth);
        Ok(())
    }

    fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> ProxyResult<()> {
        ChallengeSolver::clean_up(self, domain, token, key_auth);
        Ok(())
    }
}
