//! ACME error types.

use acmeproxy_common::ProxyError;
use thiserror::Error;

/// Challenge solver errors
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// No key authorization was presented for this domain and token
    #[error("no HTTP-01 challenge for domain {domain} token {token}")]
    ChallengeFailed { domain: String, token: String },
}

impl From<ChallengeError> for ProxyError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::ChallengeFailed { .. } => {
                ProxyError::not_found("challenge not present").with_source(err)
            }
        }
    }
}
