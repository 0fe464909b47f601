//! HTTP-01 validation endpoint
//!
//! Answers the CA's `GET /.well-known/acme-challenge/<token>` request with the
//! key authorization held by the [`ChallengeSolver`]. The listener that
//! receives the request belongs to the embedding server.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderValue, Request, Response, StatusCode};
use tracing::debug;

use super::challenge::ChallengeSolver;

/// Serves presented challenges over HTTP
#[derive(Debug, Clone)]
pub struct ChallengeResponder {
    solver: ChallengeSolver,
}

impl ChallengeResponder {
    pub fn new(solver: ChallengeSolver) -> Self {
        Self { solver }
    }

    pub fn solver(&self) -> &ChallengeSolver {
        &self.solver
    }

    /// Response for an already-parsed domain and token
    ///
    /// `200 text/plain` carrying the key authorization, or an empty `404`.
    pub fn respond(&self, domain: &str, token: &str) -> Response<Bytes> {
        match self.solver.solve_challenge(domain, token) {
            Ok(key_auth) => {
                let mut response = Response::new(Bytes::from(key_auth));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                response
            }
            Err(e) => {
                debug!(error = %e, "Rejecting ACME challenge request");
                not_found()
            }
        }
    }

    /// Route a full request
    ///
    /// The domain comes from the `Host` header, falling back to the URI
    /// authority. Requests outside the challenge prefix get a `404`.
    pub fn handle<B>(&self, request: &Request<B>) -> Response<Bytes> {
        let Some(token) = ChallengeSolver::extract_token(request.uri().path()) else {
            return not_found();
        };
        if token.is_empty() {
            return not_found();
        }
        let Some(domain) = request_domain(request) else {
            debug!(token = %token, "ACME challenge request without host");
            return not_found();
        };
        self.respond(&domain, token)
    }
}

fn not_found() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Lowercased request host without port
fn request_domain<B>(request: &Request<B>) -> Option<String> {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())?;
    let host = strip_port(host.trim());
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
