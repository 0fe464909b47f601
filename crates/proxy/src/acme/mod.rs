//! ACME certificate lifecycle for many tenants
//!
//! Obtains certificates from an ACME CA on behalf of registered users, keeps
//! them in the store and hands them back on request, so tenants never run
//! their own ACME client or manage private keys.
//!
//! # Architecture
//!
//! - [`Agent`] - orchestrates user registration, domain registration and
//!   certificate retrieval
//! - [`ChallengeSolver`] - in-memory `(domain, token) -> key authorization`
//!   registry for HTTP-01 challenges
//! - [`ChallengeResponder`] - answers `/.well-known/acme-challenge/<token>`
//!   requests from the solver
//! - [`AccountCreator`] / [`CertificateObtainer`] - the ACME wire client,
//!   supplied by the caller
//!
//! # Challenge Flow
//!
//! When a domain is registered:
//!
//! 1. [`Agent`] loads the user's account and asks the [`CertificateObtainer`]
//!    for a certificate
//! 2. The ACME client calls [`ChallengeProvider::present`] on the solver with
//!    the token and key authorization for the domain
//! 3. The CA requests `/.well-known/acme-challenge/<token>` and the
//!    [`ChallengeResponder`] returns the key authorization
//! 4. The ACME client calls [`ChallengeProvider::clean_up`], finalizes the
//!    order and returns the certificate
//! 5. [`Agent`] persists certificate and key under the domain name

mod agent;
mod challenge;
mod client;
mod error;
mod responder;

pub use agent::Agent;
pub use challenge::{ChallengeSolver, ACME_CHALLENGE_PREFIX};
pub use client::{
    AccountCreator, CertificateObtainer, CertificateResource, ChallengeProvider, KeyType,
    ObtainRequest,
};
pub use error::ChallengeError;
pub use responder::ChallengeResponder;
