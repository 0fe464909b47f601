//! acmeproxy
//!
//! Obtains TLS certificates from an ACME CA on behalf of many tenants, keeps
//! them in an embedded store and serves them back on request.
//!
//! - **Agent**: user and domain registration, certificate retrieval
//! - **Challenge solving**: shared HTTP-01 registry and validation endpoint
//! - **Configuration**: TOML settings for storage and the agent
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use acmeproxy::{Agent, ChallengeSolver, ProxyConfig, UserId};
//!
//! let config = ProxyConfig::from_file("acmeproxy.toml")?;
//! let store = config.open_store()?;
//! let solver = ChallengeSolver::new();
//! let client = Arc::new(MyAcmeClient::new(directory_url, solver.clone()));
//!
//! let agent = Agent::new(&store, client.clone(), client, config.agent.clone());
//! let user = UserId::new();
//! agent.register_client(user, "")?;
//! agent.register_domain(user, "example.com")?;
//!
//! let mut pem = Vec::new();
//! agent.write_certificate(user, "example.com", &mut pem)?;
//! ```

pub mod acme;
pub mod config;

pub use acme::{
    AccountCreator, Agent, CertificateObtainer, CertificateResource, ChallengeError,
    ChallengeProvider, ChallengeResponder, ChallengeSolver, KeyType, ObtainRequest,
    ACME_CHALLENGE_PREFIX,
};
pub use config::{AgentConfig, ConfigError, ProxyConfig};

pub use acmeproxy_common::{ErrorKind, ProxyError, ProxyResult, UserId};
pub use acmeproxy_storage::{AccountKey, Domain, Store, StoreOptions, User};
