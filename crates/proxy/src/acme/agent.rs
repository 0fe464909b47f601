//! Certificate agent
//!
//! Registers tenants with the CA, obtains certificates for their domains and
//! streams the stored artifacts back out. Every mutation goes through a
//! repository read-modify-write, so registration is idempotent and nothing
//! is persisted when the CA call fails.

use std::io::Write;
use std::sync::Arc;

use acmeproxy_common::{ProxyError, ProxyResult, UserId};
use acmeproxy_storage::{AccountKey, Domain, DomainRepository, Store, User, UserRepository};
use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};
use x509_parser::pem::parse_x509_pem;

use super::client::{AccountCreator, CertificateObtainer, ObtainRequest};
use crate::config::AgentConfig;

const REGISTER_CLIENT: &str = "agent.register_client";
const REGISTER_DOMAIN: &str = "agent.register_domain";
const WRITE_CERTIFICATE: &str = "agent.write_certificate";
const WRITE_PRIVATE_KEY: &str = "agent.write_private_key";
const CERTIFICATE_EXPIRY: &str = "agent.certificate_expiry";

#[derive(Debug, Clone, Copy)]
enum Artifact {
    Certificate,
    PrivateKey,
}

impl Artifact {
    fn op(self) -> &'static str {
        match self {
            Artifact::Certificate => WRITE_CERTIFICATE,
            Artifact::PrivateKey => WRITE_PRIVATE_KEY,
        }
    }

    fn select(self, domain: &Domain) -> &[u8] {
        match self {
            Artifact::Certificate => &domain.certificate,
            Artifact::PrivateKey => &domain.private_key,
        }
    }
}

/// Tenant-facing certificate operations
///
/// Safe to share across threads; calls for different users and domains run
/// in parallel, calls for the same user or domain are serialized.
pub struct Agent {
    users: UserRepository,
    domains: DomainRepository,
    accounts: Arc<dyn AccountCreator>,
    obtainer: Arc<dyn CertificateObtainer>,
    config: AgentConfig,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("users", &self.users)
            .field("domains", &self.domains)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(
        store: &Store,
        accounts: Arc<dyn AccountCreator>,
        obtainer: Arc<dyn CertificateObtainer>,
        config: AgentConfig,
    ) -> Self {
        Self {
            users: store.users(),
            domains: store.domains(),
            accounts,
            obtainer,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Ensure `user_id` has an ACME account
    ///
    /// The first call generates a P-256 account key and registers it with the
    /// CA; later calls return without contacting the CA.
    pub fn register_client(&self, user_id: UserId, email: &str) -> ProxyResult<()> {
        let mut created = false;

        self.users
            .update_user(&user_id, |slot| {
                if slot.is_some() {
                    return Ok(());
                }

                let key = AccountKey::generate()
                    .map_err(|e| ProxyError::wrap("account_key.generate", e))?;
                let account_url = self
                    .accounts
                    .create_account(&key, email)
                    .map_err(|e| ProxyError::wrap("accounts.create_account", e))?;
                if account_url.is_empty() {
                    return Err(ProxyError::unspecified("CA returned an empty account URL")
                        .with_op("accounts.create_account"));
                }

                *slot = Some(User {
                    id: user_id,
                    key,
                    account_url,
                });
                created = true;
                Ok(())
            })
            .map_err(|e| ProxyError::wrap(REGISTER_CLIENT, e).with_message(format!("user {user_id}")))?;

        if created {
            info!(user = %user_id, "Registered ACME account");
        } else {
            debug!(user = %user_id, "ACME account already registered");
        }
        Ok(())
    }

    /// Obtain and store a certificate for `name` on behalf of `user_id`
    ///
    /// Names compare case-insensitively and ignore a trailing dot. Returns
    /// immediately if the user already owns the domain and its certificate;
    /// an owned domain still missing its certificate is ordered again. Fails
    /// with `Conflict` if another user owns the domain, and `NotFound` if the
    /// user was never registered.
    pub fn register_domain(&self, user_id: UserId, name: &str) -> ProxyResult<()> {
        let Some(name) = canonical_name(name) else {
            return Err(ProxyError::unspecified("domain name must not be empty").with_op(REGISTER_DOMAIN));
        };
        let name = name.as_str();
        let context = || format!("domain {name}");

        let user = self
            .users
            .get_user(&user_id)
            .map_err(|e| ProxyError::wrap(REGISTER_DOMAIN, e).with_message(context()))?;

        let mut issued = false;
        self.domains
            .update_domain(name, |slot| {
                if let Some(existing) = slot.as_ref() {
                    if !existing.is_owned_by(&user_id) {
                        warn!(
                            domain = %name,
                            requester = %user_id,
                            owner = %existing.owner,
                            "Domain registration conflicts with existing owner"
                        );
                        return Err(ProxyError::conflict(format!(
                            "domain {name} is registered to another user"
                        )));
                    }
                    if existing.has_certificate() {
                        return Ok(());
                    }
                    debug!(domain = %name, "Stored domain has no certificate, ordering again");
                }

                let request = ObtainRequest {
                    email: String::new(),
                    account_url: user.account_url.clone(),
                    account_key: user.key.clone(),
                    key_type: self.config.key_type,
                    domains: vec![name.to_string()],
                    bundle: self.config.bundle,
                };
                debug!(domain = %name, key_type = %request.key_type, "Requesting certificate");
                let resource = self
                    .obtainer
                    .obtain_certificate(&request)
                    .map_err(|e| ProxyError::wrap("obtainer.obtain_certificate", e))?;

                *slot = Some(Domain {
                    name: name.to_string(),
                    owner: user_id,
                    certificate: resource.certificate,
                    private_key: resource.private_key,
                });
                issued = true;
                Ok(())
            })
            .map_err(|e| ProxyError::wrap(REGISTER_DOMAIN, e).with_message(context()))?;

        if issued {
            info!(domain = %name, user = %user_id, "Certificate issued and stored");
        } else {
            debug!(domain = %name, user = %user_id, "Domain already registered to user");
        }
        Ok(())
    }

    /// Write the PEM certificate for `name` to `sink`
    ///
    /// Fails with `RetryLater` while the certificate has not been stored yet.
    pub fn write_certificate<W>(&self, user_id: UserId, name: &str, sink: &mut W) -> ProxyResult<()>
    where
        W: Write + ?Sized,
    {
        self.write_artifact(Artifact::Certificate, user_id, name, sink)
    }

    /// Write the PEM private key for `name` to `sink`
    pub fn write_private_key<W>(&self, user_id: UserId, name: &str, sink: &mut W) -> ProxyResult<()>
    where
        W: Write + ?Sized,
    {
        self.write_artifact(Artifact::PrivateKey, user_id, name, sink)
    }

    fn write_artifact<W>(
        &self,
        artifact: Artifact,
        user_id: UserId,
        name: &str,
        sink: &mut W,
    ) -> ProxyResult<()>
    where
        W: Write + ?Sized,
    {
        let op = artifact.op();
        let domain = self.load_domain(op, name)?;

        // Ownership is enforced by the API layer in front of the agent.
        if !domain.is_owned_by(&user_id) {
            trace!(domain = %name, requester = %user_id, owner = %domain.owner, "Serving domain to non-owner");
        }

        if !domain.has_certificate() {
            debug!(domain = %name, "Certificate not available yet");
            return Err(ProxyError::retry_later(
                format!("certificate for {name} is not available yet"),
                self.config.retry_after(),
            )
            .with_op(op));
        }

        sink.write_all(artifact.select(&domain))
            .and_then(|()| sink.flush())
            .map_err(|e| ProxyError::wrap(op, e).with_message(format!("domain {name}")))?;

        trace!(domain = %name, artifact = ?artifact, "Artifact written");
        Ok(())
    }

    /// Stored record for `name`
    pub fn domain(&self, name: &str) -> ProxyResult<Domain> {
        self.load_domain("agent.domain", name)
    }

    fn load_domain(&self, op: &'static str, name: &str) -> ProxyResult<Domain> {
        let key = canonical_name(name).unwrap_or_default();
        self.domains
            .get_domain(&key)
            .map_err(|e| ProxyError::wrap(op, e).with_message(format!("domain {name}")))
    }

    /// Names of the domains owned by `user_id`, sorted
    pub fn list_domains(&self, user_id: UserId) -> ProxyResult<Vec<String>> {
        let mut names: Vec<String> = self
            .domains
            .list()
            .map_err(|e| ProxyError::wrap("agent.list_domains", e))?
            .into_iter()
            .filter(|domain| domain.is_owned_by(&user_id))
            .map(|domain| domain.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// `notAfter` of the leaf certificate stored for `name`
    pub fn certificate_expiry(&self, name: &str) -> ProxyResult<DateTime<Utc>> {
        let domain = self.load_domain(CERTIFICATE_EXPIRY, name)?;

        if !domain.has_certificate() {
            return Err(ProxyError::retry_later(
                format!("certificate for {name} is not available yet"),
                self.config.retry_after(),
            )
            .with_op(CERTIFICATE_EXPIRY));
        }

        leaf_not_after(&domain.certificate)
            .map_err(|e| e.with_op(CERTIFICATE_EXPIRY))
    }

    /// Whether the certificate for `name` expires within `renew_before`
    pub fn needs_renewal(&self, name: &str, renew_before: chrono::Duration) -> ProxyResult<bool> {
        let expiry = self.certificate_expiry(name)?;
        let due = expiry
            .checked_sub_signed(renew_before)
            .map_or(true, |deadline| deadline <= Utc::now());

        if due {
            info!(domain = %name, expires = %expiry, "Certificate due for renewal");
        }
        Ok(due)
    }
}

/// Lowercased DNS name without surrounding whitespace or a trailing dot;
/// `None` when nothing is left
fn canonical_name(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// Expiry of the first certificate in a PEM bundle
fn leaf_not_after(pem: &[u8]) -> ProxyResult<DateTime<Utc>> {
    let (_, block) = parse_x509_pem(pem)
        .map_err(|e| ProxyError::unspecified(format!("invalid certificate PEM: {e}")))?;
    let cert = block
        .parse_x509()
        .map_err(|e| ProxyError::unspecified(format!("invalid certificate: {e}")))?;

    let not_after = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(not_after, 0)
        .ok_or_else(|| ProxyError::unspecified(format!("certificate expiry {not_after} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use crate::acme::CertificateResource;

    /// Account creator that counts calls and issues sequential URLs
    #[derive(Default)]
    struct CountingAccounts {
        calls: AtomicUsize,
    }

    impl AccountCreator for CountingAccounts {
        fn create_account(&self, _key: &AccountKey, _email: &str) -> ProxyResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://ca.test/acct/{n}"))
        }
    }

    /// Obtainer returning fixed bytes
    struct StaticObtainer {
        certificate: Vec<u8>,
    }

    impl CertificateObtainer for StaticObtainer {
        fn obtain_certificate(&self, request: &ObtainRequest) -> ProxyResult<CertificateResource> {
            Ok(CertificateResource {
                account_url: request.account_url.clone(),
                certificate: self.certificate.clone(),
                private_key: b"key".to_vec(),
                ..Default::default()
            })
        }
    }

    /// Obtainer whose first order comes back without a certificate
    #[derive(Default)]
    struct SlowIssuer {
        calls: AtomicUsize,
    }

    impl CertificateObtainer for SlowIssuer {
        fn obtain_certificate(&self, _request: &ObtainRequest) -> ProxyResult<CertificateResource> {
            let certificate = match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Vec::new(),
                _ => b"cert".to_vec(),
            };
            Ok(CertificateResource {
                certificate,
                private_key: b"key".to_vec(),
                ..Default::default()
            })
        }
    }

    fn setup(certificate: &[u8]) -> (TempDir, Arc<CountingAccounts>, Agent) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_at(temp_dir.path().join("state.redb")).unwrap();
        let accounts = Arc::new(CountingAccounts::default());
        let agent = Agent::new(
            &store,
            accounts.clone(),
            Arc::new(StaticObtainer {
                certificate: certificate.to_vec(),
            }),
            AgentConfig::default(),
        );
        (temp_dir, accounts, agent)
    }

    #[test]
    fn test_register_client_once() {
        let (_temp_dir, accounts, agent) = setup(b"cert");
        let user = UserId::new();

        agent.register_client(user, "").unwrap();
        agent.register_client(user, "ops@example.com").unwrap();

        assert_eq!(accounts.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_domain_name_rejected() {
        let (_temp_dir, _accounts, agent) = setup(b"cert");
        let user = UserId::new();
        agent.register_client(user, "").unwrap();

        let err = agent.register_domain(user, "  ").unwrap_err();
        assert_eq!(err.op(), Some(REGISTER_DOMAIN));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_write_private_key() {
        let (_temp_dir, _accounts, agent) = setup(b"cert");
        let user = UserId::new();
        agent.register_client(user, "").unwrap();
        agent.register_domain(user, "example.com").unwrap();

        let mut sink = Vec::new();
        agent.write_private_key(user, "example.com", &mut sink).unwrap();
        assert_eq!(sink, b"key");
    }

    #[test]
    fn test_empty_certificate_retries_later() {
        let (_temp_dir, _accounts, agent) = setup(b"");
        let user = UserId::new();
        agent.register_client(user, "").unwrap();
        agent.register_domain(user, "pending.example").unwrap();

        let mut sink = Vec::new();
        let err = agent
            .write_certificate(user, "pending.example", &mut sink)
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(5)));
        assert!(sink.is_empty());

        let err = agent.certificate_expiry("pending.example").unwrap_err();
        assert!(err.retry_after().is_some());
    }

    #[test]
    fn test_reregistration_fills_missing_certificate() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_at(temp_dir.path().join("state.redb")).unwrap();
        let issuer = Arc::new(SlowIssuer::default());
        let agent = Agent::new(
            &store,
            Arc::new(CountingAccounts::default()),
            issuer.clone(),
            AgentConfig::default(),
        );
        let user = UserId::new();
        agent.register_client(user, "").unwrap();

        agent.register_domain(user, "slow.example").unwrap();
        let mut sink = Vec::new();
        let err = agent
            .write_certificate(user, "slow.example", &mut sink)
            .unwrap_err();
        assert!(err.retry_after().is_some());

        agent.register_domain(user, "slow.example").unwrap();
        agent.write_certificate(user, "slow.example", &mut sink).unwrap();
        assert_eq!(sink, b"cert");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);

        agent.register_domain(user, "slow.example").unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("Example.COM").as_deref(), Some("example.com"));
        assert_eq!(canonical_name(" example.com. ").as_deref(), Some("example.com"));
        assert_eq!(canonical_name("."), None);
        assert_eq!(canonical_name("  "), None);
    }

    #[test]
    fn test_invalid_certificate_expiry() {
        let (_temp_dir, _accounts, agent) = setup(b"not a certificate");
        let user = UserId::new();
        agent.register_client(user, "").unwrap();
        agent.register_domain(user, "bad.example").unwrap();

        let err = agent.certificate_expiry("bad.example").unwrap_err();
        assert_eq!(err.op(), Some(CERTIFICATE_EXPIRY));
        assert_eq!(err.kind(), acmeproxy_common::ErrorKind::Unspecified);
    }

    #[test]
    fn test_list_domains_filters_by_owner() {
        let (_temp_dir, _accounts, agent) = setup(b"cert");
        let alice = UserId::new();
        let bob = UserId::new();
        agent.register_client(alice, "").unwrap();
        agent.register_client(bob, "").unwrap();

        agent.register_domain(alice, "b.example").unwrap();
        agent.register_domain(alice, "a.example").unwrap();
        agent.register_domain(bob, "c.example").unwrap();

        assert_eq!(agent.list_domains(alice).unwrap(), vec!["a.example", "b.example"]);
        assert_eq!(agent.list_domains(bob).unwrap(), vec!["c.example"]);
        assert!(agent.list_domains(UserId::new()).unwrap().is_empty());
    }
}
