//! In-process ACME CA for integration tests.
//!
//! Issues real X.509 certificates signed by a throwaway root, after checking
//! each identifier over HTTP-01 through the solver and responder under test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use acmeproxy::{
    AccountCreator, AccountKey, CertificateObtainer, CertificateResource, ChallengeProvider,
    ChallengeResponder, ChallengeSolver, KeyType, ObtainRequest, ProxyError, ProxyResult,
};
use anyhow::{anyhow, Result};
use http::header::HOST;
use http::{Request, StatusCode};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::Pem;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct FakeAuthority {
    issuer: Mutex<Issuer<'static, KeyPair>>,
    root_pem: String,
    root_der: Vec<u8>,
    provider: ChallengeSolver,
    responder: ChallengeResponder,
    accounts: AtomicUsize,
    orders: AtomicUsize,
    fail_accounts: AtomicBool,
    fail_orders: AtomicBool,
}

impl FakeAuthority {
    pub fn new() -> Result<Arc<Self>> {
        let root_key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params
            .distinguished_name
            .push(DnType::CommonName, "acmeproxy test root");
        let root = params.self_signed(&root_key)?;

        let solver = ChallengeSolver::new();
        Ok(Arc::new(Self {
            root_pem: root.pem(),
            root_der: root.der().to_vec(),
            issuer: Mutex::new(Issuer::new(params, root_key)),
            responder: ChallengeResponder::new(solver.clone()),
            provider: solver,
            accounts: AtomicUsize::new(0),
            orders: AtomicUsize::new(0),
            fail_accounts: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
        }))
    }

    pub fn solver(&self) -> &ChallengeSolver {
        &self.provider
    }

    pub fn accounts_created(&self) -> usize {
        self.accounts.load(Ordering::SeqCst)
    }

    pub fn certificates_issued(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn fail_accounts(&self, fail: bool) {
        self.fail_accounts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Verify the leaf of `chain` against the root; returns its DNS names
    pub fn verify(&self, chain: &[u8]) -> Result<Vec<String>> {
        let blocks = Pem::iter_from_buffer(chain)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("invalid PEM: {e:?}"))?;
        let leaf_block = blocks.first().ok_or_else(|| anyhow!("empty chain"))?;
        let leaf = leaf_block
            .parse_x509()
            .map_err(|e| anyhow!("invalid leaf: {e:?}"))?;
        let (_, root) = x509_parser::parse_x509_certificate(&self.root_der)
            .map_err(|e| anyhow!("invalid root: {e:?}"))?;

        leaf.verify_signature(Some(root.public_key()))
            .map_err(|e| anyhow!("signature check failed: {e:?}"))?;

        let names = leaf
            .subject_alternative_name()
            .map_err(|e| anyhow!("invalid SAN: {e:?}"))?
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    pub fn root_pem(&self) -> &str {
        &self.root_pem
    }

    /// HTTP-01 round trip: present, fetch over HTTP, clean up
    fn validate(&self, order: usize, domain: &str) -> ProxyResult<()> {
        let token = format!("tok_{order}-{}", domain.replace('.', "_"));
        let key_auth = format!("{token}.thumbprint");
        ChallengeProvider::present(&self.provider, domain, &token, &key_auth)?;

        let challenge = Request::get(format!("/.well-known/acme-challenge/{token}"))
            .header(HOST, domain)
            .body(())
            .map_err(|e| ProxyError::wrap("fake_ca.request", e))?;
        let response = self.responder.handle(&challenge);
        let valid =
            response.status() == StatusCode::OK && response.body().as_ref() == key_auth.as_bytes();

        ChallengeProvider::clean_up(&self.provider, domain, &token, &key_auth)?;
        if valid {
            Ok(())
        } else {
            Err(ProxyError::unspecified(format!(
                "HTTP-01 validation failed for {domain}"
            )))
        }
    }
}

impl AccountCreator for FakeAuthority {
    fn create_account(&self, key: &AccountKey, _email: &str) -> ProxyResult<String> {
        if self.fail_accounts.load(Ordering::SeqCst) {
            return Err(ProxyError::unspecified("CA rejected new account"));
        }
        key.key_pair()
            .map_err(|e| ProxyError::wrap("fake_ca.account_key", e))?;
        let n = self.accounts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://ca.test/acme/acct/{n}"))
    }
}

impl CertificateObtainer for FakeAuthority {
    fn obtain_certificate(&self, request: &ObtainRequest) -> ProxyResult<CertificateResource> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ProxyError::unspecified("CA order failed"));
        }
        if request.account_url.is_empty() {
            return Err(ProxyError::unspecified("order without account"));
        }

        let order = self.orders.fetch_add(1, Ordering::SeqCst);
        for domain in &request.domains {
            self.validate(order, domain)?;
        }

        let algorithm = match request.key_type {
            KeyType::Ec256 => &PKCS_ECDSA_P256_SHA256,
            KeyType::Ec384 => &PKCS_ECDSA_P384_SHA384,
            other => {
                return Err(ProxyError::unspecified(format!(
                    "test CA cannot generate {other} keys"
                )))
            }
        };
        let leaf_key =
            KeyPair::generate_for(algorithm).map_err(|e| ProxyError::wrap("fake_ca.leaf_key", e))?;
        let params = CertificateParams::new(request.domains.clone())
            .map_err(|e| ProxyError::wrap("fake_ca.params", e))?;
        let leaf = {
            let issuer = self.issuer.lock();
            params
                .signed_by(&leaf_key, &*issuer)
                .map_err(|e| ProxyError::wrap("fake_ca.sign", e))?
        };

        let mut certificate = leaf.pem();
        if request.bundle {
            certificate.push_str(&self.root_pem);
        }

        Ok(CertificateResource {
            url: format!("https://ca.test/acme/cert/{order}"),
            account_url: request.account_url.clone(),
            certificate: certificate.into_bytes(),
            private_key: leaf_key.serialize_pem().into_bytes(),
            issuer_certificate: self.root_pem.clone().into_bytes(),
        })
    }
}
