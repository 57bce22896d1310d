//! Pending certificate signing requests
//!
//! Requests are keyed by the hash of the principal they claim, so one
//! principal has at most one outstanding request. Issuance is cached per
//! request: every retrieval after the first returns the same bundle. The
//! store-wide lock is never held while a certificate is signed.

use netmap_core::{CertificateBundle, CertificateRequest, PrincipalIdentity, SecureHash};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::keys::TrustAnchorHierarchy;

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: SecureHash,
    /// The request as submitted
    pub raw_csr: Vec<u8>,
    pub requested_principal: PrincipalIdentity,
    /// Filled once, by the first retrieval
    pub issued: Arc<OnceCell<CertificateBundle>>,
}

/// Bounded store of certificate requests and their issued bundles
#[derive(Debug)]
pub struct PendingRequestStore {
    hierarchy: Arc<TrustAnchorHierarchy>,
    requests: Mutex<HashMap<SecureHash, PendingRequest>>,
    capacity: usize,
}

impl PendingRequestStore {
    pub fn new(hierarchy: Arc<TrustAnchorHierarchy>, capacity: usize) -> Self {
        Self {
            hierarchy,
            requests: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Derive the request id for a principal
    pub fn request_id(principal: &PrincipalIdentity) -> SecureHash {
        SecureHash::of(principal.to_string().as_bytes())
    }

    /// Record a PEM or DER PKCS#10 request
    ///
    /// Resubmitting the same bytes returns the existing id. Different bytes
    /// for an already requested principal are a conflict.
    pub fn submit(&self, raw_csr: &[u8]) -> ServiceResult<SecureHash> {
        let request = CertificateRequest::parse(raw_csr)?;
        let principal = request.subject().clone();
        self.hierarchy.check_requestable(&principal)?;
        let request_id = Self::request_id(&principal);

        let mut requests = self.requests.lock();
        if let Some(existing) = requests.get(&request_id) {
            if existing.raw_csr == raw_csr {
                return Ok(request_id);
            }
            warn!(request_id = %request_id, principal = %principal, "Conflicting certificate request");
            return Err(ServiceError::Conflict(request_id));
        }

        if requests.len() >= self.capacity {
            warn!(capacity = self.capacity, principal = %principal, "Pending request store full");
            return Err(ServiceError::CapacityExceeded(self.capacity));
        }

        requests.insert(
            request_id,
            PendingRequest {
                request_id,
                raw_csr: raw_csr.to_vec(),
                requested_principal: principal.clone(),
                issued: Arc::new(OnceCell::new()),
            },
        );
        info!(request_id = %request_id, principal = %principal, "Accepted certificate request");
        Ok(request_id)
    }

    /// Issue, or return the already issued, bundle for a request
    ///
    /// Concurrent retrievals of one id wait for a single issuance.
    pub async fn issue(&self, request_id: &SecureHash) -> ServiceResult<CertificateBundle> {
        let pending = self
            .get(request_id)
            .ok_or_else(|| ServiceError::NotFound(format!("certificate request {}", request_id)))?;

        let bundle = pending
            .issued
            .get_or_try_init(|| async {
                let request = CertificateRequest::parse(&pending.raw_csr)?;
                let bundle = self
                    .hierarchy
                    .issue_leaf_certificate(&pending.requested_principal, &request)?;
                info!(
                    request_id = %request_id,
                    principal = %pending.requested_principal,
                    "Issued participant certificate"
                );
                Ok::<_, ServiceError>(bundle)
            })
            .await?;
        Ok(bundle.clone())
    }

    pub fn get(&self, request_id: &SecureHash) -> Option<PendingRequest> {
        self.requests.lock().get(request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmap_core::{CertificateAuthority, KeyPair, NetmapError};

    fn principal(s: &str) -> PrincipalIdentity {
        PrincipalIdentity::parse(s).unwrap()
    }

    fn csr(name: &str) -> (KeyPair, Vec<u8>) {
        let key = KeyPair::generate(name);
        let request = CertificateRequest::create(&principal(name), &key).unwrap();
        (key, request.der().to_vec())
    }

    fn store(capacity: usize) -> PendingRequestStore {
        PendingRequestStore::new(Arc::new(TrustAnchorHierarchy::generate(500).unwrap()), capacity)
    }

    #[test]
    fn test_submit_derives_id_from_principal() {
        let store = store(10);
        let (_, bob) = csr("O=Bob,L=Paris,C=FR");

        let id = store.submit(&bob).unwrap();

        assert_eq!(id, PendingRequestStore::request_id(&principal("O=Bob,L=Paris,C=FR")));
        assert!(store.get(&id).unwrap().issued.get().is_none());
    }

    #[test]
    fn test_identical_resubmission_is_idempotent() {
        let store = store(10);
        let (_, bob) = csr("O=Bob,L=Paris,C=FR");

        assert_eq!(store.submit(&bob).unwrap(), store.submit(&bob).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_different_key_for_same_principal_conflicts() {
        let store = store(10);
        let (first_key, first) = csr("O=Bob,L=Paris,C=FR");
        let (second_key, second) = csr("O=Bob,L=Paris,C=FR");

        let id = store.submit(&first).unwrap();
        assert!(matches!(store.submit(&second), Err(ServiceError::Conflict(c)) if c == id));

        // The certificate still goes to the first requester's key
        let bundle = store.issue(&id).await.unwrap();
        assert!(CertificateAuthority::from_issued(bundle.leaf().to_vec(), first_key).is_ok());
        assert!(CertificateAuthority::from_issued(bundle.leaf().to_vec(), second_key).is_err());
    }

    #[test]
    fn test_operator_names_rejected() {
        let store = store(10);
        for name in [
            "CN=Network Map,O=Network Map Operator,L=London,C=GB",
            "CN=Doorman,O=Network Map Operator,L=London,C=GB",
            "O=Network Map Operator,L=London,C=GB",
        ] {
            let (_, request) = csr(name);
            assert!(matches!(
                store.submit(&request),
                Err(ServiceError::Rejected(NetmapError::InvalidPrincipal(_)))
            ));
        }
        assert!(store.is_empty());

        // Same organisation elsewhere is not the operator
        let (_, elsewhere) = csr("O=Network Map Operator,L=Paris,C=FR");
        assert!(store.submit(&elsewhere).is_ok());
    }

    #[tokio::test]
    async fn test_issue_is_cached() {
        let store = store(10);
        let (key, bob) = csr("O=Bob,L=Paris,C=FR");
        let id = store.submit(&bob).unwrap();

        let first = store.issue(&id).await.unwrap();
        let second = store.issue(&id).await.unwrap();

        assert_eq!(first.to_pem(), second.to_pem());
        assert_eq!(first.certificates().len(), 3);

        // The leaf certifies the requester's own key
        let node_ca = CertificateAuthority::from_issued(first.leaf().to_vec(), key).unwrap();
        assert_eq!(node_ca.subject(), &principal("O=Bob,L=Paris,C=FR"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_retrievals_issue_once() {
        let store = Arc::new(store(10));
        let (_, bob) = csr("O=Bob,L=Paris,C=FR");
        let (_, carol) = csr("O=Carol,L=Berlin,C=DE");
        let bob_id = store.submit(&bob).unwrap();
        let carol_id = store.submit(&carol).unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let id = if i % 2 == 0 { bob_id } else { carol_id };
            handles.push(tokio::spawn(async move { (id, store.issue(&id).await.unwrap()) }));
        }

        let mut issued: HashMap<SecureHash, CertificateBundle> = HashMap::new();
        for handle in handles {
            let (id, bundle) = handle.await.unwrap();
            let first = issued.entry(id).or_insert_with(|| bundle.clone());
            assert_eq!(*first, bundle);
        }
        assert_eq!(issued.len(), 2);
    }

    #[tokio::test]
    async fn test_issue_unknown_request() {
        let store = store(10);
        let unknown = SecureHash::of(b"nobody");
        assert!(matches!(store.issue(&unknown).await, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_capacity_bounds_new_requests_only() {
        let store = store(1);
        let (_, alice) = csr("O=Alice,L=London,C=GB");
        let (_, bob) = csr("O=Bob,L=Paris,C=FR");

        store.submit(&alice).unwrap();
        assert!(matches!(store.submit(&bob), Err(ServiceError::CapacityExceeded(1))));
        // Idempotent resubmission still accepted when full
        assert!(store.submit(&alice).is_ok());
    }

    #[test]
    fn test_garbage_request_rejected() {
        let store = store(10);
        assert!(matches!(
            store.submit(b"not a csr"),
            Err(ServiceError::Rejected(NetmapError::MalformedPayload(_)))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_pem_request_accepted() {
        let store = store(10);
        let key = KeyPair::generate("carol");
        let request = CertificateRequest::create(&principal("O=Carol,L=Berlin,C=DE"), &key).unwrap();

        let id = store.submit(request.to_pem().as_bytes()).unwrap();
        assert!(store.issue(&id).await.is_ok());
    }
}
