//! Participant registry
//!
//! Accepts signed participant self-descriptions, verifies them against the
//! network trust root and stores them under both their content hash and
//! their primary identity.

use netmap_core::{NetmapError, SecureHash, SignedParticipant, TrustRoot};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::storage::{NetworkStore, ParticipantRecord, UpsertOutcome};

/// Registry of the network's participants
#[derive(Debug, Clone)]
pub struct ParticipantRegistry {
    store: Arc<dyn NetworkStore>,
    trust_root: TrustRoot,
}

impl ParticipantRegistry {
    pub fn new(store: Arc<dyn NetworkStore>, trust_root: TrustRoot) -> Self {
        Self { store, trust_root }
    }

    /// Verify and store a serialized participant envelope
    ///
    /// The envelope must verify against the trust root, and its signer must be
    /// certified for the participant's own primary identity. A re-submission
    /// under the same primary identity replaces the previous record.
    ///
    /// A second (cluster service) identity is recorded as claimed. Its key is
    /// shared by the cluster members and carries no certificate of its own
    /// here, so it is neither checked nor used as an index.
    pub async fn submit(&self, raw_bytes: &[u8]) -> ServiceResult<SecureHash> {
        let envelope = SignedParticipant::from_bytes(raw_bytes)?;
        let hash = envelope.content_hash()?;

        let (descriptor, signer) = envelope.verify_with_signer(&self.trust_root).map_err(|e| {
            warn!(hash = %hash, error = %e, "Rejected participant submission");
            e
        })?;
        descriptor.validate()?;

        let primary = descriptor.primary_identity()?.clone();
        if !signer.is_within(&primary.without_common_name()) {
            warn!(hash = %hash, signer = %signer, identity = %primary, "Signer not certified for identity");
            return Err(ServiceError::Rejected(NetmapError::UntrustedSignature(format!(
                "{} is not certified to sign for {}",
                signer, primary
            ))));
        }

        let record = ParticipantRecord::new(raw_bytes.to_vec(), envelope, descriptor)?;
        match self.store.upsert_participant(record).await? {
            UpsertOutcome::Inserted => {
                info!(hash = %hash, identity = %primary, "Registered participant");
            }
            UpsertOutcome::Unchanged => {
                info!(hash = %hash, identity = %primary, "Participant re-submitted unchanged");
            }
            UpsertOutcome::Superseded(old) => {
                info!(hash = %hash, superseded = %old, identity = %primary, "Updated participant");
            }
        }
        Ok(hash)
    }

    /// Look up a participant record by content hash
    pub async fn lookup(&self, hash: &SecureHash) -> ServiceResult<Arc<ParticipantRecord>> {
        self.store
            .get_participant(hash)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("participant {}", hash)))
    }

    /// Content hashes of all participants, ascending
    pub async fn all_hashes(&self) -> ServiceResult<Vec<SecureHash>> {
        Ok(self.store.participant_hashes().await?)
    }

    /// All participant records, ordered by content hash
    pub async fn records(&self) -> ServiceResult<Vec<Arc<ParticipantRecord>>> {
        Ok(self.store.participants().await?)
    }

    pub async fn len(&self) -> ServiceResult<usize> {
        Ok(self.store.participant_hashes().await?.len())
    }

    /// Remove every participant
    pub async fn purge_all(&self) -> ServiceResult<u64> {
        let count = self.store.purge_participants().await?;
        warn!(count = count, "Purged all participants");
        Ok(count)
    }

    pub fn trust_root(&self) -> &TrustRoot {
        &self.trust_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TrustAnchorHierarchy;
    use crate::storage::MemoryStore;
    use netmap_core::{
        CertificateAuthority, CertificateRequest, KeyPair, NetworkHostAndPort,
        ParticipantDescriptor, PrincipalIdentity,
    };

    fn principal(s: &str) -> PrincipalIdentity {
        PrincipalIdentity::parse(s).unwrap()
    }

    struct Fixture {
        hierarchy: TrustAnchorHierarchy,
        registry: ParticipantRegistry,
    }

    fn fixture() -> Fixture {
        let hierarchy = TrustAnchorHierarchy::generate(500).unwrap();
        let registry =
            ParticipantRegistry::new(Arc::new(MemoryStore::new()), hierarchy.trust_root().clone());
        Fixture {
            hierarchy,
            registry,
        }
    }

    /// Enrolled participant: its CA and certificate path
    fn enrol(hierarchy: &TrustAnchorHierarchy, name: &str) -> (CertificateAuthority, Vec<Vec<u8>>) {
        let identity = principal(name);
        let key = KeyPair::generate(name);
        let request = CertificateRequest::create(&identity, &key).unwrap();
        let bundle = hierarchy.issue_leaf_certificate(&identity, &request).unwrap();
        let node_ca = CertificateAuthority::from_issued(bundle.leaf().to_vec(), key).unwrap();
        (node_ca, bundle.path())
    }

    fn signed(node_ca: &CertificateAuthority, path: Vec<Vec<u8>>, name: &str, serial: u64) -> Vec<u8> {
        let descriptor =
            ParticipantDescriptor::new(principal(name), vec![NetworkHostAndPort::new("localhost", 10002)])
                .with_serial(serial);
        SignedParticipant::wrap(&descriptor, node_ca.key_pair(), path)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_lookup() {
        let f = fixture();
        let (alice, path) = enrol(&f.hierarchy, "O=Alice,L=London,C=GB");
        let bytes = signed(&alice, path, "O=Alice,L=London,C=GB", 1);

        let hash = f.registry.submit(&bytes).await.unwrap();
        let record = f.registry.lookup(&hash).await.unwrap();

        assert_eq!(record.raw_bytes, bytes);
        assert_eq!(f.registry.all_hashes().await.unwrap(), vec![hash]);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture();
        let (alice, path) = enrol(&f.hierarchy, "O=Alice,L=London,C=GB");
        let bytes = signed(&alice, path, "O=Alice,L=London,C=GB", 1);

        let first = f.registry.submit(&bytes).await.unwrap();
        let second = f.registry.submit(&bytes).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.registry.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_supersedes_previous_hash() {
        let f = fixture();
        let (alice, path) = enrol(&f.hierarchy, "O=Alice,L=London,C=GB");
        let v1 = f
            .registry
            .submit(&signed(&alice, path.clone(), "O=Alice,L=London,C=GB", 1))
            .await
            .unwrap();
        let v2 = f
            .registry
            .submit(&signed(&alice, path, "O=Alice,L=London,C=GB", 2))
            .await
            .unwrap();

        assert_ne!(v1, v2);
        assert!(matches!(f.registry.lookup(&v1).await, Err(ServiceError::NotFound(_))));
        assert_eq!(f.registry.all_hashes().await.unwrap(), vec![v2]);
    }

    #[tokio::test]
    async fn test_participant_cannot_register_another_identity() {
        let f = fixture();
        let (alice, path) = enrol(&f.hierarchy, "O=Alice,L=London,C=GB");
        let bytes = signed(&alice, path, "O=Bob,L=London,C=GB", 1);

        let err = f.registry.submit(&bytes).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(NetmapError::UntrustedSignature(_))
        ));
        assert_eq!(f.registry.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cluster_identity_claims_do_not_collide() {
        let f = fixture();
        let cluster = principal("O=Notary Cluster,L=Zurich,C=CH");
        let mut hashes = Vec::new();
        for name in ["O=Notary A,L=Zurich,C=CH", "O=Notary B,L=Geneva,C=CH"] {
            let (ca, path) = enrol(&f.hierarchy, name);
            let descriptor = ParticipantDescriptor::new(
                principal(name),
                vec![NetworkHostAndPort::new("localhost", 10002)],
            )
            .with_service_identity(cluster.clone());
            let bytes = SignedParticipant::wrap(&descriptor, ca.key_pair(), path)
                .unwrap()
                .to_bytes()
                .unwrap();
            hashes.push(f.registry.submit(&bytes).await.unwrap());
        }

        // Each member is held under its own primary identity only
        hashes.sort();
        assert_eq!(f.registry.all_hashes().await.unwrap(), hashes);
        for hash in &hashes {
            let record = f.registry.lookup(hash).await.unwrap();
            assert_eq!(record.descriptor.identities[1], cluster);
        }
    }

    #[tokio::test]
    async fn test_foreign_network_rejected() {
        let f = fixture();
        let foreign = TrustAnchorHierarchy::generate(500).unwrap();
        let (alice, path) = enrol(&foreign, "O=Alice,L=London,C=GB");
        let bytes = signed(&alice, path, "O=Alice,L=London,C=GB", 1);

        assert!(matches!(
            f.registry.submit(&bytes).await,
            Err(ServiceError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_rejected_as_malformed() {
        let f = fixture();
        let err = f.registry.submit(b"\x00\x01garbage").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(NetmapError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_all() {
        let f = fixture();
        for name in ["O=Alice,L=London,C=GB", "O=Bob,L=Paris,C=FR"] {
            let (ca, path) = enrol(&f.hierarchy, name);
            f.registry.submit(&signed(&ca, path, name, 1)).await.unwrap();
        }

        assert_eq!(f.registry.purge_all().await.unwrap(), 2);
        assert!(f.registry.all_hashes().await.unwrap().is_empty());
    }
}
