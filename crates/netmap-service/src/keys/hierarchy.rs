//! Trust anchor hierarchy for the network map
//!
//! Owns the three certificate authorities of the network:
//! - The self-signed root every participant trusts
//! - The network map authority that signs snapshots and parameters
//! - The doorman that issues participant certificates
//!
//! Material is either generated at start or loaded from a key directory,
//! and never changes for the lifetime of the process.
//!
//! The operator's own directory subtree (the root's name without its CN) is
//! reserved: the doorman carries it as an excluded name constraint and
//! refuses requests for names inside it.

use netmap_core::{
    CertificateAuthority, CertificateBundle, CertificateRequest, CertificateRole,
    IdentityEnvelope, NetmapError, PrincipalIdentity, TrustRoot,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Validity of the three authorities' own certificates
const AUTHORITY_VALIDITY_DAYS: u32 = 3650;

const ROOT_NAME: &str = "CN=Network Root CA, O=Network Map Operator, L=London, C=GB";
const NETWORK_MAP_NAME: &str = "CN=Network Map, O=Network Map Operator, L=London, C=GB";
const DOORMAN_NAME: &str = "CN=Doorman, O=Network Map Operator, L=London, C=GB";

/// Authorities persisted in a key directory, by file stem
const AUTHORITY_FILES: [&str; 3] = ["root", "network-map", "doorman"];

/// Errors loading or persisting trust anchors
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Key directory I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key directory {0} is incomplete: {1} is missing")]
    Incomplete(PathBuf, String),

    #[error(transparent)]
    Certificate(#[from] NetmapError),
}

/// The network's certificate authorities
#[derive(Debug)]
pub struct TrustAnchorHierarchy {
    root: CertificateAuthority,
    network_map: CertificateAuthority,
    doorman: CertificateAuthority,
    trust_root: TrustRoot,
    reserved: PrincipalIdentity,
    cert_validity_days: u32,
}

impl TrustAnchorHierarchy {
    /// Generate a fresh hierarchy
    pub fn generate(cert_validity_days: u32) -> Result<Self, NetmapError> {
        let root = CertificateAuthority::create_root(
            PrincipalIdentity::parse(ROOT_NAME)?,
            AUTHORITY_VALIDITY_DAYS,
        )?;
        let network_map = root.create_intermediate(
            PrincipalIdentity::parse(NETWORK_MAP_NAME)?,
            AUTHORITY_VALIDITY_DAYS,
            CertificateRole::NetworkMap,
            &[],
        )?;
        let doorman = root.create_intermediate(
            PrincipalIdentity::parse(DOORMAN_NAME)?,
            AUTHORITY_VALIDITY_DAYS,
            CertificateRole::Doorman,
            &[root.subject().without_common_name()],
        )?;

        info!(root = %root.subject(), "Generated trust anchor hierarchy");
        Self::new(root, network_map, doorman, cert_validity_days)
    }

    /// Assemble a hierarchy, checking both authorities hold their roles
    /// directly under the root
    pub fn new(
        root: CertificateAuthority,
        network_map: CertificateAuthority,
        doorman: CertificateAuthority,
        cert_validity_days: u32,
    ) -> Result<Self, NetmapError> {
        let trust_root = root.trust_root()?;
        trust_root
            .validate_authority(&[network_map.der().to_vec()], CertificateRole::NetworkMap)?;
        trust_root.validate_authority(&[doorman.der().to_vec()], CertificateRole::Doorman)?;
        let reserved = root.subject().without_common_name();

        Ok(Self {
            root,
            network_map,
            doorman,
            trust_root,
            reserved,
            cert_validity_days,
        })
    }

    /// Load the hierarchy from `dir`, or generate and persist one there
    ///
    /// Each authority is stored as `<name>.pem` (certificate) and
    /// `<name>.key` (PKCS#8 private key).
    pub fn load_or_generate(dir: &Path, cert_validity_days: u32) -> Result<Self, HierarchyError> {
        let files: Vec<PathBuf> = AUTHORITY_FILES
            .iter()
            .flat_map(|name| [pem_path(dir, name), key_path(dir, name)])
            .collect();
        let missing: Vec<&PathBuf> = files.iter().filter(|path| !path.exists()).collect();

        if missing.is_empty() {
            let load = |name: &str| -> Result<CertificateAuthority, HierarchyError> {
                let cert = read(&pem_path(dir, name))?;
                let key = read(&key_path(dir, name))?;
                Ok(CertificateAuthority::from_pem(&cert, &key)?)
            };
            let root = load("root")?;
            let network_map = load("network-map")?;
            let doorman = load("doorman")?;

            info!(dir = %dir.display(), root = %root.subject(), "Loaded trust anchors");
            return Ok(Self::new(root, network_map, doorman, cert_validity_days)?);
        }

        if missing.len() < files.len() {
            return Err(HierarchyError::Incomplete(
                dir.to_path_buf(),
                missing[0].display().to_string(),
            ));
        }

        let hierarchy = Self::generate(cert_validity_days)?;
        hierarchy.persist(dir)?;
        Ok(hierarchy)
    }

    fn persist(&self, dir: &Path) -> Result<(), HierarchyError> {
        fs::create_dir_all(dir).map_err(|source| HierarchyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for (name, authority) in AUTHORITY_FILES
            .iter()
            .zip([&self.root, &self.network_map, &self.doorman])
        {
            write(&pem_path(dir, name), &authority.to_pem())?;
            write(&key_path(dir, name), &authority.key_pem()?)?;
        }

        info!(dir = %dir.display(), "Persisted trust anchors");
        Ok(())
    }

    /// Issue a name-constrained participant certificate
    ///
    /// The bundle holds the new certificate, the doorman and the root.
    pub fn issue_leaf_certificate(
        &self,
        requested_principal: &PrincipalIdentity,
        request: &CertificateRequest,
    ) -> Result<CertificateBundle, NetmapError> {
        self.check_requestable(requested_principal)?;
        let leaf = self.doorman.issue_node_ca_for_request(
            requested_principal,
            request,
            self.cert_validity_days,
        )?;
        debug!(principal = %requested_principal, "Issued participant certificate");
        self.chain_for(leaf)
    }

    /// Refuse names inside the operator's reserved subtree
    pub fn check_requestable(&self, principal: &PrincipalIdentity) -> Result<(), NetmapError> {
        if principal.is_within(&self.reserved) {
            return Err(NetmapError::InvalidPrincipal(format!(
                "{} is reserved for the network operator",
                principal
            )));
        }
        Ok(())
    }

    /// The operator's directory subtree, closed to participants
    pub fn reserved_subtree(&self) -> &PrincipalIdentity {
        &self.reserved
    }

    /// Sign `payload` under the network map authority
    pub fn sign_with_authority<T: Serialize>(
        &self,
        payload: &T,
    ) -> Result<IdentityEnvelope<T>, NetmapError> {
        IdentityEnvelope::wrap(
            payload,
            self.network_map.key_pair(),
            vec![self.network_map.der().to_vec()],
        )
    }

    /// Full chain for a certificate issued by the doorman
    pub fn chain_for(&self, leaf: Vec<u8>) -> Result<CertificateBundle, NetmapError> {
        CertificateBundle::new(vec![
            leaf,
            self.doorman.der().to_vec(),
            self.root.der().to_vec(),
        ])
    }

    pub fn trust_root(&self) -> &TrustRoot {
        &self.trust_root
    }

    /// The root certificate as PEM, for participants' trust stores
    pub fn truststore_pem(&self) -> String {
        self.trust_root.to_pem()
    }

    pub fn doorman(&self) -> &CertificateAuthority {
        &self.doorman
    }

    pub fn network_map(&self) -> &CertificateAuthority {
        &self.network_map
    }

    pub fn cert_validity_days(&self) -> u32 {
        self.cert_validity_days
    }
}

fn pem_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.pem", name))
}

fn key_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.key", name))
}

fn read(path: &Path) -> Result<String, HierarchyError> {
    fs::read_to_string(path).map_err(|source| HierarchyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), HierarchyError> {
    fs::write(path, contents).map_err(|source| HierarchyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmap_core::{KeyPair, NetworkMap, SecureHash};

    #[test]
    fn test_generated_hierarchy_chains_to_root() {
        let hierarchy = TrustAnchorHierarchy::generate(500).unwrap();
        let trust_root = hierarchy.trust_root();

        assert_eq!(trust_root.subject().common_name(), Some("Network Root CA"));
        assert!(trust_root.validate_path(&[hierarchy.doorman().der().to_vec()]).is_ok());
        assert!(hierarchy.truststore_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_sign_with_authority_verifies_as_network_map() {
        let hierarchy = TrustAnchorHierarchy::generate(500).unwrap();
        let map = NetworkMap {
            participant_hashes: vec![SecureHash::of(b"alice")],
            parameters_hash: SecureHash::of(b"params"),
        };

        let envelope = hierarchy.sign_with_authority(&map).unwrap();
        let (verified, signer) = envelope.verify_with_signer(hierarchy.trust_root()).unwrap();

        assert_eq!(verified, map);
        assert_eq!(signer.common_name(), Some("Network Map"));
        assert_eq!(
            envelope
                .verify_as(hierarchy.trust_root(), CertificateRole::NetworkMap)
                .unwrap(),
            map
        );
    }

    #[test]
    fn test_operator_names_are_not_issued() {
        let hierarchy = TrustAnchorHierarchy::generate(500).unwrap();
        let key = KeyPair::generate("mallory");

        for name in [NETWORK_MAP_NAME, DOORMAN_NAME, "O=Network Map Operator,L=London,C=GB"] {
            let principal = PrincipalIdentity::parse(name).unwrap();
            let request = CertificateRequest::create(&principal, &key).unwrap();
            let err = hierarchy
                .issue_leaf_certificate(&principal, &request)
                .unwrap_err();
            assert!(matches!(err, NetmapError::InvalidPrincipal(_)));
        }

        // The doorman's own constraint holds even if the check is bypassed
        let forged = hierarchy
            .doorman()
            .issue_node_ca(
                &PrincipalIdentity::parse(NETWORK_MAP_NAME).unwrap(),
                &key.to_rcgen().unwrap(),
                500,
            )
            .unwrap();
        let bundle = hierarchy.chain_for(forged).unwrap();
        let err = hierarchy.trust_root().validate_path(&bundle.path()).unwrap_err();
        assert!(matches!(err, NetmapError::NameConstraintViolation { .. }));
    }

    #[test]
    fn test_issue_leaf_certificate_builds_bundle() {
        let hierarchy = TrustAnchorHierarchy::generate(500).unwrap();
        let bob = PrincipalIdentity::parse("O=Bob,L=Paris,C=FR").unwrap();
        let key = KeyPair::generate("bob");
        let request = CertificateRequest::create(&bob, &key).unwrap();

        let bundle = hierarchy.issue_leaf_certificate(&bob, &request).unwrap();
        assert_eq!(bundle.certificates().len(), 3);
        assert_eq!(bundle.root(), hierarchy.trust_root().der());

        let signer = hierarchy.trust_root().validate_path(&bundle.path()).unwrap();
        assert_eq!(signer.subject, bob);
        assert_eq!(signer.public_key, key.public_key());
    }

    #[test]
    fn test_load_or_generate_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");

        let first = TrustAnchorHierarchy::load_or_generate(&keys, 500).unwrap();
        assert!(keys.join("root.pem").exists());
        assert!(keys.join("doorman.key").exists());

        let second = TrustAnchorHierarchy::load_or_generate(&keys, 500).unwrap();
        assert_eq!(second.reserved_subtree(), first.reserved_subtree());
        assert_eq!(second.trust_root(), first.trust_root());
        assert_eq!(second.doorman().der(), first.doorman().der());
        assert_eq!(
            second.network_map().public_key(),
            first.network_map().public_key()
        );
    }

    #[test]
    fn test_incomplete_key_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        TrustAnchorHierarchy::load_or_generate(dir.path(), 500).unwrap();
        fs::remove_file(dir.path().join("doorman.key")).unwrap();

        let err = TrustAnchorHierarchy::load_or_generate(dir.path(), 500).unwrap_err();
        assert!(matches!(err, HierarchyError::Incomplete(_, ref file) if file.ends_with("doorman.key")));
    }
}
