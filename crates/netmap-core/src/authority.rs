//! Certificate authorities and certificate signing requests
//!
//! A `CertificateAuthority` pairs a CA certificate with the Ed25519 key that
//! can sign under it. The network runs three: a self-signed root, an issuing
//! authority ("doorman") that certifies participants, and a snapshot-signing
//! authority. Participant certificates are themselves CA certificates, name
//! constrained to the participant's own directory subtree.
//!
//! Every issued certificate carries a role extension. The root grants the
//! authority roles; the doorman grants `NodeCa`.

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CustomExtension,
    GeneralSubtree, IsCa, KeyUsagePurpose, NameConstraints, PublicKeyData, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::certificate::{
    der_to_pem, CertificateRole, TrustRoot, CERTIFICATE_LABEL, CERTIFICATE_ROLE_OID,
};
use crate::crypto::{KeyPair, PublicKey};
use crate::error::{NetmapError, Result};
use crate::identity::PrincipalIdentity;

/// PEM label for PKCS#10 requests
pub const CERTIFICATE_REQUEST_LABEL: &str = "CERTIFICATE REQUEST";

/// A CA certificate together with its signing key
pub struct CertificateAuthority {
    /// Issuer handle used when signing subordinate certificates
    issuer: rcgen::Certificate,
    /// Certificate exactly as issued
    der: Vec<u8>,
    subject: PrincipalIdentity,
    key_pair: KeyPair,
    signing_key: rcgen::KeyPair,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.subject.to_string())
            .field("key_pair", &self.key_pair)
            .finish()
    }
}

impl CertificateAuthority {
    /// Create a self-signed root authority with a fresh key
    pub fn create_root(subject: PrincipalIdentity, validity_days: u32) -> Result<Self> {
        let key_pair = KeyPair::generate(subject.to_string());
        let signing_key = key_pair.to_rcgen()?;

        let issuer = ca_params(&subject, validity_days)?.self_signed(&signing_key)?;

        Ok(Self {
            der: issuer.der().to_vec(),
            issuer,
            subject,
            key_pair,
            signing_key,
        })
    }

    /// Create an intermediate authority signed by this one, with a fresh key
    ///
    /// Nothing the intermediate issues may be named within `excluded`.
    pub fn create_intermediate(
        &self,
        subject: PrincipalIdentity,
        validity_days: u32,
        role: CertificateRole,
        excluded: &[PrincipalIdentity],
    ) -> Result<Self> {
        let key_pair = KeyPair::generate(subject.to_string());
        let signing_key = key_pair.to_rcgen()?;

        let mut params = ca_params(&subject, validity_days)?;
        params.custom_extensions.push(role_extension(role));
        if !excluded.is_empty() {
            params.name_constraints = Some(NameConstraints {
                permitted_subtrees: vec![],
                excluded_subtrees: excluded
                    .iter()
                    .map(|name| GeneralSubtree::DirectoryName(name.to_distinguished_name()))
                    .collect(),
            });
        }
        let certificate = params.signed_by(&signing_key, &self.issuer, &self.signing_key)?;
        Self::from_issued(certificate.der().to_vec(), key_pair)
    }

    /// Reconstruct an authority from a certificate it was issued and its key
    pub fn from_issued(der: Vec<u8>, key_pair: KeyPair) -> Result<Self> {
        let signing_key = key_pair.to_rcgen()?;
        let pem = der_to_pem(&der, CERTIFICATE_LABEL);

        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(&der)
            .map_err(|e| NetmapError::MalformedPayload(format!("Invalid certificate: {}", e)))?;
        let subject = PrincipalIdentity::from_x509_name(parsed.subject())?;
        if *parsed.public_key().subject_public_key.data != key_pair.verifying_key_bytes()[..] {
            return Err(NetmapError::CryptoError(format!(
                "Key does not match the certificate of {}",
                subject
            )));
        }

        // rcgen signs under an issuer's params; the re-signed copy is never
        // published, only its name and key are used.
        let issuer = CertificateParams::from_ca_cert_pem(&pem)?.self_signed(&signing_key)?;

        Ok(Self {
            issuer,
            der,
            subject,
            key_pair,
            signing_key,
        })
    }

    /// Load an authority from a PEM certificate and a PKCS#8 PEM key
    pub fn from_pem(certificate_pem: &str, key_pem: &str) -> Result<Self> {
        let der = crate::certificate::pem_to_ders(certificate_pem)?
            .into_iter()
            .next()
            .ok_or_else(|| NetmapError::MalformedPayload("No certificate in PEM".into()))?;
        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(&der)
            .map_err(|e| NetmapError::MalformedPayload(format!("Invalid certificate: {}", e)))?;
        let kid = PrincipalIdentity::from_x509_name(parsed.subject())?.to_string();
        let key_pair = KeyPair::from_pkcs8_pem(kid, key_pem)?;
        Self::from_issued(der, key_pair)
    }

    /// Issue a participant CA certificate for `principal`
    ///
    /// The certificate may only certify names within `principal`'s directory
    /// subtree with the common name stripped.
    pub fn issue_node_ca(
        &self,
        principal: &PrincipalIdentity,
        public_key: &impl PublicKeyData,
        validity_days: u32,
    ) -> Result<Vec<u8>> {
        let mut params = ca_params(principal, validity_days)?;
        params.name_constraints = Some(NameConstraints {
            permitted_subtrees: vec![GeneralSubtree::DirectoryName(
                principal.without_common_name().to_distinguished_name(),
            )],
            excluded_subtrees: vec![],
        });
        params.custom_extensions.push(role_extension(CertificateRole::NodeCa));
        let certificate = params.signed_by(public_key, &self.issuer, &self.signing_key)?;
        Ok(certificate.der().to_vec())
    }

    /// Issue a participant CA certificate for the key in `request`
    pub fn issue_node_ca_for_request(
        &self,
        principal: &PrincipalIdentity,
        request: &CertificateRequest,
        validity_days: u32,
    ) -> Result<Vec<u8>> {
        let csr = CertificateSigningRequestParams::from_pem(&request.to_pem())?;
        self.issue_node_ca(principal, &csr.public_key, validity_days)
    }

    /// Issue an end-entity signing certificate for `principal`
    ///
    /// Used by a participant to certify its own identity keys below its
    /// participant CA.
    pub fn issue_subordinate(
        &self,
        principal: &PrincipalIdentity,
        public_key: &impl PublicKeyData,
        validity_days: u32,
    ) -> Result<Vec<u8>> {
        let mut params = base_params(principal, validity_days)?;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params
            .custom_extensions
            .push(role_extension(CertificateRole::LegalIdentity));
        let certificate = params.signed_by(public_key, &self.issuer, &self.signing_key)?;
        Ok(certificate.der().to_vec())
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &PrincipalIdentity {
        &self.subject
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    pub fn to_pem(&self) -> String {
        der_to_pem(&self.der, CERTIFICATE_LABEL)
    }

    pub fn key_pem(&self) -> Result<String> {
        self.key_pair.to_pkcs8_pem()
    }

    /// Treat this authority's certificate as a trust root
    pub fn trust_root(&self) -> Result<TrustRoot> {
        TrustRoot::from_der(&self.der)
    }
}

fn base_params(subject: &PrincipalIdentity, validity_days: u32) -> Result<CertificateParams> {
    let now = OffsetDateTime::now_utc();
    let not_after = now
        .checked_add(Duration::days(i64::from(validity_days)))
        .ok_or_else(|| NetmapError::CertificateError("Validity period overflows".into()))?;

    let mut serial = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut serial);
    serial[0] &= 0x7f;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params.not_before = now;
    params.not_after = not_after;
    params.serial_number = Some(SerialNumber::from_slice(&serial));
    Ok(params)
}

fn ca_params(subject: &PrincipalIdentity, validity_days: u32) -> Result<CertificateParams> {
    let mut params = base_params(subject, validity_days)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Ok(params)
}

fn role_extension(role: CertificateRole) -> CustomExtension {
    CustomExtension::from_oid_content(&CERTIFICATE_ROLE_OID, role.to_extension_value())
}

/// A verified PKCS#10 certificate signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    der: Vec<u8>,
    subject: PrincipalIdentity,
}

impl CertificateRequest {
    /// Build and sign a request for `principal` with `key`
    pub fn create(principal: &PrincipalIdentity, key: &KeyPair) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = principal.to_distinguished_name();
        let request = params.serialize_request(&key.to_rcgen()?)?;
        Self::parse(request.der())
    }

    /// Parse a request from PEM or DER bytes and check its self-signature
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let der = if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            pem::parse_many(bytes)
                .map_err(|e| NetmapError::MalformedPayload(format!("PEM: {}", e)))?
                .into_iter()
                .find(|block| block.tag().ends_with(CERTIFICATE_REQUEST_LABEL))
                .map(pem::Pem::into_contents)
                .ok_or_else(|| {
                    NetmapError::MalformedPayload("No certificate request in PEM".into())
                })?
        } else {
            bytes.to_vec()
        };

        let (_, request) = X509CertificationRequest::from_der(&der)
            .map_err(|e| NetmapError::MalformedPayload(format!("Invalid CSR: {}", e)))?;
        request.verify_signature().map_err(|e| {
            NetmapError::UntrustedSignature(format!("CSR signature does not verify: {}", e))
        })?;

        let info = &request.certification_request_info;
        PublicKey::from_bytes(&info.subject_pki.subject_public_key.data).map_err(|_| {
            NetmapError::MalformedPayload("CSR key is not an Ed25519 key".into())
        })?;
        let subject = PrincipalIdentity::from_x509_name(&info.subject)?;

        Ok(Self { der, subject })
    }

    /// Canonical DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The principal the requester claims
    pub fn subject(&self) -> &PrincipalIdentity {
        &self.subject
    }

    pub fn to_pem(&self) -> String {
        der_to_pem(&self.der, CERTIFICATE_REQUEST_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(s: &str) -> PrincipalIdentity {
        PrincipalIdentity::parse(s).unwrap()
    }

    fn root() -> CertificateAuthority {
        CertificateAuthority::create_root(principal("CN=Root,O=Operator,L=London,C=GB"), 3650)
            .unwrap()
    }

    #[test]
    fn test_root_is_its_own_trust_root() {
        let root = root();
        let trust_root = root.trust_root().unwrap();
        assert_eq!(trust_root.der(), root.der());
        assert_eq!(trust_root.subject(), root.subject());
    }

    #[test]
    fn test_authority_pem_roundtrip() {
        let root = root();
        let doorman = root
            .create_intermediate(
                principal("CN=Doorman,O=Operator,L=London,C=GB"),
                3650,
                CertificateRole::Doorman,
                &[],
            )
            .unwrap();

        let restored =
            CertificateAuthority::from_pem(&doorman.to_pem(), &doorman.key_pem().unwrap()).unwrap();
        assert_eq!(restored.der(), doorman.der());
        assert_eq!(restored.subject(), doorman.subject());

        // The restored authority still issues certificates that validate
        let key = KeyPair::generate("alice");
        let leaf = restored
            .issue_node_ca(&principal("O=Alice,L=London,C=GB"), &key.to_rcgen().unwrap(), 500)
            .unwrap();
        let signer = root
            .trust_root()
            .unwrap()
            .validate_path(&[leaf, restored.der().to_vec()])
            .unwrap();
        assert_eq!(signer.public_key, key.public_key());
    }

    #[test]
    fn test_from_issued_rejects_mismatched_key() {
        let root = root();
        let err = CertificateAuthority::from_issued(root.der().to_vec(), KeyPair::generate("other"))
            .unwrap_err();
        assert!(matches!(err, NetmapError::CryptoError(_)));
    }

    #[test]
    fn test_csr_parse_accepts_pem_and_der() {
        let key = KeyPair::generate("bob");
        let request = CertificateRequest::create(&principal("O=Bob,L=Paris,C=FR"), &key).unwrap();

        let from_der = CertificateRequest::parse(request.der()).unwrap();
        let from_pem = CertificateRequest::parse(request.to_pem().as_bytes()).unwrap();

        assert_eq!(from_der, request);
        assert_eq!(from_pem, request);
        assert_eq!(request.subject().organisation(), "Bob");
    }

    #[test]
    fn test_csr_with_broken_signature_rejected() {
        let key = KeyPair::generate("bob");
        let request = CertificateRequest::create(&principal("O=Bob,L=Paris,C=FR"), &key).unwrap();

        let mut tampered = request.der().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;

        assert!(CertificateRequest::parse(&tampered).is_err());
        assert!(CertificateRequest::parse(b"not a csr").is_err());
    }

    #[test]
    fn test_issue_for_request_binds_requester_key() {
        let root = root();
        let doorman = root
            .create_intermediate(
                principal("CN=Doorman,O=Operator,L=London,C=GB"),
                3650,
                CertificateRole::Doorman,
                &[],
            )
            .unwrap();
        let key = KeyPair::generate("bob");
        let bob = principal("O=Bob,L=Paris,C=FR");
        let request = CertificateRequest::create(&bob, &key).unwrap();

        let leaf = doorman.issue_node_ca_for_request(&bob, &request, 500).unwrap();
        let signer = root
            .trust_root()
            .unwrap()
            .validate_path(&[leaf, doorman.der().to_vec()])
            .unwrap();
        assert_eq!(signer.subject, bob);
        assert_eq!(signer.public_key, key.public_key());
    }

    #[test]
    fn test_authority_role_below_root_rejected() {
        let root = root();
        let doorman = root
            .create_intermediate(
                principal("CN=Doorman,O=Operator,L=London,C=GB"),
                3650,
                CertificateRole::Doorman,
                &[],
            )
            .unwrap();
        let key = KeyPair::generate("mallory");

        let mut params = ca_params(&principal("CN=Network Map,O=Mallory,L=Paris,C=FR"), 500).unwrap();
        params
            .custom_extensions
            .push(role_extension(CertificateRole::NetworkMap));
        let claimed = params
            .signed_by(&key.to_rcgen().unwrap(), &doorman.issuer, &doorman.signing_key)
            .unwrap();

        let err = root
            .trust_root()
            .unwrap()
            .validate_path(&[claimed.der().to_vec(), doorman.der().to_vec()])
            .unwrap_err();
        assert!(matches!(err, NetmapError::UntrustedSignature(_)));
    }

    #[test]
    fn test_expired_certificate_rejected() {
        let root = root();
        let doorman = root
            .create_intermediate(
                principal("CN=Doorman,O=Operator,L=London,C=GB"),
                3650,
                CertificateRole::Doorman,
                &[],
            )
            .unwrap();
        let key = KeyPair::generate("alice");

        let mut params = ca_params(&principal("O=Alice,L=London,C=GB"), 1).unwrap();
        params.not_before = OffsetDateTime::now_utc() - Duration::days(30);
        params.not_after = OffsetDateTime::now_utc() - Duration::days(1);
        let expired = params
            .signed_by(&key.to_rcgen().unwrap(), &doorman.issuer, &doorman.signing_key)
            .unwrap();

        let err = root
            .trust_root()
            .unwrap()
            .validate_path(&[expired.der().to_vec(), doorman.der().to_vec()])
            .unwrap_err();
        assert!(matches!(err, NetmapError::ExpiredCertificate(_)));
    }
}
