//! Certificate path validation against the network trust root
//!
//! A signer presents its certificate path (signer first, issuers after, root
//! excluded). Validation checks, for every link:
//! - the issuer name matches the parent's subject and the signature verifies
//!   under the parent's key
//! - the certificate is inside its validity window
//! - every issuing certificate is a CA, within its path length limit
//! - every subject below a name-constrained CA lies within one of its
//!   permitted directory subtrees and outside all excluded ones
//! - the authority roles (doorman, network map) are only granted by the root
//!
//! Verifiers of operator artifacts additionally require the signer to hold a
//! specific role through `TrustRoot::validate_authority`.

use pem::{EncodeConfig, LineEnding, Pem};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, GeneralSubtree};
use x509_parser::prelude::FromDer;

use crate::crypto::PublicKey;
use crate::error::{NetmapError, Result};
use crate::identity::PrincipalIdentity;

/// PEM label for X.509 certificates
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Private extension naming what a certificate may be used for
pub const CERTIFICATE_ROLE_OID: [u64; 9] = [1, 3, 6, 1, 4, 1, 50530, 1, 1];

/// Role carried in the certificate role extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateRole {
    /// Issuing authority that certifies participants
    Doorman,
    /// Authority that signs snapshots and network parameters
    NetworkMap,
    /// Participant CA certificate
    NodeCa,
    /// Identity key certified by a participant CA
    LegalIdentity,
}

impl CertificateRole {
    fn code(self) -> u8 {
        match self {
            Self::Doorman => 1,
            Self::NetworkMap => 2,
            Self::NodeCa => 4,
            Self::LegalIdentity => 6,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Doorman),
            2 => Some(Self::NetworkMap),
            4 => Some(Self::NodeCa),
            6 => Some(Self::LegalIdentity),
            _ => None,
        }
    }

    /// Only the root may grant these
    pub fn is_authority(self) -> bool {
        matches!(self, Self::Doorman | Self::NetworkMap)
    }

    /// Extension value: the role code as a DER INTEGER
    pub fn to_extension_value(self) -> Vec<u8> {
        vec![0x02, 0x01, self.code()]
    }

    fn from_extension_value(value: &[u8]) -> Option<Self> {
        match value {
            [0x02, 0x01, code] => Self::from_code(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Doorman => "doorman",
            Self::NetworkMap => "network map",
            Self::NodeCa => "node CA",
            Self::LegalIdentity => "legal identity",
        };
        f.write_str(name)
    }
}

/// The single self-signed certificate every path must chain to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRoot {
    der: Vec<u8>,
    subject: PrincipalIdentity,
}

/// The certified signer at the head of a validated path
#[derive(Debug, Clone)]
pub struct ValidatedSigner {
    pub subject: PrincipalIdentity,
    pub public_key: PublicKey,
    pub role: Option<CertificateRole>,
    /// The signer's certificate was issued by the root itself
    pub issued_by_root: bool,
}

/// Name constraints extracted from one issuing certificate
#[derive(Debug, Default)]
struct DirectoryConstraints {
    permitted: Vec<PrincipalIdentity>,
    excluded: Vec<PrincipalIdentity>,
}

impl DirectoryConstraints {
    fn check(&self, subject: &PrincipalIdentity) -> Result<()> {
        if let Some(excluded) = self.excluded.iter().find(|e| subject.is_within(e)) {
            return Err(NetmapError::NameConstraintViolation {
                subject: subject.to_string(),
                permitted: format!("anything but {}", excluded),
            });
        }
        if !self.permitted.is_empty() && !self.permitted.iter().any(|p| subject.is_within(p)) {
            let permitted: Vec<String> = self.permitted.iter().map(|p| p.to_string()).collect();
            return Err(NetmapError::NameConstraintViolation {
                subject: subject.to_string(),
                permitted: permitted.join(" | "),
            });
        }
        Ok(())
    }
}

impl TrustRoot {
    /// Load a trust root from DER, checking its self-signature
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = parse_certificate(der)?;
        cert.verify_signature(None).map_err(|e| {
            NetmapError::UntrustedSignature(format!("Trust root is not self-signed: {}", e))
        })?;
        if !is_ca(&cert)? {
            return Err(NetmapError::UntrustedSignature(
                "Trust root is not a CA certificate".into(),
            ));
        }
        let subject = PrincipalIdentity::from_x509_name(cert.subject())?;
        Ok(Self {
            der: der.to_vec(),
            subject,
        })
    }

    /// Load a trust root from the first certificate in a PEM document
    pub fn from_pem(pem: &str) -> Result<Self> {
        let ders = pem_to_ders(pem)?;
        let first = ders
            .first()
            .ok_or_else(|| NetmapError::MalformedPayload("No certificate in PEM".into()))?;
        Self::from_der(first)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &PrincipalIdentity {
        &self.subject
    }

    pub fn to_pem(&self) -> String {
        der_to_pem(&self.der, CERTIFICATE_LABEL)
    }

    /// Validate `path` (signer first, root excluded) and return the signer
    pub fn validate_path(&self, path: &[Vec<u8>]) -> Result<ValidatedSigner> {
        // A path that redundantly ends in the root itself is accepted.
        let path = match path.split_last() {
            Some((last, rest)) if *last == self.der => rest,
            _ => path,
        };
        if path.is_empty() {
            return Err(NetmapError::UntrustedSignature(
                "Empty certificate path".into(),
            ));
        }

        let root = parse_certificate(&self.der)?;
        let certs = path
            .iter()
            .map(|der| parse_certificate(der))
            .collect::<Result<Vec<_>>>()?;
        let subjects = certs
            .iter()
            .map(|cert| PrincipalIdentity::from_x509_name(cert.subject()))
            .collect::<Result<Vec<_>>>()?;
        let roles = certs
            .iter()
            .map(certificate_role)
            .collect::<Result<Vec<_>>>()?;

        for (index, cert) in certs.iter().enumerate() {
            let issuer = certs.get(index + 1).unwrap_or(&root);
            let issuer_subject = subjects.get(index + 1).unwrap_or(&self.subject);

            let claimed_issuer = PrincipalIdentity::from_x509_name(cert.issuer())?;
            if claimed_issuer != *issuer_subject {
                return Err(NetmapError::UntrustedSignature(format!(
                    "Certificate for {} names issuer {} but is followed by {}",
                    subjects[index], claimed_issuer, issuer_subject
                )));
            }

            cert.verify_signature(Some(issuer.public_key())).map_err(|e| {
                NetmapError::UntrustedSignature(format!(
                    "Certificate for {} not signed by {}: {}",
                    subjects[index], issuer_subject, e
                ))
            })?;

            if !cert.validity().is_valid() {
                return Err(NetmapError::ExpiredCertificate(format!(
                    "{} (valid {} to {})",
                    subjects[index],
                    cert.validity().not_before,
                    cert.validity().not_after
                )));
            }

            if let Some(role) = roles[index].filter(|role| role.is_authority()) {
                if index + 1 != certs.len() {
                    return Err(NetmapError::UntrustedSignature(format!(
                        "{} claims the {} role but was not issued by the root",
                        subjects[index], role
                    )));
                }
            }
        }

        // Every issuing certificate, including the root, constrains what sits
        // below it. `below` counts the non-leaf CA certificates under it.
        let issuers = certs.iter().skip(1).chain(std::iter::once(&root));
        for (offset, issuer) in issuers.enumerate() {
            let position = offset + 1;
            if !is_ca(issuer)? {
                return Err(NetmapError::UntrustedSignature(format!(
                    "{} issued a certificate but is not a CA",
                    subjects.get(position).unwrap_or(&self.subject)
                )));
            }

            if let Some(limit) = path_len(issuer)? {
                let below = position - 1;
                if below as u64 > u64::from(limit) {
                    return Err(NetmapError::UntrustedSignature(format!(
                        "Path length {} exceeds limit {} of {}",
                        below,
                        limit,
                        subjects.get(position).unwrap_or(&self.subject)
                    )));
                }
            }

            let constraints = directory_constraints(issuer)?;
            for subject in &subjects[..position] {
                constraints.check(subject)?;
            }
        }

        let signer = &certs[0];
        let public_key = PublicKey::from_bytes(&signer.public_key().subject_public_key.data)?;
        Ok(ValidatedSigner {
            subject: subjects[0].clone(),
            public_key,
            role: roles[0],
            issued_by_root: certs.len() == 1,
        })
    }

    /// Validate `path` and require a signer certified by the root for `role`
    pub fn validate_authority(
        &self,
        path: &[Vec<u8>],
        role: CertificateRole,
    ) -> Result<ValidatedSigner> {
        let signer = self.validate_path(path)?;
        if signer.role != Some(role) || !signer.issued_by_root {
            return Err(NetmapError::UntrustedSignature(format!(
                "{} is not certified by {} as the {} authority",
                signer.subject, self.subject, role
            )));
        }
        Ok(signer)
    }
}

fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| NetmapError::MalformedPayload(format!("Invalid certificate: {}", e)))?;
    Ok(cert)
}

fn is_ca(cert: &X509Certificate<'_>) -> Result<bool> {
    Ok(cert.basic_constraints()?.map(|bc| bc.value.ca).unwrap_or(false))
}

fn path_len(cert: &X509Certificate<'_>) -> Result<Option<u32>> {
    Ok(cert
        .basic_constraints()?
        .and_then(|bc| bc.value.path_len_constraint))
}

fn certificate_role(cert: &X509Certificate<'_>) -> Result<Option<CertificateRole>> {
    let oid = CERTIFICATE_ROLE_OID.map(|arc| arc.to_string()).join(".");
    let Some(extension) = cert
        .extensions()
        .iter()
        .find(|extension| extension.oid.to_id_string() == oid)
    else {
        return Ok(None);
    };
    CertificateRole::from_extension_value(extension.value)
        .map(Some)
        .ok_or_else(|| NetmapError::MalformedPayload("Unknown certificate role".into()))
}

fn directory_constraints(cert: &X509Certificate<'_>) -> Result<DirectoryConstraints> {
    let Some(extension) = cert.name_constraints()? else {
        return Ok(DirectoryConstraints::default());
    };

    Ok(DirectoryConstraints {
        permitted: directory_names(extension.value.permitted_subtrees.as_deref())?,
        excluded: directory_names(extension.value.excluded_subtrees.as_deref())?,
    })
}

fn directory_names(subtrees: Option<&[GeneralSubtree<'_>]>) -> Result<Vec<PrincipalIdentity>> {
    subtrees
        .unwrap_or_default()
        .iter()
        .filter_map(|subtree| match &subtree.base {
            GeneralName::DirectoryName(name) => Some(PrincipalIdentity::from_x509_name(name)),
            _ => None,
        })
        .collect()
}

/// Encode DER bytes as a PEM block
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    pem::encode_config(
        &Pem::new(label, der),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}

/// Decode every certificate block of a PEM document, in order
pub fn pem_to_ders(document: &str) -> Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(document)
        .map_err(|e| NetmapError::MalformedPayload(format!("PEM: {}", e)))?;
    Ok(blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_LABEL)
        .map(Pem::into_contents)
        .collect())
}

/// Certificates handed to an approved requester: leaf, issuing authority, root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    certificates: Vec<Vec<u8>>,
}

impl CertificateBundle {
    /// Bundle DER certificates, leaf first and root last
    pub fn new(certificates: Vec<Vec<u8>>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(NetmapError::CertificateError("Empty certificate bundle".into()));
        }
        Ok(Self { certificates })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::new(pem_to_ders(pem)?)
    }

    /// PEM concatenation in bundle order
    pub fn to_pem(&self) -> String {
        self.certificates
            .iter()
            .map(|der| der_to_pem(der, CERTIFICATE_LABEL))
            .collect()
    }

    pub fn leaf(&self) -> &[u8] {
        &self.certificates[0]
    }

    pub fn root(&self) -> &[u8] {
        &self.certificates[self.certificates.len() - 1]
    }

    /// The path to embed in envelopes: everything except the root
    pub fn path(&self) -> Vec<Vec<u8>> {
        self.certificates[..self.certificates.len() - 1].to_vec()
    }

    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }
}
