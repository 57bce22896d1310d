//! Error types for the network map core

use thiserror::Error;

/// Result type alias using NetmapError
pub type Result<T> = std::result::Result<T, NetmapError>;

/// Errors raised while decoding, verifying or issuing identity material
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetmapError {
    /// Bytes could not be decoded into the expected structure
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Signature or certificate path did not verify against the trust root
    #[error("Untrusted signature: {0}")]
    UntrustedSignature(String),

    /// A certificate in the signer's path is outside its validity window
    #[error("Certificate expired or not yet valid: {0}")]
    ExpiredCertificate(String),

    /// A certificate was used to sign outside its permitted name subtree
    #[error("Name constraint violation: {subject} is not within {permitted}")]
    NameConstraintViolation { subject: String, permitted: String },

    /// Principal name is missing a mandatory attribute or is otherwise invalid
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    /// Certificate or CSR construction failed
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Cryptographic error (key encoding, signing)
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl NetmapError {
    /// Whether this error is a verification failure of submitted material
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            NetmapError::UntrustedSignature(_)
                | NetmapError::ExpiredCertificate(_)
                | NetmapError::NameConstraintViolation { .. }
        )
    }
}

impl From<ed25519_dalek::SignatureError> for NetmapError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        NetmapError::UntrustedSignature(err.to_string())
    }
}

impl From<serde_json::Error> for NetmapError {
    fn from(err: serde_json::Error) -> Self {
        NetmapError::MalformedPayload(err.to_string())
    }
}

impl From<coset::CoseError> for NetmapError {
    fn from(err: coset::CoseError) -> Self {
        NetmapError::MalformedPayload(format!("COSE: {:?}", err))
    }
}

impl From<rcgen::Error> for NetmapError {
    fn from(err: rcgen::Error) -> Self {
        NetmapError::CertificateError(err.to_string())
    }
}

impl From<x509_parser::error::X509Error> for NetmapError {
    fn from(err: x509_parser::error::X509Error) -> Self {
        NetmapError::MalformedPayload(format!("X.509: {}", err))
    }
}
