//! # Netmap Core
//!
//! Data model and cryptographic primitives shared by the network map service
//! and the participants that talk to it.
//!
//! ## Key Concepts
//!
//! - **PrincipalIdentity**: X.500 name of a participant, notary or authority
//! - **IdentityEnvelope**: a payload signed by a certified key, carrying the
//!   signer's certificate path so it verifies against the trust root alone
//! - **CertificateAuthority**: a CA certificate plus the key that signs under it
//! - **NetworkParameters / NetworkMap**: the signed artifacts the service publishes
//!
//! ## Trust model
//!
//! 1. One self-signed root anchors the whole network
//! 2. Participant certificates are CA certificates name-constrained to the
//!    participant's own subtree
//! 3. Only the root certifies the doorman and network map authorities, and
//!    operator artifacts are verified against that role
//! 4. Every published artifact is content-addressed by the SHA-256 of its payload

pub mod authority;
pub mod certificate;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod types;

pub use authority::{CertificateAuthority, CertificateRequest};
pub use certificate::{CertificateBundle, CertificateRole, TrustRoot, ValidatedSigner};
pub use crypto::{
    IdentityEnvelope, KeyPair, PublicKey, SignedNetworkMap, SignedNetworkParameters,
    SignedParticipant,
};
pub use error::{NetmapError, Result};
pub use identity::PrincipalIdentity;
pub use types::{
    NetworkHostAndPort, NetworkMap, NetworkParameters, NotaryInfo, ParticipantDescriptor,
    ParticipantLimits, SecureHash,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
