//! Signing keys and self-verifying identity envelopes
//!
//! Envelopes are COSE_Sign1 structures signed with Ed25519. The payload is the
//! JSON serialization of the wrapped value. The protected header carries the
//! algorithm, a key ID and the signer's certificate path (`x5chain`, signer
//! first, root excluded) so that a verifier holding only the network's trust
//! root can check who signed.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair for signing
//! - `PublicKey`: Ed25519 public key for verification
//! - `IdentityEnvelope<T>`: COSE_Sign1 wrapped payload plus certificate path

use crate::certificate::{CertificateRole, TrustRoot, ValidatedSigner};
use crate::error::{NetmapError, Result};
use crate::identity::PrincipalIdentity;
use crate::types::{NetworkMap, NetworkParameters, ParticipantDescriptor, SecureHash};
use coset::{
    cbor::value::Value, iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder, Label,
};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Serialize};

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// COSE header label for an X.509 certificate chain (RFC 9360)
const X5CHAIN_LABEL: i64 = 33;

/// A payload signed by a certified key
#[derive(Debug, Clone)]
pub struct IdentityEnvelope<T> {
    cose: CoseSign1,
    _marker: std::marker::PhantomData<T>,
}

/// Signed participant self-description
pub type SignedParticipant = IdentityEnvelope<ParticipantDescriptor>;

/// Signed network parameters
pub type SignedNetworkParameters = IdentityEnvelope<NetworkParameters>;

/// Signed membership snapshot
pub type SignedNetworkMap = IdentityEnvelope<NetworkMap>;

impl<T> IdentityEnvelope<T> {
    /// Get the raw COSE_Sign1 structure
    pub fn cose(&self) -> &CoseSign1 {
        &self.cose
    }

    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// Get the signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.cose.signature
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(NetmapError::from)
    }

    /// Deserialize from CBOR bytes
    ///
    /// Only the envelope structure is decoded; neither the payload nor the
    /// signature is checked.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(NetmapError::from)?;
        Ok(Self {
            cose,
            _marker: std::marker::PhantomData,
        })
    }

    /// The unverified serialized payload
    pub fn payload_bytes(&self) -> Result<&[u8]> {
        self.cose
            .payload
            .as_deref()
            .ok_or_else(|| NetmapError::MalformedPayload("Envelope has no payload".into()))
    }

    /// Content address: SHA-256 of the unverified payload bytes
    pub fn content_hash(&self) -> Result<SecureHash> {
        Ok(SecureHash::of(self.payload_bytes()?))
    }

    /// DER certificates of the signer's path, signer first
    pub fn cert_path(&self) -> Result<Vec<Vec<u8>>> {
        let (_, value) = self
            .cose
            .protected
            .header
            .rest
            .iter()
            .find(|(label, _)| *label == Label::Int(X5CHAIN_LABEL))
            .ok_or_else(|| {
                NetmapError::MalformedPayload("Envelope carries no certificate path".into())
            })?;

        match value {
            Value::Bytes(single) => Ok(vec![single.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Bytes(der) => Ok(der.clone()),
                    _ => Err(NetmapError::MalformedPayload(
                        "Certificate path entry is not a byte string".into(),
                    )),
                })
                .collect(),
            _ => Err(NetmapError::MalformedPayload(
                "Certificate path has an unexpected type".into(),
            )),
        }
    }

    /// DER certificate of the signer itself
    pub fn signer_certificate(&self) -> Result<Vec<u8>> {
        self.cert_path()?
            .into_iter()
            .next()
            .ok_or_else(|| NetmapError::MalformedPayload("Certificate path is empty".into()))
    }

    /// Check the signer's path against `trust_root` and the signature against
    /// the signer's key, returning the certified signer name
    pub fn verify_signature(&self, trust_root: &TrustRoot) -> Result<PrincipalIdentity> {
        let signer = trust_root.validate_path(&self.cert_path()?)?;
        self.check_signature(signer)
    }

    /// As `verify_signature`, but the signer must hold `role` directly under
    /// the root
    pub fn verify_authority_signature(
        &self,
        trust_root: &TrustRoot,
        role: CertificateRole,
    ) -> Result<PrincipalIdentity> {
        let signer = trust_root.validate_authority(&self.cert_path()?, role)?;
        self.check_signature(signer)
    }

    fn check_signature(&self, signer: ValidatedSigner) -> Result<PrincipalIdentity> {
        if self.cose.protected.header.alg != Some(coset::Algorithm::Assigned(EDDSA_ALG)) {
            return Err(NetmapError::UntrustedSignature(
                "Envelope is not signed with EdDSA".into(),
            ));
        }

        signer.public_key.verify_cose(&self.cose)?;
        Ok(signer.subject)
    }
}

impl<T: Serialize> IdentityEnvelope<T> {
    /// Sign `payload` with `key`, embedding the signer's certificate path
    pub fn wrap(payload: &T, key: &KeyPair, cert_path: Vec<Vec<u8>>) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| NetmapError::SerializationError(e.to_string()))?;
        let cose = key.sign_cose(&bytes, cert_path)?;
        Ok(Self {
            cose,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: DeserializeOwned> IdentityEnvelope<T> {
    /// Verify the envelope and return its payload
    pub fn verify(&self, trust_root: &TrustRoot) -> Result<T> {
        self.verify_with_signer(trust_root).map(|(payload, _)| payload)
    }

    /// Verify an operator artifact: the signer must be the `role` authority
    pub fn verify_as(&self, trust_root: &TrustRoot, role: CertificateRole) -> Result<T> {
        self.verify_authority_signature(trust_root, role)?;
        self.extract_unverified()
    }

    /// Verify the envelope and return its payload together with the signer
    pub fn verify_with_signer(&self, trust_root: &TrustRoot) -> Result<(T, PrincipalIdentity)> {
        let signer = self.verify_signature(trust_root)?;
        Ok((self.extract_unverified()?, signer))
    }

    /// Deserialize the payload
    ///
    /// Note: This does NOT verify the signature. Use `verify` for that.
    pub fn extract_unverified(&self) -> Result<T> {
        serde_json::from_slice(self.payload_bytes()?).map_err(NetmapError::from)
    }
}

/// Ed25519 key pair for signing envelopes and certificates
#[derive(Clone)]
pub struct KeyPair {
    /// Key identifier
    kid: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        Self::from_signing_key(kid, SigningKey::generate(&mut OsRng))
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Load a key pair from a PKCS#8 PEM document
    pub fn from_pkcs8_pem(kid: impl Into<String>, pem: &str) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| NetmapError::CryptoError(format!("Invalid PKCS#8 key: {}", e)))?;
        Ok(Self::from_signing_key(kid, signing_key))
    }

    /// Encode the private key as a PKCS#8 PEM document
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| NetmapError::CryptoError(format!("PKCS#8 encoding failed: {}", e)))
    }

    /// The same key in the form the certificate builder consumes
    pub fn to_rcgen(&self) -> Result<rcgen::KeyPair> {
        let pem = self.to_pkcs8_pem()?;
        rcgen::KeyPair::from_pem(&pem).map_err(NetmapError::from)
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw verifying key bytes
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign arbitrary data and wrap in COSE_Sign1
    fn sign_cose(&self, payload: &[u8], cert_path: Vec<Vec<u8>>) -> Result<CoseSign1> {
        let chain = Value::Array(cert_path.into_iter().map(Value::Bytes).collect());

        // Build protected header with algorithm, key ID and certificate path
        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .value(X5CHAIN_LABEL, chain)
            .build();

        let builder = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload.to_vec());

        let signed_builder = builder.try_create_signature(&[], |data| {
            let signature = self.signing_key.sign(data);
            Ok::<_, NetmapError>(signature.to_bytes().to_vec())
        })?;

        Ok(signed_builder.build())
    }
}

/// Ed25519 public key for verification
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &SecureHash::of(&self.to_bytes()).to_string())
            .finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            NetmapError::UntrustedSignature(format!(
                "Unsupported public key: expected 32-byte Ed25519 key, got {} bytes",
                bytes.len()
            ))
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes)?;
        Ok(Self { verifying_key })
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a COSE_Sign1 structure
    fn verify_cose(&self, cose: &CoseSign1) -> Result<()> {
        // Reconstruct the signature input (Sig_structure)
        let sig_structure = cose.tbs_data(&[]);

        let signature_bytes: [u8; 64] = cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| NetmapError::UntrustedSignature("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| NetmapError::UntrustedSignature(e.to_string()))
    }
}
