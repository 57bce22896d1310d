//! Wire types shared by the network map service and its participants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{NetmapError, Result};
use crate::identity::PrincipalIdentity;

/// SHA-256 digest used as a content address
///
/// Displayed and parsed as 64 upper-case hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecureHash([u8; 32]);

impl SecureHash {
    /// Hash arbitrary bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a hex string (either case)
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| NetmapError::MalformedPayload(format!("Invalid hash '{}': {}", text, e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            NetmapError::MalformedPayload(format!("Invalid hash '{}': expected 32 bytes", text))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({})", self)
    }
}

impl FromStr for SecureHash {
    type Err = NetmapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SecureHash {
    type Error = NetmapError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SecureHash> for String {
    fn from(hash: SecureHash) -> Self {
        hash.to_string()
    }
}

/// A reachable network endpoint of a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHostAndPort {
    pub host: String,
    pub port: u16,
}

impl NetworkHostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Self-description a participant publishes to the network map
///
/// A regular node carries one identity. A member of a clustered service
/// (e.g. a distributed notary) carries its own identity first and the shared
/// service identity second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDescriptor {
    /// Legal identities, primary first
    pub identities: Vec<PrincipalIdentity>,

    /// Addresses the participant can be reached on
    pub addresses: Vec<NetworkHostAndPort>,

    /// Platform version the participant runs
    pub platform_version: u32,

    /// Monotonic serial chosen by the participant, bumped on every change
    pub serial: u64,
}

impl ParticipantDescriptor {
    pub fn new(identity: PrincipalIdentity, addresses: Vec<NetworkHostAndPort>) -> Self {
        Self {
            identities: vec![identity],
            addresses,
            platform_version: 1,
            serial: 1,
        }
    }

    /// Add the shared identity of a clustered service
    pub fn with_service_identity(mut self, service: PrincipalIdentity) -> Self {
        self.identities.truncate(1);
        self.identities.push(service);
        self
    }

    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Check structural invariants: one or two identities
    pub fn validate(&self) -> Result<()> {
        match self.identities.len() {
            1 | 2 => Ok(()),
            n => Err(NetmapError::MalformedPayload(format!(
                "Participant must carry one or two identities, found {}",
                n
            ))),
        }
    }

    /// The participant's own identity, the key it is registered under
    pub fn primary_identity(&self) -> Result<&PrincipalIdentity> {
        self.identities
            .first()
            .ok_or_else(|| NetmapError::MalformedPayload("Participant has no identity".into()))
    }

    /// The identity a notary is known by
    ///
    /// Single-identity nodes are their own notary identity; cluster members
    /// use the shared service identity.
    pub fn notary_identity(&self) -> Result<&PrincipalIdentity> {
        self.validate()?;
        match self.identities.as_slice() {
            [single] => Ok(single),
            [_, service] => Ok(service),
            _ => unreachable!("validated above"),
        }
    }
}

/// A notary recorded in the network parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryInfo {
    pub identity: PrincipalIdentity,
    pub validating: bool,
}

/// Size limits every participant must honour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLimits {
    pub max_message_size: u32,
    pub max_payload_size: u32,
}

impl Default for ParticipantLimits {
    fn default() -> Self {
        Self {
            max_message_size: 10_485_760,
            max_payload_size: i32::MAX as u32,
        }
    }
}

/// Network-wide operating parameters
///
/// Immutable: every change produces a new value with a new content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub minimum_platform_version: u32,
    pub participant_limits: ParticipantLimits,
    pub notaries: Vec<NotaryInfo>,
    pub epoch: u64,
    pub modified_time: DateTime<Utc>,
    /// Contract name to the hashes of implementations allowed to run it
    #[serde(default)]
    pub whitelisted_implementations: BTreeMap<String, Vec<SecureHash>>,
}

impl NetworkParameters {
    /// Initial parameters for a fresh network
    pub fn initial(notaries: Vec<NotaryInfo>) -> Self {
        Self {
            minimum_platform_version: 1,
            participant_limits: ParticipantLimits::default(),
            notaries,
            epoch: 10,
            modified_time: Utc::now(),
            whitelisted_implementations: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(NetmapError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(NetmapError::from)
    }
}

/// Signed membership snapshot payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMap {
    /// Content hashes of every registered participant, ascending
    pub participant_hashes: Vec<SecureHash>,

    /// Content hash of the signed parameters in force
    pub parameters_hash: SecureHash,
}
