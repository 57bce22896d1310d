//! Storage abstraction for the network map
//!
//! This module provides a trait-based abstraction over participant and
//! parameter persistence, with an in-memory backend (default) and a SQLite
//! backend selected by configuration.
//!
//! Both backends keep the two participant indexes (content hash and primary
//! identity) consistent: a reader never observes one updated without the other.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use netmap_core::{
    NetmapError, ParticipantDescriptor, PrincipalIdentity, SecureHash, SignedParticipant,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// A registered participant
///
/// Immutable once created; a re-submission by the same primary identity
/// replaces the whole record.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    /// SHA-256 of the envelope payload
    pub content_hash: SecureHash,
    /// Identity the record is indexed under
    pub primary_identity: PrincipalIdentity,
    /// The verified self-description
    pub descriptor: ParticipantDescriptor,
    /// The envelope as submitted
    pub envelope: SignedParticipant,
    /// The exact bytes served back to clients
    pub raw_bytes: Vec<u8>,
}

impl ParticipantRecord {
    /// Rebuild a record from bytes that were verified before being stored
    pub fn from_stored_bytes(raw_bytes: Vec<u8>) -> Result<Self, StorageError> {
        Self::decode(raw_bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn decode(raw_bytes: Vec<u8>) -> Result<Self, NetmapError> {
        let envelope = SignedParticipant::from_bytes(&raw_bytes)?;
        let descriptor = envelope.extract_unverified()?;
        Self::new(raw_bytes, envelope, descriptor)
    }

    pub fn new(
        raw_bytes: Vec<u8>,
        envelope: SignedParticipant,
        descriptor: ParticipantDescriptor,
    ) -> Result<Self, NetmapError> {
        Ok(Self {
            content_hash: envelope.content_hash()?,
            primary_identity: descriptor.primary_identity()?.clone(),
            descriptor,
            envelope,
            raw_bytes,
        })
    }
}

/// Outcome of storing a participant record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First record for this identity
    Inserted,
    /// The identical record was already stored
    Unchanged,
    /// Replaced the identity's previous record, whose hash no longer resolves
    Superseded(SecureHash),
}

/// Storage backend trait for network map state
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait NetworkStore: Send + Sync + Debug {
    // =========================================================================
    // Participants
    // =========================================================================

    /// Insert a record, replacing any record with the same primary identity
    async fn upsert_participant(&self, record: ParticipantRecord)
        -> Result<UpsertOutcome, StorageError>;

    /// Get a record by content hash
    async fn get_participant(
        &self,
        hash: &SecureHash,
    ) -> Result<Option<Arc<ParticipantRecord>>, StorageError>;

    /// Content hashes of all records, ascending
    async fn participant_hashes(&self) -> Result<Vec<SecureHash>, StorageError>;

    /// All records, ordered by content hash
    async fn participants(&self) -> Result<Vec<Arc<ParticipantRecord>>, StorageError>;

    /// Remove every record, returning how many were removed
    async fn purge_participants(&self) -> Result<u64, StorageError>;

    // =========================================================================
    // Network Parameters
    // =========================================================================

    /// Persist a serialized parameters payload as the latest version
    async fn save_parameters(&self, payload: &[u8]) -> Result<(), StorageError>;

    /// The most recently saved parameters payload
    async fn latest_parameters(&self) -> Result<Option<Vec<u8>>, StorageError>;
}
