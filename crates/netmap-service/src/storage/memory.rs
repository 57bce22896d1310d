//! In-memory storage backend
//!
//! Default storage implementation using in-memory hashmaps.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use netmap_core::{PrincipalIdentity, SecureHash};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{NetworkStore, ParticipantRecord, StorageError, UpsertOutcome};

/// Both participant indexes, guarded together
#[derive(Debug, Default)]
struct Participants {
    by_hash: HashMap<SecureHash, Arc<ParticipantRecord>>,
    by_identity: HashMap<PrincipalIdentity, SecureHash>,
}

/// In-memory network store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    participants: RwLock<Participants>,
    parameters: RwLock<Option<Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkStore for MemoryStore {
    // =========================================================================
    // Participants
    // =========================================================================

    async fn upsert_participant(
        &self,
        record: ParticipantRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        let mut participants = self.participants.write();

        if participants.by_hash.contains_key(&record.content_hash) {
            return Ok(UpsertOutcome::Unchanged);
        }

        let hash = record.content_hash;
        let previous = participants
            .by_identity
            .insert(record.primary_identity.clone(), hash);
        if let Some(old) = previous {
            participants.by_hash.remove(&old);
        }
        info!(hash = %hash, identity = %record.primary_identity, "Stored participant");
        participants.by_hash.insert(hash, Arc::new(record));

        Ok(match previous {
            Some(old) => UpsertOutcome::Superseded(old),
            None => UpsertOutcome::Inserted,
        })
    }

    async fn get_participant(
        &self,
        hash: &SecureHash,
    ) -> Result<Option<Arc<ParticipantRecord>>, StorageError> {
        Ok(self.participants.read().by_hash.get(hash).cloned())
    }

    async fn participant_hashes(&self) -> Result<Vec<SecureHash>, StorageError> {
        let mut hashes: Vec<SecureHash> = self.participants.read().by_hash.keys().copied().collect();
        hashes.sort();
        Ok(hashes)
    }

    async fn participants(&self) -> Result<Vec<Arc<ParticipantRecord>>, StorageError> {
        let mut records: Vec<Arc<ParticipantRecord>> =
            self.participants.read().by_hash.values().cloned().collect();
        records.sort_by_key(|r| r.content_hash);
        Ok(records)
    }

    async fn purge_participants(&self) -> Result<u64, StorageError> {
        let mut participants = self.participants.write();
        let count = participants.by_hash.len() as u64;
        participants.by_hash.clear();
        participants.by_identity.clear();
        info!(count = count, "Purged participants");
        Ok(count)
    }

    // =========================================================================
    // Network Parameters
    // =========================================================================

    async fn save_parameters(&self, payload: &[u8]) -> Result<(), StorageError> {
        *self.parameters.write() = Some(payload.to_vec());
        Ok(())
    }

    async fn latest_parameters(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.parameters.read().clone())
    }
}
