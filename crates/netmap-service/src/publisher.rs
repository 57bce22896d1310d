//! Network map snapshot publication
//!
//! A snapshot names every registered participant and the parameters in force.
//! Rebuilds run one at a time and publish by swapping a single `Arc`, so a
//! reader sees either the old snapshot or the new one.
//!
//! ## Coalescing
//!
//! Each trigger takes a ticket before waiting for the rebuild lock. A rebuild
//! records the highest ticket issued before it read the registry; any trigger
//! holding a ticket at or below that value is already covered and returns
//! without rebuilding.
//!
//! Triggers run on their own task. A caller that stops waiting, such as a
//! request whose client disconnected, does not cancel the rebuild.
//!
//! The parameters version named by the published snapshot stays pinned in the
//! versioner until a newer snapshot replaces it.

use netmap_core::{NetworkMap, SecureHash, SignedNetworkMap};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{ServiceError, ServiceResult};
use crate::keys::TrustAnchorHierarchy;
use crate::parameters::ParametersVersioner;
use crate::registry::ParticipantRegistry;

/// A signed, published network map
#[derive(Debug)]
pub struct PublishedSnapshot {
    pub hash: SecureHash,
    pub map: NetworkMap,
    /// Serialized envelope served to clients
    pub raw_bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct SnapshotPublisher {
    registry: ParticipantRegistry,
    versioner: Arc<ParametersVersioner>,
    hierarchy: Arc<TrustAnchorHierarchy>,
    published: RwLock<Option<Arc<PublishedSnapshot>>>,
    rebuild_lock: Mutex<()>,
    requested: AtomicU64,
    completed: AtomicU64,
}

impl SnapshotPublisher {
    pub fn new(
        registry: ParticipantRegistry,
        versioner: Arc<ParametersVersioner>,
        hierarchy: Arc<TrustAnchorHierarchy>,
    ) -> Self {
        Self {
            registry,
            versioner,
            hierarchy,
            published: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// The last published snapshot
    pub fn current(&self) -> ServiceResult<Arc<PublishedSnapshot>> {
        self.published.read().clone().ok_or(ServiceError::Unpublished)
    }

    /// Build, sign and publish a snapshot of the current state
    pub async fn rebuild(&self) -> ServiceResult<Arc<PublishedSnapshot>> {
        let _guard = self.rebuild_lock.lock().await;
        self.rebuild_locked().await
    }

    /// Ensure a snapshot reflecting every write made before this call is published
    ///
    /// The rebuild is spawned immediately and completes even if the returned
    /// future is dropped. Storage failures are returned to the caller. A
    /// signing failure means the network map key is unusable; it is logged and
    /// the process aborts.
    pub fn request_rebuild(
        self: &Arc<Self>,
    ) -> impl Future<Output = ServiceResult<Arc<PublishedSnapshot>>> + Send + 'static {
        let publisher = self.clone();
        let task = tokio::spawn(async move { publisher.run_ticket().await });
        async move {
            task.await
                .map_err(|e| ServiceError::Internal(format!("Rebuild task failed: {}", e)))?
        }
    }

    async fn run_ticket(&self) -> ServiceResult<Arc<PublishedSnapshot>> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.rebuild_lock.lock().await;

        if self.completed.load(Ordering::SeqCst) >= ticket {
            debug!(ticket = ticket, "Rebuild already covered");
            return self.current();
        }

        match self.rebuild_locked().await {
            Err(ServiceError::Internal(reason)) => {
                error!(reason = %reason, "Failed to sign network map, aborting");
                std::process::abort();
            }
            result => result,
        }
    }

    /// Caller must hold `rebuild_lock`
    async fn rebuild_locked(&self) -> ServiceResult<Arc<PublishedSnapshot>> {
        // Every ticket issued so far belongs to a write that precedes the reads below
        let covered = self.requested.load(Ordering::SeqCst);

        let participant_hashes = self.registry.all_hashes().await?;
        let parameters = self.versioner.pin_current();
        let snapshot = match self.sign(participant_hashes, parameters.hash) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.versioner.release(&parameters.hash);
                return Err(e);
            }
        };

        let previous = self.published.write().replace(snapshot.clone());
        self.completed.store(covered, Ordering::SeqCst);
        if let Some(previous) = previous {
            self.versioner.release(&previous.map.parameters_hash);
        }

        info!(
            hash = %snapshot.hash,
            participants = snapshot.map.participant_hashes.len(),
            parameters = %snapshot.map.parameters_hash,
            "Published network map"
        );
        Ok(snapshot)
    }

    fn sign(
        &self,
        participant_hashes: Vec<SecureHash>,
        parameters_hash: SecureHash,
    ) -> ServiceResult<Arc<PublishedSnapshot>> {
        let map = NetworkMap {
            participant_hashes,
            parameters_hash,
        };
        let envelope: SignedNetworkMap = self
            .hierarchy
            .sign_with_authority(&map)
            .map_err(|e| ServiceError::Internal(format!("Failed to sign network map: {}", e)))?;
        Ok(Arc::new(PublishedSnapshot {
            hash: envelope.content_hash()?,
            raw_bytes: envelope.to_bytes()?,
            map,
        }))
    }
}
