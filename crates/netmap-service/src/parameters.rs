//! Versioned network parameters
//!
//! Every change produces a new signed parameters value. The current version
//! and a bounded number of predecessors stay resolvable by content hash so
//! that participants still holding an older snapshot can fetch what it names.
//!
//! Versions named by a published snapshot are pinned by the publisher and are
//! never dropped from the history while pinned.

use chrono::Utc;
use netmap_core::{NetworkParameters, SecureHash, SignedNetworkParameters};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::keys::TrustAnchorHierarchy;
use crate::notaries::NotaryLoader;
use crate::storage::NetworkStore;

/// One signed parameters version
#[derive(Debug)]
pub struct PublishedParameters {
    /// Content hash, the "parameters version"
    pub hash: SecureHash,
    pub parameters: NetworkParameters,
    /// Serialized envelope served to clients
    pub raw_bytes: Vec<u8>,
}

impl PublishedParameters {
    fn sign(hierarchy: &TrustAnchorHierarchy, parameters: NetworkParameters) -> ServiceResult<Self> {
        let envelope: SignedNetworkParameters = hierarchy
            .sign_with_authority(&parameters)
            .map_err(|e| ServiceError::Internal(format!("Failed to sign parameters: {}", e)))?;
        Ok(Self {
            hash: envelope.content_hash()?,
            raw_bytes: envelope.to_bytes()?,
            parameters,
        })
    }
}

#[derive(Debug)]
struct Versions {
    current: Arc<PublishedParameters>,
    /// Older versions, newest first
    retained: VecDeque<Arc<PublishedParameters>>,
    /// One entry per outstanding pin; a hash may appear more than once
    pinned: Vec<SecureHash>,
}

impl Versions {
    /// Keep at most `history - 1` unpinned older versions
    fn trim(&mut self, history: usize) {
        loop {
            let unpinned = self
                .retained
                .iter()
                .filter(|v| !self.pinned.contains(&v.hash))
                .count();
            if unpinned < history {
                return;
            }
            let Some(oldest) = self
                .retained
                .iter()
                .rposition(|v| !self.pinned.contains(&v.hash))
            else {
                return;
            };
            if let Some(dropped) = self.retained.remove(oldest) {
                warn!(hash = %dropped.hash, "Network parameters version no longer resolvable");
            }
        }
    }
}

/// Holds the current parameters and their recent history
#[derive(Debug)]
pub struct ParametersVersioner {
    hierarchy: Arc<TrustAnchorHierarchy>,
    store: Arc<dyn NetworkStore>,
    versions: RwLock<Versions>,
    /// Serializes bumps so no change is lost
    bump_lock: Mutex<()>,
    history: usize,
}

impl ParametersVersioner {
    /// Restore the latest persisted parameters, or create initial ones
    ///
    /// Initial parameters carry the default limits and the notaries reported
    /// by `notaries`. Restored parameters are re-signed under the current
    /// network map authority.
    pub async fn initialize(
        hierarchy: Arc<TrustAnchorHierarchy>,
        store: Arc<dyn NetworkStore>,
        notaries: &dyn NotaryLoader,
        history: usize,
    ) -> ServiceResult<Self> {
        let parameters = match store.latest_parameters().await? {
            Some(payload) => {
                let parameters = NetworkParameters::from_bytes(&payload)?;
                info!(epoch = parameters.epoch, "Restored persisted network parameters");
                parameters
            }
            None => {
                let notaries = notaries
                    .load()
                    .map_err(|e| ServiceError::Internal(format!("Failed to load notaries: {}", e)))?;
                let parameters = NetworkParameters::initial(notaries);
                store.save_parameters(&parameters.to_bytes()?).await?;
                info!(
                    epoch = parameters.epoch,
                    notaries = parameters.notaries.len(),
                    "Created initial network parameters"
                );
                parameters
            }
        };

        let current = Arc::new(PublishedParameters::sign(&hierarchy, parameters)?);
        info!(hash = %current.hash, "Network parameters in force");

        Ok(Self {
            hierarchy,
            store,
            versions: RwLock::new(Versions {
                current,
                retained: VecDeque::new(),
                pinned: Vec::new(),
            }),
            bump_lock: Mutex::new(()),
            history: history.max(2),
        })
    }

    /// The parameters in force
    pub fn current(&self) -> Arc<PublishedParameters> {
        self.versions.read().current.clone()
    }

    /// The parameters in force, kept resolvable until `release`d
    pub fn pin_current(&self) -> Arc<PublishedParameters> {
        let mut versions = self.versions.write();
        let current = versions.current.clone();
        versions.pinned.push(current.hash);
        current
    }

    /// Drop one pin on `hash`
    pub fn release(&self, hash: &SecureHash) {
        let mut versions = self.versions.write();
        if let Some(index) = versions.pinned.iter().position(|pinned| pinned == hash) {
            versions.pinned.swap_remove(index);
        }
        versions.trim(self.history);
    }

    /// Resolve the current or a retained version by content hash
    pub fn get(&self, hash: &SecureHash) -> Option<Arc<PublishedParameters>> {
        let versions = self.versions.read();
        std::iter::once(&versions.current)
            .chain(versions.retained.iter())
            .find(|v| v.hash == *hash)
            .cloned()
    }

    /// Apply `mutator` to the current parameters and publish the result
    pub async fn bump<F>(&self, mutator: F) -> ServiceResult<Arc<PublishedParameters>>
    where
        F: FnOnce(&mut NetworkParameters),
    {
        let _guard = self.bump_lock.lock().await;

        let mut parameters = self.current().parameters.clone();
        mutator(&mut parameters);
        parameters.modified_time = Utc::now();

        let next = Arc::new(PublishedParameters::sign(&self.hierarchy, parameters)?);
        self.store.save_parameters(&next.parameters.to_bytes()?).await?;

        let mut versions = self.versions.write();
        let previous = std::mem::replace(&mut versions.current, next.clone());
        versions.retained.push_front(previous);
        versions.trim(self.history);
        drop(versions);

        info!(
            hash = %next.hash,
            epoch = next.parameters.epoch,
            minimum_platform_version = next.parameters.minimum_platform_version,
            "Published new network parameters"
        );
        Ok(next)
    }
}
