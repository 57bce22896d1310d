//! Application state shared by every request handler

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::NetworkMapConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::keys::{HierarchyError, TrustAnchorHierarchy};
use crate::notaries::{DirectoryNotaryLoader, NotaryLoader, StaticNotaryLoader};
use crate::parameters::ParametersVersioner;
use crate::pending::PendingRequestStore;
use crate::publisher::SnapshotPublisher;
use crate::registry::ParticipantRegistry;
use crate::storage::{MemoryStore, NetworkStore, StorageError};

/// Errors building the service at startup
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Trust anchors unavailable: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Unsupported database URL '{0}'")]
    UnsupportedDatabase(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Everything the HTTP layer operates on
#[derive(Debug)]
pub struct AppState {
    pub config: NetworkMapConfig,
    pub hierarchy: Arc<TrustAnchorHierarchy>,
    pub registry: ParticipantRegistry,
    pub versioner: Arc<ParametersVersioner>,
    pub publisher: Arc<SnapshotPublisher>,
    pub pending: PendingRequestStore,
    pub notaries: Arc<dyn NotaryLoader>,
}

impl AppState {
    /// Build the state described by `config`
    ///
    /// Trust anchors come from the key directory when one is configured,
    /// otherwise they are generated for this process only. Notary node-info
    /// files must verify against the root when the anchors are persistent.
    pub async fn from_config(config: NetworkMapConfig) -> Result<Self, StartupError> {
        let hierarchy = match &config.keys_dir {
            Some(dir) => TrustAnchorHierarchy::load_or_generate(dir, config.cert_validity_days)?,
            None => {
                info!("No key directory configured, trust anchors are ephemeral");
                TrustAnchorHierarchy::generate(config.cert_validity_days)
                    .map_err(HierarchyError::from)?
            }
        };

        let store = open_store(config.database_url.as_deref()).await?;

        let notaries: Arc<dyn NotaryLoader> = match &config.notaries_dir {
            Some(dir) => {
                let loader = DirectoryNotaryLoader::new(dir);
                match config.keys_dir {
                    Some(_) => Arc::new(loader.with_trust_root(hierarchy.trust_root().clone())),
                    None => Arc::new(loader),
                }
            }
            None => Arc::new(StaticNotaryLoader::default()),
        };

        Ok(Self::new(config, Arc::new(hierarchy), store, notaries).await?)
    }

    /// Assemble the state and publish the first snapshot
    pub async fn new(
        config: NetworkMapConfig,
        hierarchy: Arc<TrustAnchorHierarchy>,
        store: Arc<dyn NetworkStore>,
        notaries: Arc<dyn NotaryLoader>,
    ) -> ServiceResult<Self> {
        let registry = ParticipantRegistry::new(store.clone(), hierarchy.trust_root().clone());
        let versioner = Arc::new(
            ParametersVersioner::initialize(
                hierarchy.clone(),
                store,
                notaries.as_ref(),
                config.parameters_history,
            )
            .await?,
        );
        let publisher = Arc::new(SnapshotPublisher::new(
            registry.clone(),
            versioner.clone(),
            hierarchy.clone(),
        ));
        let pending = PendingRequestStore::new(hierarchy.clone(), config.max_pending_requests);

        publisher.rebuild().await?;

        Ok(Self {
            config,
            hierarchy,
            registry,
            versioner,
            publisher,
            pending,
            notaries,
        })
    }
}

/// Open the store named by `database_url`; in memory when unset
pub async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn NetworkStore>, StartupError> {
    match database_url {
        None => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        Some(url) if url.starts_with("sqlite:") => {
            Ok(Arc::new(crate::storage::SqliteStore::new(url).await?))
        }
        Some(url) => Err(StartupError::UnsupportedDatabase(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_publishes_initial_snapshot() {
        let state = AppState::from_config(NetworkMapConfig::default()).await.unwrap();

        let snapshot = state.publisher.current().unwrap();
        assert!(snapshot.map.participant_hashes.is_empty());
        assert_eq!(snapshot.map.parameters_hash, state.versioner.current().hash);
    }

    #[tokio::test]
    async fn test_keys_dir_is_reused_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetworkMapConfig {
            keys_dir: Some(dir.path().to_path_buf()),
            ..NetworkMapConfig::default()
        };

        let first = AppState::from_config(config.clone()).await.unwrap();
        let second = AppState::from_config(config).await.unwrap();

        assert_eq!(
            first.hierarchy.truststore_pem(),
            second.hierarchy.truststore_pem()
        );
    }

    #[tokio::test]
    async fn test_unknown_database_scheme_rejected() {
        let err = open_store(Some("postgres://localhost/netmap")).await.unwrap_err();
        assert!(matches!(err, StartupError::UnsupportedDatabase(_)));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_store_selected_by_url() {
        let config = NetworkMapConfig {
            database_url: Some("sqlite::memory:".into()),
            ..NetworkMapConfig::default()
        };
        let state = AppState::from_config(config).await.unwrap();
        assert!(state.publisher.current().is_ok());
    }
}
