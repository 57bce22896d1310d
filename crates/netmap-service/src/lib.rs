//! Network Map Service
//!
//! Directory and certificate authority for a permissioned network:
//! - Registers participants' signed self-descriptions
//! - Publishes a signed snapshot of the membership and network parameters
//! - Issues name-constrained participant certificates (the doorman)
//!
//! ## API Endpoints
//!
//! ### Network map
//! - `GET /ping` - Liveness check
//! - `POST /network-map/publish` - Submit a signed participant envelope
//! - `GET /network-map` - Current signed snapshot
//! - `GET /network-map/node-info/{hash}` - Participant envelope by content hash
//! - `GET /network-map/network-parameters/{hash}` - Signed parameters by hash
//!
//! ### Doorman
//! - `POST /certificate` - Submit a certificate signing request
//! - `GET /certificate/{id}` - Collect the issued certificate chain
//! - `GET /truststore` - Network root certificate
//!
//! ### Operator
//! - `GET /network-map/reset-persisted-nodes` - Purge all participants
//! - `GET /network-map/map-stats` - Participant and notary names
//! - `GET /network-map/bumpEpoch` - Reload notaries and advance the epoch
//! - `GET /network-map/bumpMPV` - Raise the minimum platform version

pub mod api;
pub mod config;
pub mod error;
pub mod keys;
pub mod notaries;
pub mod parameters;
pub mod pending;
pub mod publisher;
pub mod registry;
pub mod state;
pub mod storage;

pub use api::create_router;
pub use config::{ConfigError, NetworkMapConfig};
pub use error::{ServiceError, ServiceResult};
pub use keys::TrustAnchorHierarchy;
pub use notaries::{DirectoryNotaryLoader, NotaryLoader, StaticNotaryLoader};
pub use parameters::{ParametersVersioner, PublishedParameters};
pub use pending::PendingRequestStore;
pub use publisher::{PublishedSnapshot, SnapshotPublisher};
pub use registry::ParticipantRegistry;
pub use state::{AppState, StartupError};
pub use storage::{MemoryStore, NetworkStore};
