//! Service-level error taxonomy shared by the registry, CA and publisher

use netmap_core::{NetmapError, SecureHash};
use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by the service components
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Submitted material failed to decode or verify
    #[error("Rejected: {0}")]
    Rejected(#[from] NetmapError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// No snapshot has been published yet
    #[error("No network map has been published")]
    Unpublished,

    /// Different content submitted under an existing request id
    #[error("Conflicting request {0}")]
    Conflict(SecureHash),

    /// Pending-request store is full
    #[error("Pending request limit of {0} reached")]
    CapacityExceeded(usize),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    /// Failure of the service's own key material
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
