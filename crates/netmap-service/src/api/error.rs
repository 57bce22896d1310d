//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use netmap_core::{NetmapError, SecureHash};
use serde::Serialize;
use thiserror::Error;

use crate::error::ServiceError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Untrusted signature: {0}")]
    UntrustedSignature(String),

    #[error("Expired certificate: {0}")]
    ExpiredCertificate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No network map has been published")]
    Unpublished,

    #[error("Conflicting request {0}")]
    Conflict(SecureHash),

    #[error("Capacity of {0} pending requests reached")]
    CapacityExceeded(usize),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::MalformedInput(_) => (StatusCode::BAD_REQUEST, "MALFORMED_INPUT"),
            ApiError::UntrustedSignature(_) => (StatusCode::BAD_REQUEST, "UNTRUSTED_SIGNATURE"),
            ApiError::ExpiredCertificate(_) => (StatusCode::BAD_REQUEST, "EXPIRED_CERTIFICATE"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Unpublished => (StatusCode::NOT_FOUND, "UNPUBLISHED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::CapacityExceeded(_) => (StatusCode::SERVICE_UNAVAILABLE, "CAPACITY_EXCEEDED"),
            ApiError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<NetmapError> for ApiError {
    fn from(err: NetmapError) -> Self {
        match err {
            NetmapError::MalformedPayload(msg)
            | NetmapError::InvalidPrincipal(msg)
            | NetmapError::SerializationError(msg) => ApiError::MalformedInput(msg),
            NetmapError::ExpiredCertificate(msg) => ApiError::ExpiredCertificate(msg),
            NetmapError::UntrustedSignature(msg)
            | NetmapError::CertificateError(msg)
            | NetmapError::CryptoError(msg) => ApiError::UntrustedSignature(msg),
            err @ NetmapError::NameConstraintViolation { .. } => {
                ApiError::UntrustedSignature(err.to_string())
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Rejected(err) => err.into(),
            ServiceError::NotFound(what) => ApiError::NotFound(what),
            ServiceError::Unpublished => ApiError::Unpublished,
            ServiceError::Conflict(id) => ApiError::Conflict(id),
            ServiceError::CapacityExceeded(limit) => ApiError::CapacityExceeded(limit),
            ServiceError::Storage(err) => ApiError::StorageUnavailable(err.to_string()),
            ServiceError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
