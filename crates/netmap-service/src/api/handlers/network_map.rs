//! Network Map Handlers
//!
//! Participant publication and retrieval of the signed artifacts:
//! the snapshot, participant records and network parameters.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use netmap_core::SecureHash;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::state::AppState;

pub(crate) const OCTET_STREAM: &str = "application/octet-stream";

/// Random `max-age` so clients do not poll in lockstep
fn cache_control() -> String {
    format!("max-age={}", rand::thread_rng().gen_range(10..30))
}

pub(crate) fn parse_hash(text: &str) -> Result<SecureHash, ApiError> {
    Ok(SecureHash::parse(text)?)
}

/// Submit a signed participant envelope
///
/// POST /network-map/publish
///
/// Responds once a snapshot including the submission has been published.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    debug!(size = body.len(), "Processing participant publication");

    let hash = state.registry.submit(&body).await?;
    state.publisher.request_rebuild().await?;

    info!(hash = %hash, "Participant published");
    Ok("OK")
}

/// GET /network-map/node-info/{hash}
pub async fn node_info(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let hash = parse_hash(&hash)?;
    let record = state.registry.lookup(&hash).await?;

    debug!(hash = %hash, "Serving participant record");
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], record.raw_bytes.clone()))
}

/// GET /network-map
pub async fn network_map(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.publisher.current()?;
    Ok((
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (header::CACHE_CONTROL, cache_control()),
        ],
        snapshot.raw_bytes.clone(),
    ))
}

/// GET /network-map/network-parameters/{hash}
///
/// Serves the current parameters or any retained predecessor.
pub async fn network_parameters(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let hash = parse_hash(&hash)?;
    let parameters = state
        .versioner
        .get(&hash)
        .ok_or_else(|| ApiError::NotFound(format!("network parameters {}", hash)))?;

    info!(hash = %hash, "Serving network parameters");
    Ok((
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (header::CACHE_CONTROL, cache_control()),
        ],
        parameters.raw_bytes.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_control_range() {
        for _ in 0..100 {
            let value = cache_control();
            let age: u32 = value.strip_prefix("max-age=").unwrap().parse().unwrap();
            assert!((10..30).contains(&age));
        }
    }

    #[test]
    fn test_parse_hash_rejects_garbage() {
        assert!(matches!(parse_hash("zz"), Err(ApiError::MalformedInput(_))));
        let hash = SecureHash::of(b"x");
        assert_eq!(parse_hash(&hash.to_string()).unwrap(), hash);
    }
}
