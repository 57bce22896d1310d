//! Doorman Handlers
//!
//! Certificate signing requests, certificate retrieval and the trust root.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::handlers::network_map::parse_hash;
use crate::state::AppState;

const PEM: &str = "application/x-pem-file";

/// Submit a PKCS#10 request, PEM or DER
///
/// POST /certificate
///
/// Returns the request id used to collect the certificate.
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<String, ApiError> {
    let request_id = state.pending.submit(&body)?;
    Ok(request_id.to_string())
}

/// GET /certificate/{id}
///
/// Returns the issued chain (participant, doorman, root) as PEM.
pub async fn retrieve_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = parse_hash(&id)?;
    let bundle = state.pending.issue(&request_id).await?;

    info!(request_id = %request_id, "Serving certificate bundle");
    Ok(([(header::CONTENT_TYPE, PEM)], bundle.to_pem()))
}

/// GET /truststore
pub async fn truststore(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PEM)], state.hierarchy.truststore_pem())
}
