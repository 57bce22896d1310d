//! Operator Handlers
//!
//! Purging participants, map statistics and parameter bumps.

use axum::{extract::State, http::StatusCode, Json};
use netmap_core::PrincipalIdentity;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Summary of the published membership
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStats {
    /// Organisation of each participant
    pub node_names: Vec<String>,
    pub notary_names: Vec<String>,
}

fn describe_notary(identity: &PrincipalIdentity) -> String {
    format!(
        "organisationUnit={} organisation={} locality={} country={}",
        identity.organisation_unit().unwrap_or("null"),
        identity.organisation(),
        identity.locality(),
        identity.country()
    )
}

/// Remove every participant and republish
///
/// GET /network-map/reset-persisted-nodes
pub async fn reset_persisted_nodes(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, String), ApiError> {
    let count = state.registry.purge_all().await?;
    state.publisher.request_rebuild().await?;

    let message = format!("Deleted : {{{}}} rows.", count);
    info!("{}", message);
    Ok((StatusCode::ACCEPTED, message))
}

/// GET /network-map/map-stats
pub async fn map_stats(State(state): State<Arc<AppState>>) -> Result<Json<MapStats>, ApiError> {
    let notary_names = state
        .versioner
        .current()
        .parameters
        .notaries
        .iter()
        .map(|notary| describe_notary(&notary.identity))
        .collect();

    let node_names = state
        .registry
        .records()
        .await?
        .iter()
        .map(|record| record.primary_identity.organisation().to_string())
        .collect();

    Ok(Json(MapStats {
        node_names,
        notary_names,
    }))
}

/// Reload the notaries and advance the epoch
///
/// GET /network-map/bumpEpoch
pub async fn bump_epoch(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let notaries = state
        .notaries
        .load()
        .map_err(|e| ApiError::Internal(format!("Failed to load notaries: {}", e)))?;

    let bumped = state
        .versioner
        .bump(move |parameters| {
            parameters.notaries = notaries;
            parameters.epoch += 1;
        })
        .await?;
    state.publisher.request_rebuild().await?;

    info!(epoch = bumped.parameters.epoch, hash = %bumped.hash, "Bumped epoch");
    Ok(StatusCode::OK)
}

/// Raise the minimum platform version by one
///
/// GET /network-map/bumpMPV
pub async fn bump_minimum_platform_version(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let bumped = state
        .versioner
        .bump(|parameters| parameters.minimum_platform_version += 1)
        .await?;
    state.publisher.request_rebuild().await?;

    info!(
        minimum_platform_version = bumped.parameters.minimum_platform_version,
        hash = %bumped.hash,
        "Bumped minimum platform version"
    );
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notary_description() {
        let plain = PrincipalIdentity::parse("O=Notary,L=Zurich,C=CH").unwrap();
        assert_eq!(
            describe_notary(&plain),
            "organisationUnit=null organisation=Notary locality=Zurich country=CH"
        );

        let with_unit = PrincipalIdentity::parse("OU=Ops,O=Notary,L=Zurich,C=CH").unwrap();
        assert!(describe_notary(&with_unit).starts_with("organisationUnit=Ops "));
    }

    #[test]
    fn test_stats_use_camel_case() {
        let stats = MapStats {
            node_names: vec!["Alice".into()],
            notary_names: vec![],
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["nodeNames"][0], "Alice");
        assert!(json["notaryNames"].as_array().unwrap().is_empty());
    }
}
