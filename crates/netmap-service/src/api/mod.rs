//! HTTP API of the network map service

pub mod error;
pub mod handlers;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Liveness check
///
/// GET /ping
pub async fn ping() -> &'static str {
    "OK"
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping))
        // Network map
        .route("/network-map", get(handlers::network_map))
        .route("/network-map/publish", post(handlers::publish))
        .route("/network-map/node-info/{hash}", get(handlers::node_info))
        .route(
            "/network-map/network-parameters/{hash}",
            get(handlers::network_parameters),
        )
        // Doorman
        .route("/certificate", post(handlers::submit_request))
        .route("/certificate/{id}", get(handlers::retrieve_certificate))
        .route("/truststore", get(handlers::truststore))
        // Operator
        .route(
            "/network-map/reset-persisted-nodes",
            get(handlers::reset_persisted_nodes),
        )
        .route("/network-map/map-stats", get(handlers::map_stats))
        .route("/network-map/bumpEpoch", get(handlers::bump_epoch))
        .route(
            "/network-map/bumpMPV",
            get(handlers::bump_minimum_platform_version),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
