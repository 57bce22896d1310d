//! API request handlers

pub mod admin;
pub mod doorman;
pub mod network_map;

pub use admin::{
    bump_epoch, bump_minimum_platform_version, map_stats, reset_persisted_nodes, MapStats,
};
pub use doorman::{retrieve_certificate, submit_request, truststore};
pub use network_map::{network_map, network_parameters, node_info, publish};
