//! Key material for the network map service

pub mod hierarchy;

pub use hierarchy::{HierarchyError, TrustAnchorHierarchy};
