//! Intel modules: sync logic for data derived from what is already in the graph.

pub mod permission_relationships;
