//! Cartography Core Library
//!
//! Graph model, query builders and the IAM permission evaluator shared by the
//! sync pipeline. Nothing in this crate talks to Neo4j.

pub mod cleanupbuilder;
pub mod config;
pub mod error;
pub mod model;
pub mod permission;
pub mod querybuilder;
pub mod util;

pub use config::{Config, Neo4jConfig};
pub use error::{CartographyError, CartographyResult};
pub use util::UpdateTag;
