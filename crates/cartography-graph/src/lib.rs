//! # Cartography Graph
//!
//! Neo4j side of Cartography: the connection client, graph jobs, batched
//! loaders and the sync stages that tie them together.

pub mod client;
pub mod intel;
pub mod job;
pub mod loader;
pub mod metadata;
pub mod schema;
pub mod statement;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{GraphClient, GraphCounts, GraphSession, Params, Record};
pub use job::{
    get_job_shortname, run_analysis_and_ensure_deps, run_analysis_job, run_analysis_jobs,
    run_cleanup_job, GraphJob,
};
pub use statement::GraphStatement;
pub use sync::{
    build_default_sync, build_sync, build_sync_from_config, run_with_config, Stage, SyncPipeline,
    STATUS_FAILURE, STATUS_SUCCESS,
};
