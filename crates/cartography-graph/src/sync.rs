//! Sync orchestration: an ordered list of named stages run against one graph.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use cartography_core::permission::{
    default_relationship_mappings, parse_permission_relationship_file, RelationshipMapping,
};
use cartography_core::{CartographyError, CartographyResult, Config, UpdateTag};

use crate::client::{GraphClient, GraphSession};
use crate::intel::permission_relationships;
use crate::job::{common_job_parameters, run_analysis_jobs};
use crate::schema::create_indexes;

/// Exit status of a successful run.
pub const STATUS_SUCCESS: i32 = 0;
/// Exit status of a failed run.
pub const STATUS_FAILURE: i32 = 1;

/// One step of a sync.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Run the stage. `config.update_tag` is always set.
    async fn run(&self, session: &dyn GraphSession, config: &Config) -> Result<()>;
}

/// Named stages, run in insertion order.
#[derive(Default)]
pub struct SyncPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl SyncPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. A stage with the same name is replaced in place.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) {
        match self.stages.iter().position(|s| s.name() == stage.name()) {
            Some(index) => self.stages[index] = stage,
            None => self.stages.push(stage),
        }
    }

    pub fn add_stages(&mut self, stages: impl IntoIterator<Item = Box<dyn Stage>>) {
        for stage in stages {
            self.add_stage(stage);
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn run(&self, session: &dyn GraphSession, config: &Config) -> Result<()> {
        let mut config = config.clone();
        let update_tag = config.resolve_update_tag();
        info!(update_tag = update_tag.value(), "Starting sync with update tag");

        for stage in &self.stages {
            info!(stage = stage.name(), "Starting sync stage");
            if let Err(e) = stage.run(session, &config).await {
                error!(stage = stage.name(), error = ?e, "Unhandled error during sync stage");
                return Err(e).with_context(|| format!("Sync stage '{}' failed", stage.name()));
            }
            info!(stage = stage.name(), "Finishing sync stage");
        }

        info!(update_tag = update_tag.value(), "Finishing sync with update tag");
        Ok(())
    }
}

/// Creates the indexes every other stage relies on.
pub struct CreateIndexesStage;

#[async_trait]
impl Stage for CreateIndexesStage {
    fn name(&self) -> &str {
        "create-indexes"
    }

    async fn run(&self, session: &dyn GraphSession, config: &Config) -> Result<()> {
        let labels: Vec<String> = load_relationship_mappings(config)?
            .into_iter()
            .map(|m| m.target_label)
            .collect();
        create_indexes(session, &labels, &[]).await?;
        Ok(())
    }
}

/// Derives principal to resource relationships from IAM policies.
pub struct PermissionRelationshipsStage;

#[async_trait]
impl Stage for PermissionRelationshipsStage {
    fn name(&self) -> &str {
        "permission-relationships"
    }

    async fn run(&self, session: &dyn GraphSession, config: &Config) -> Result<()> {
        let mappings = load_relationship_mappings(config)?;
        if mappings.is_empty() {
            info!("No permission relationship mappings configured, skipping");
            return Ok(());
        }

        let result = permission_relationships::sync_all_accounts(
            session,
            update_tag(config)?,
            &mappings,
            config.batch_size,
        )
        .await?;
        info!(
            mappings = result.mappings_evaluated,
            relationships = result.relationships_loaded,
            "Permission relationships synced"
        );
        Ok(())
    }
}

/// Runs every analysis job in the configured directory.
pub struct AnalysisStage;

#[async_trait]
impl Stage for AnalysisStage {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn run(&self, session: &dyn GraphSession, config: &Config) -> Result<()> {
        let Some(directory) = config.analysis_job_directory.as_deref() else {
            info!("No analysis job directory configured, skipping analysis");
            return Ok(());
        };

        let params = common_job_parameters(update_tag(config)?.value());
        let count = run_analysis_jobs(directory, session, &params).await?;
        info!(directory = %directory.display(), jobs = count, "Analysis jobs finished");
        Ok(())
    }
}

/// Names of the stages `build_sync` accepts, in default order.
pub const DEFAULT_STAGES: &[&str] = &["create-indexes", "permission-relationships", "analysis"];

fn stage_by_name(name: &str) -> Option<Box<dyn Stage>> {
    match name {
        "create-indexes" => Some(Box::new(CreateIndexesStage)),
        "permission-relationships" => Some(Box::new(PermissionRelationshipsStage)),
        "analysis" => Some(Box::new(AnalysisStage)),
        _ => None,
    }
}

/// Every built-in stage, in default order.
pub fn build_default_sync() -> SyncPipeline {
    let mut sync = SyncPipeline::new();
    sync.add_stages(DEFAULT_STAGES.iter().filter_map(|name| stage_by_name(name)));
    sync
}

/// Only the `selected` stages, in the order given.
pub fn build_sync<S: AsRef<str>>(selected: &[S]) -> CartographyResult<SyncPipeline> {
    let mut sync = SyncPipeline::new();
    for name in selected {
        let name = name.as_ref().trim();
        let stage = stage_by_name(name).ok_or_else(|| {
            CartographyError::config(format!(
                "unknown sync stage '{}'; valid stages: {}",
                name,
                DEFAULT_STAGES.join(", ")
            ))
        })?;
        sync.add_stage(stage);
    }
    Ok(sync)
}

/// The pipeline a config asks for.
pub fn build_sync_from_config(config: &Config) -> CartographyResult<SyncPipeline> {
    match &config.selected_modules {
        Some(selected) => build_sync(selected.as_slice()),
        None => Ok(build_default_sync()),
    }
}

/// Connect to Neo4j and run `sync`, returning a process status code.
pub async fn run_with_config(sync: &SyncPipeline, mut config: Config) -> i32 {
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return STATUS_FAILURE;
    }
    config.resolve_update_tag();

    let client = match GraphClient::connect(&config.neo4j).await {
        Ok(client) => client,
        Err(e) => {
            error!(uri = %config.neo4j.uri, error = ?e, "Unable to connect to Neo4j");
            return STATUS_FAILURE;
        }
    };

    match sync.run(&client, &config).await {
        Ok(()) => STATUS_SUCCESS,
        Err(e) => {
            error!(error = ?e, "Sync failed");
            STATUS_FAILURE
        }
    }
}

/// Mapping file from the config, or the built-in mappings.
pub fn load_relationship_mappings(config: &Config) -> CartographyResult<Vec<RelationshipMapping>> {
    match config.permission_relationships_file.as_deref() {
        Some(path) => parse_permission_relationship_file(path),
        None => default_relationship_mappings(),
    }
}

fn update_tag(config: &Config) -> Result<UpdateTag> {
    config.update_tag.context("Update tag was not resolved before running the stage")
}
