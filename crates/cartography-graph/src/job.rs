//! Graph jobs: named, ordered lists of statements.
//!
//! Jobs are stored as JSON documents:
//!
//! ```json
//! {
//!   "name": "cleanup stale permission relationships",
//!   "statements": [
//!     {"query": "...", "iterative": true, "iterationsize": 100}
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use cartography_core::cleanupbuilder::{build_cleanup_queries, get_parameters};
use cartography_core::model::NodeSchema;

use crate::client::{GraphSession, Params};
use crate::statement::GraphStatement;

/// Batch size of statements generated from a node schema.
const SCHEMA_CLEANUP_ITERATION_SIZE: u64 = 100;

/// A sequence of statements run in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphJob {
    pub name: String,
    pub statements: Vec<GraphStatement>,
    #[serde(skip)]
    pub short_name: Option<String>,
}

impl GraphJob {
    pub fn new(name: impl Into<String>, statements: Vec<GraphStatement>, short_name: Option<String>) -> Self {
        let mut job = Self {
            name: name.into(),
            statements,
            short_name,
        };
        job.tag_statements();
        job
    }

    /// Parse a job from its JSON form.
    pub fn from_json(blob: &str, short_name: Option<String>) -> Result<Self> {
        let job: GraphJob = serde_json::from_str(blob).context("Invalid graph job JSON")?;
        Ok(Self::new(job.name, job.statements, short_name))
    }

    /// Load a job file. The short name is taken from the file stem.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let blob = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        Self::from_json(&blob, Some(get_job_shortname(path)))
            .with_context(|| format!("Failed to load job file {}", path.display()))
    }

    /// Build the cleanup job for a node schema.
    ///
    /// `parameters` must provide every parameter the generated queries use,
    /// apart from `LIMIT_SIZE`.
    pub fn from_node_schema(schema: &NodeSchema, parameters: &Params) -> Result<Self> {
        let queries = build_cleanup_queries(schema)?;

        let mut expected = get_parameters(&queries);
        expected.remove("LIMIT_SIZE");
        let actual: BTreeSet<String> = parameters.keys().cloned().collect();
        let missing: Vec<&String> = expected.difference(&actual).collect();
        if !missing.is_empty() {
            bail!(
                "Cleanup job for '{}' is missing parameters {:?}; expected {:?}",
                schema.label(),
                missing,
                expected
            );
        }

        let statements = queries
            .into_iter()
            .map(|query| {
                GraphStatement::new(query, parameters.clone(), true, SCHEMA_CLEANUP_ITERATION_SIZE)
            })
            .collect();

        Ok(Self::new(
            format!("Cleanup {}", schema.label()),
            statements,
            Some(format!("{}_cleanup", schema.label())),
        ))
    }

    /// Merge parameters into every statement.
    pub fn merge_parameters(&mut self, parameters: &Params) {
        for statement in &mut self.statements {
            statement.merge_parameters(parameters);
        }
    }

    /// Run every statement in order, stopping at the first failure.
    pub async fn run<S: GraphSession + ?Sized>(&self, session: &S) -> Result<()> {
        debug!(job = %self.name, "Starting job");
        for (index, statement) in self.statements.iter().enumerate() {
            if let Err(e) = statement.run(session).await {
                error!(
                    job = %self.name,
                    statement = index + 1,
                    error = %e,
                    "Unhandled error while executing statement in job"
                );
                return Err(e).with_context(|| {
                    format!("Job '{}' failed at statement {}", self.name, index + 1)
                });
            }
        }
        info!(job = self.display_name(), "Finished job");
        Ok(())
    }

    /// Parse a job from JSON, merge `parameters` and run it.
    pub async fn run_from_json<S: GraphSession + ?Sized>(
        session: &S,
        blob: &str,
        parameters: &Params,
        short_name: Option<String>,
    ) -> Result<()> {
        let mut job = Self::from_json(blob, short_name)?;
        job.merge_parameters(parameters);
        job.run(session).await
    }

    /// Load a job file, merge `parameters` and run it.
    pub async fn run_from_json_file<S: GraphSession + ?Sized>(
        path: &Path,
        session: &S,
        parameters: &Params,
    ) -> Result<()> {
        let mut job = Self::from_json_file(path)?;
        job.merge_parameters(parameters);
        job.run(session).await
    }

    pub fn display_name(&self) -> &str {
        self.short_name.as_deref().unwrap_or(&self.name)
    }

    fn tag_statements(&mut self) {
        for (index, statement) in self.statements.iter_mut().enumerate() {
            statement.parent_job_name = Some(self.name.clone());
            statement.parent_job_sequence_num = Some(index + 1);
        }
    }
}

/// Job file name without directory or extension.
pub fn get_job_shortname(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Run a cleanup job file.
pub async fn run_cleanup_job<S: GraphSession + ?Sized>(
    path: &Path,
    session: &S,
    parameters: &Params,
) -> Result<()> {
    info!(job = %get_job_shortname(path), "Running cleanup job");
    GraphJob::run_from_json_file(path, session, parameters).await
}

/// Run an analysis job file.
pub async fn run_analysis_job<S: GraphSession + ?Sized>(
    path: &Path,
    session: &S,
    parameters: &Params,
) -> Result<()> {
    info!(job = %get_job_shortname(path), "Running analysis job");
    GraphJob::run_from_json_file(path, session, parameters).await
}

/// Run every `*.json` job in `directory`, in file name order.
pub async fn run_analysis_jobs<S: GraphSession + ?Sized>(
    directory: &Path,
    session: &S,
    parameters: &Params,
) -> Result<usize> {
    let jobs = list_job_files(directory)?;
    for path in &jobs {
        run_analysis_job(path, session, parameters).await?;
    }
    Ok(jobs.len())
}

/// Run an analysis job only if all of its dependencies were synced.
///
/// Returns whether the job ran.
pub async fn run_analysis_and_ensure_deps<S, D, R>(
    path: &Path,
    resource_dependencies: &[D],
    requested_syncs: &[R],
    session: &S,
    parameters: &Params,
) -> Result<bool>
where
    S: GraphSession + ?Sized,
    D: AsRef<str>,
    R: AsRef<str>,
{
    let requested: BTreeSet<&str> = requested_syncs.iter().map(AsRef::as_ref).collect();
    let missing: Vec<&str> = resource_dependencies
        .iter()
        .map(AsRef::as_ref)
        .filter(|dep| !requested.contains(dep))
        .collect();

    if !missing.is_empty() {
        info!(
            job = %get_job_shortname(path),
            missing = ?missing,
            "Not running analysis job: its dependencies were not all synced"
        );
        return Ok(false);
    }

    run_analysis_job(path, session, parameters).await?;
    Ok(true)
}

/// Parameters shared by every job of a sync run.
pub fn common_job_parameters(update_tag: i64) -> Params {
    let mut params = Params::new();
    params.insert("UPDATE_TAG".to_string(), Value::from(update_tag));
    params
}

fn list_job_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory)
        .with_context(|| format!("Failed to read job directory {}", directory.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
