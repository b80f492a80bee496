//! CLI command definitions and handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use cartography_core::Config;

pub mod evaluate;
pub mod run_job;
pub mod status;
pub mod sync;

/// Cartography - consolidate cloud assets and their relationships in Neo4j
#[derive(Parser)]
#[command(name = "cartography")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Neo4j bolt URI
    #[arg(long, global = true, env = "NEO4J_URI")]
    pub neo4j_uri: Option<String>,

    /// Neo4j user name
    #[arg(long, global = true, env = "NEO4J_USER")]
    pub neo4j_user: Option<String>,

    /// Name of the environment variable holding the Neo4j password
    #[arg(long, global = true, default_value = "NEO4J_PASSWORD")]
    pub neo4j_password_env_var: String,

    /// Neo4j database name
    #[arg(long, global = true, env = "NEO4J_DATABASE")]
    pub neo4j_database: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sync stages against Neo4j
    Sync(sync::SyncArgs),

    /// Run a single graph job file
    RunJob(run_job::RunJobArgs),

    /// Evaluate IAM policies offline from a JSON document
    Evaluate(evaluate::EvaluateArgs),

    /// Show graph status
    Status,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.load_config()?;

        match self.command {
            Commands::Sync(args) => sync::execute(args, config).await,
            Commands::RunJob(args) => run_job::execute(args, config).await,
            Commands::Evaluate(args) => evaluate::execute(args),
            Commands::Status => status::execute(config).await,
        }
    }

    /// Config file (or defaults) with the connection flags applied on top.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(uri) = &self.neo4j_uri {
            config.neo4j.uri = uri.clone();
        }
        if let Some(user) = &self.neo4j_user {
            config.neo4j.user = Some(user.clone());
        }
        if let Ok(password) = std::env::var(&self.neo4j_password_env_var) {
            config.neo4j.password = Some(password);
        }
        if let Some(database) = &self.neo4j_database {
            config.neo4j.database = database.clone();
        }

        debug!(
            uri = %config.neo4j.uri,
            database = %config.neo4j.database,
            authenticated = config.neo4j.user.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }
}
