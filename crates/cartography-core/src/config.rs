//! Sync run configuration.
//!
//! Loaded from an optional TOML file; the CLI layers flags and environment
//! variables on top.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CartographyError, CartographyResult};
use crate::util::{UpdateTag, DEFAULT_BATCH_SIZE};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub max_connections: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: None,
            password: None,
            database: "neo4j".to_string(),
            max_connections: 8,
        }
    }
}

/// Configuration for a Cartography sync run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub neo4j: Neo4jConfig,
    /// Fixed update tag. A fresh one is generated per run when unset.
    pub update_tag: Option<UpdateTag>,
    /// YAML file describing which permissions produce which relationships.
    pub permission_relationships_file: Option<PathBuf>,
    /// Directory of JSON analysis jobs run by the `analysis` stage.
    pub analysis_job_directory: Option<PathBuf>,
    /// Stage names to run. All default stages run when unset.
    pub selected_modules: Option<Vec<String>>,
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            neo4j: Neo4jConfig::default(),
            update_tag: None,
            permission_relationships_file: None,
            analysis_job_directory: None,
            selected_modules: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> CartographyResult<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> CartographyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CartographyError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a comma separated stage list, e.g. `create-indexes,analysis`.
    pub fn parse_selected_modules(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve the update tag for this run, generating one if unset.
    pub fn resolve_update_tag(&mut self) -> UpdateTag {
        *self.update_tag.get_or_insert_with(UpdateTag::now)
    }

    pub fn validate(&self) -> CartographyResult<()> {
        if self.neo4j.uri.trim().is_empty() {
            return Err(CartographyError::config("neo4j.uri must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(CartographyError::config("batch_size must be greater than zero"));
        }
        if self.neo4j.user.is_some() != self.neo4j.password.is_some() {
            return Err(CartographyError::config(
                "neo4j.user and neo4j.password must be set together",
            ));
        }
        Ok(())
    }
}
