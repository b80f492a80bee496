//! Permission relationship mapping file.
//!
//! A YAML list of entries, each naming the node label to evaluate, the
//! permissions to look for and the relationship to draw:
//!
//! ```yaml
//! - target_label: S3Bucket
//!   permissions: [S3:GetObject]
//!   relationship_name: CAN_READ
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CartographyError, CartographyResult};
use crate::util::validate_identifier;

const DEFAULT_MAPPINGS: &str = include_str!("../../data/permission_relationships.yaml");

/// One entry of the mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipMapping {
    pub permissions: Vec<String>,
    pub relationship_name: String,
    pub target_label: String,
}

/// Entry as written in the file, before validation.
#[derive(Debug, Deserialize)]
struct RawMapping {
    permissions: Option<Vec<String>>,
    relationship_name: Option<String>,
    target_label: Option<String>,
}

impl RawMapping {
    fn validate(self, index: usize) -> CartographyResult<RelationshipMapping> {
        let (permissions, relationship_name, target_label) =
            match (self.permissions, self.relationship_name, self.target_label) {
                (Some(p), Some(r), Some(t)) => (p, r, t),
                _ => {
                    return Err(CartographyError::InvalidRelationshipMapping(format!(
                        "entry {} is missing fields. Required fields: permissions, relationship_name, target_label",
                        index
                    )))
                }
            };

        if permissions.is_empty() {
            return Err(CartographyError::InvalidRelationshipMapping(format!(
                "entry {} ({}) lists no permissions",
                index, relationship_name
            )));
        }
        validate_identifier(&relationship_name)?;
        validate_identifier(&target_label)?;

        Ok(RelationshipMapping {
            permissions,
            relationship_name,
            target_label,
        })
    }
}

/// Parse mapping entries from YAML text.
pub fn parse_relationship_mappings(text: &str) -> CartographyResult<Vec<RelationshipMapping>> {
    let raw: Option<Vec<RawMapping>> = serde_yaml::from_str(text)?;
    raw.unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, m)| m.validate(i))
        .collect()
}

/// Load the mapping file at `path`.
///
/// Relative paths resolve against the current directory. A missing file is
/// logged and yields no mappings so the stage is skipped rather than failed.
pub fn parse_permission_relationship_file(path: &Path) -> CartographyResult<Vec<RelationshipMapping>> {
    let path: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                file = %path.display(),
                "Permission relationship mapping file not found, skipping ingestion"
            );
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    parse_relationship_mappings(&text)
}

/// Mappings shipped with Cartography, used when no file is configured.
pub fn default_relationship_mappings() -> CartographyResult<Vec<RelationshipMapping>> {
    parse_relationship_mappings(DEFAULT_MAPPINGS)
}
