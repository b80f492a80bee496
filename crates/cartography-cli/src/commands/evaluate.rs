//! `cartography evaluate`: permission evaluation without a database.
//!
//! Input document:
//!
//! ```json
//! {
//!   "principals": {
//!     "arn:aws:iam::123456789012:role/reader": {
//!       "policy-id": [{"effect": "Allow", "action": ["s3:Get*"], "resource": ["*"]}]
//!     }
//!   },
//!   "resource_arns": ["arn:aws:s3:::logs"],
//!   "permissions": ["s3:GetObject"]
//! }
//! ```

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use cartography_core::permission::{calculate_permission_relationships, PrincipalMapping, Principals};

use crate::output;

#[derive(Args)]
pub struct EvaluateArgs {
    /// JSON document with principals, resource_arns and permissions
    pub input: PathBuf,

    /// Print the mappings as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct EvaluationInput {
    principals: Principals,
    resource_arns: Vec<String>,
    permissions: Vec<String>,
}

pub fn execute(args: EvaluateArgs) -> Result<()> {
    let mappings = evaluate_file(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&mappings)?);
    } else {
        output::print_mappings(&mappings);
    }
    Ok(())
}

fn evaluate_file(path: &Path) -> Result<Vec<PrincipalMapping>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    evaluate_str(&text).with_context(|| format!("Failed to evaluate {}", path.display()))
}

fn evaluate_str(text: &str) -> Result<Vec<PrincipalMapping>> {
    let input: EvaluationInput = serde_json::from_str(text).context("Invalid evaluation input")?;
    if input.permissions.is_empty() {
        bail!("'permissions' must list at least one permission");
    }
    Ok(calculate_permission_relationships(
        &input.principals,
        &input.resource_arns,
        input.permissions.as_slice(),
    ))
}
