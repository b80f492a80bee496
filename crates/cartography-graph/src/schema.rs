//! Neo4j index initialization.

use anyhow::Result;
use tracing::info;

use cartography_core::model::NodeSchema;
use cartography_core::querybuilder::{build_create_index_queries, create_index_query};

use crate::client::{GraphSession, Params};

/// Indexes on the nodes the sync stages always search.
const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS FOR (n:AWSAccount) ON (n.id);",
    "CREATE INDEX IF NOT EXISTS FOR (n:AWSPrincipal) ON (n.arn);",
    "CREATE INDEX IF NOT EXISTS FOR (n:AWSPolicy) ON (n.id);",
    "CREATE INDEX IF NOT EXISTS FOR (n:AWSPolicyStatement) ON (n.id);",
    "CREATE INDEX IF NOT EXISTS FOR (n:ModuleSyncMetadata) ON (n.id);",
];

/// Create the base indexes, one `arn` index per extra label and the indexes
/// each schema's queries need.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn create_indexes<S: GraphSession + ?Sized>(
    session: &S,
    arn_labels: &[String],
    schemas: &[NodeSchema],
) -> Result<usize> {
    info!("Creating indexes for cartography node types");

    let mut statements: Vec<String> = INDEX_STATEMENTS.iter().map(|s| s.to_string()).collect();
    statements.extend(arn_labels.iter().map(|label| create_index_query(label, "arn")));
    statements.extend(schemas.iter().flat_map(build_create_index_queries));

    let mut seen = Vec::with_capacity(statements.len());
    for statement in statements {
        if seen.contains(&statement) {
            continue;
        }
        session.run(&statement, &Params::new()).await?;
        seen.push(statement);
    }

    info!(count = seen.len(), "Indexes created");
    Ok(seen.len())
}
