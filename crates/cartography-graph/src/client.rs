//! Neo4j connection client.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{BoltNull, BoltType, ConfigBuilder, Graph, Query};
use serde_json::{Map, Value};
use tracing::debug;

use cartography_core::Neo4jConfig;

/// Query parameters, keyed by name without the leading `$`.
pub type Params = Map<String, Value>;

/// One result row, holding only the requested columns.
pub type Record = Map<String, Value>;

/// Something Cypher can be run against.
///
/// Jobs, loaders and sync stages only depend on this trait, so they can be
/// exercised without a live database.
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// Run a query and discard its results.
    async fn run(&self, query: &str, params: &Params) -> Result<()>;

    /// Run a query and read `columns` from every returned row.
    ///
    /// Missing or unreadable columns come back as `null`.
    async fn fetch(&self, query: &str, params: &Params, columns: &[&str]) -> Result<Vec<Record>>;
}

/// Client for the Neo4j graph Cartography writes to.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Create a new GraphClient from config.
    ///
    /// neo4rs builds its pool lazily, so a `RETURN 1` ping runs right away to
    /// surface an unreachable database here rather than in the first stage.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.clone().unwrap_or_default())
            .password(config.password.clone().unwrap_or_default())
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()
            .context("Failed to build Neo4j config")?;

        let graph = Graph::connect(neo4j_config)
            .await
            .context("Failed to create Neo4j connection pool")?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .with_context(|| format!("Neo4j at {} is not responding to queries", config.uri))?;

        Ok(Self { graph })
    }

    /// Get node and relationship counts for status display.
    pub async fn get_counts(&self) -> Result<GraphCounts> {
        let rows = self
            .fetch(
                "MATCH (n) WITH count(n) AS nodes \
                 OPTIONAL MATCH ()-[r]->() RETURN nodes, count(r) AS relationships",
                &Params::new(),
                &["nodes", "relationships"],
            )
            .await?;

        let read = |field: &str| {
            rows.first()
                .and_then(|row| row.get(field))
                .and_then(Value::as_i64)
                .unwrap_or(0) as usize
        };

        Ok(GraphCounts {
            nodes: read("nodes"),
            relationships: read("relationships"),
        })
    }
}

#[async_trait]
impl GraphSession for GraphClient {
    async fn run(&self, query: &str, params: &Params) -> Result<()> {
        self.graph
            .run(build_query(query, params))
            .await
            .context("Neo4j query execution failed")?;
        Ok(())
    }

    async fn fetch(&self, query: &str, params: &Params, columns: &[&str]) -> Result<Vec<Record>> {
        let mut result = self
            .graph
            .execute(build_query(query, params))
            .await
            .context("Neo4j query failed")?;

        let mut records = Vec::new();
        while let Some(row) = result.next().await.context("Failed to read Neo4j result row")? {
            let mut record = Record::new();
            for column in columns {
                let value = match row.get::<Value>(column) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(column, error = ?e, "Column missing from row, reading as null");
                        Value::Null
                    }
                };
                record.insert(column.to_string(), value);
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Default)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

fn build_query(query: &str, params: &Params) -> Query {
    params
        .iter()
        .fold(Query::new(query.to_string()), |q, (key, value)| {
            q.param(key, to_bolt(value))
        })
}

/// Convert a JSON value into its Bolt equivalent.
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => BoltType::from(items.iter().map(to_bolt).collect::<Vec<BoltType>>()),
        Value::Object(map) => BoltType::from(
            map.iter()
                .map(|(k, v)| (k.clone(), to_bolt(v)))
                .collect::<HashMap<String, BoltType>>(),
        ),
    }
}
