//! `cartography status`.

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;

use cartography_core::Config;
use cartography_graph::{GraphClient, GraphSession, Params};

use crate::output;

pub async fn execute(config: Config) -> Result<()> {
    println!("{} {}", "Neo4j:".bold(), config.neo4j.uri.cyan());

    let client = GraphClient::connect(&config.neo4j)
        .await
        .context("Failed to connect to Neo4j")?;

    let counts = client.get_counts().await?;
    output::print_counts(&counts);

    let rows = client
        .fetch(
            "MATCH (n:ModuleSyncMetadata) \
             RETURN n.grouptype AS grouptype, n.groupid AS groupid, \
                    n.syncedtype AS syncedtype, n.lastupdated AS lastupdated \
             ORDER BY grouptype, groupid, syncedtype",
            &Params::new(),
            &["grouptype", "groupid", "syncedtype", "lastupdated"],
        )
        .await?;

    println!();
    println!("{}", "Last syncs".bold());
    if rows.is_empty() {
        println!("  {}", "No sync metadata recorded yet.".dimmed());
    }
    for row in &rows {
        let text = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
        let lastupdated = row
            .get("lastupdated")
            .and_then(Value::as_i64)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} {} {}",
            text("grouptype").dimmed(),
            text("groupid"),
            text("syncedtype").cyan(),
            lastupdated.yellow()
        );
    }

    Ok(())
}
