//! Cypher generation for loading nodes and relationships.
//!
//! Generated ingestion queries expose `$DictList` (the batch of items) plus
//! every kwarg `PropertyRef` used by the schema, typically `$lastupdated` and
//! the sub resource id.

use crate::error::{CartographyError, CartographyResult};
use crate::model::{LinkDirection, NodeSchema, PropertyRef, RelSchema, TargetNodeMatcher};
use crate::util::validate_identifier;

/// Build the batched MERGE query for a node schema.
///
/// ```text
/// UNWIND $DictList AS item
///     MERGE (i:Label {id: item.Id})
///     ON CREATE SET i.firstseen = timestamp()
///     SET
///         i.lastupdated = $lastupdated,
///         ...
///     WITH i, item
///     CALL { ... one subquery per relationship ... }
/// ```
pub fn build_ingestion_query(schema: &NodeSchema) -> CartographyResult<String> {
    let id_ref = schema.id_ref().ok_or_else(|| {
        CartographyError::schema(format!("node schema '{}' has no id property", schema.label()))
    })?;

    let mut query = String::from("UNWIND $DictList AS item\n");
    query.push_str(&format!(
        "    MERGE (i:{} {{id: {}}})\n",
        schema.label(),
        id_ref
    ));
    query.push_str("    ON CREATE SET i.firstseen = timestamp()\n");

    let mut set_items: Vec<String> = schema
        .properties()
        .iter()
        .filter(|(name, _)| name != "id")
        .map(|(name, value)| format!("i.{} = {}", name, value))
        .collect();
    set_items.extend(schema.extra_labels().iter().map(|l| format!("i:{}", l)));
    query.push_str(&set_clause("    ", &set_items));

    for rel in schema.all_relationships() {
        query.push_str("    WITH i, item\n");
        query.push_str("    CALL {\n");
        query.push_str("        WITH i, item\n");
        query.push_str(&format!(
            "        OPTIONAL MATCH (j:{} {{{}}})\n",
            rel.target_node_label,
            rel.target_node_matcher.to_cypher()
        ));
        query.push_str("        WITH i, item, j WHERE j IS NOT NULL\n");
        query.push_str(&format!("        MERGE (i){}(j)\n", rel_pattern(rel, "r")));
        query.push_str("        ON CREATE SET r.firstseen = timestamp()\n");
        query.push_str(&set_clause("        ", &rel_set_items(&rel.properties)));
        query.push_str("    }\n");
    }

    Ok(query)
}

/// Build a query that links two existing node sets.
///
/// Each item of `$DictList` identifies one source node (via `source_matcher`)
/// and one target node (via the relationship's target matcher).
pub fn build_matchlink_query(
    source_label: &str,
    source_matcher: &TargetNodeMatcher,
    rel: &RelSchema,
) -> CartographyResult<String> {
    validate_identifier(source_label)?;
    validate_identifier(&rel.rel_label)?;
    validate_identifier(&rel.target_node_label)?;
    if source_matcher.is_empty() || rel.target_node_matcher.is_empty() {
        return Err(CartographyError::schema(format!(
            "matchlink '{}' needs matchers on both ends",
            rel.rel_label
        )));
    }

    let mut query = String::from("UNWIND $DictList AS item\n");
    query.push_str(&format!(
        "    MATCH (from:{} {{{}}})\n",
        source_label,
        source_matcher.to_cypher()
    ));
    query.push_str(&format!(
        "    MATCH (to:{} {{{}}})\n",
        rel.target_node_label,
        rel.target_node_matcher.to_cypher()
    ));
    let arrow = match rel.direction {
        LinkDirection::Outward => format!("-[r:{}]->", rel.rel_label),
        LinkDirection::Inward => format!("<-[r:{}]-", rel.rel_label),
    };
    query.push_str(&format!("    MERGE (from){}(to)\n", arrow));
    query.push_str("    ON CREATE SET r.firstseen = timestamp()\n");
    query.push_str(&set_clause("    ", &rel_set_items(&rel.properties)));
    Ok(query)
}

/// Index statements for the properties a schema's queries search on.
pub fn build_create_index_queries(schema: &NodeSchema) -> Vec<String> {
    let mut targets: Vec<(String, String)> = vec![
        (schema.label().to_string(), "id".to_string()),
        (schema.label().to_string(), "lastupdated".to_string()),
    ];
    for label in schema.extra_labels() {
        targets.push((label.clone(), "id".to_string()));
    }
    for rel in schema.all_relationships() {
        for (key, _) in rel.target_node_matcher.iter() {
            targets.push((rel.target_node_label.clone(), key.to_string()));
        }
    }

    let mut queries: Vec<String> = Vec::new();
    for (label, property) in targets {
        let query = create_index_query(&label, &property);
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

/// `CREATE INDEX` statement for one label/property pair.
pub fn create_index_query(label: &str, property: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS FOR (n:{}) ON (n.{});", label, property)
}

/// Relationship pattern from `i` to `j` honoring the link direction.
fn rel_pattern(rel: &RelSchema, var: &str) -> String {
    match rel.direction {
        LinkDirection::Inward => format!("<-[{}:{}]-", var, rel.rel_label),
        LinkDirection::Outward => format!("-[{}:{}]->", var, rel.rel_label),
    }
}

fn rel_set_items(properties: &[(String, PropertyRef)]) -> Vec<String> {
    properties
        .iter()
        .map(|(name, value)| format!("r.{} = {}", name, value))
        .collect()
}

fn set_clause(indent: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let body = items
        .iter()
        .map(|item| format!("{}    {}", indent, item))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{}SET\n{}\n", indent, body)
}

#[cfg(test)]
pub(crate) fn normalize_query(query: &str) -> String {
    query
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
