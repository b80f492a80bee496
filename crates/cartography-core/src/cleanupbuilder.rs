//! Cleanup query generation.
//!
//! Stale data is anything attached to the current sub resource whose
//! `lastupdated` differs from the current run's `$UPDATE_TAG`. Queries delete
//! at most `$LIMIT_SIZE` items and return `TotalCompleted`, so they are run
//! iteratively until nothing is left to delete.
//!
//! Order matters: stale nodes go first, then stale relationships.

use std::collections::BTreeSet;

use crate::error::{CartographyError, CartographyResult};
use crate::model::{LinkDirection, NodeSchema, RelSchema};

/// Build every cleanup query for a node schema.
///
/// Returns, in order: the stale node query, the stale sub resource
/// relationship query, then one stale relationship query per other
/// relationship.
pub fn build_cleanup_queries(schema: &NodeSchema) -> CartographyResult<Vec<String>> {
    let mut queries = vec![
        build_cleanup_node_query(schema, None)?,
        build_cleanup_rel_query(schema, None)?,
    ];
    for rel in schema.other_relationships() {
        queries.push(build_cleanup_rel_query(schema, Some(rel))?);
    }
    Ok(queries)
}

/// Query deleting stale nodes attached to the sub resource.
///
/// With `selected_rel`, only nodes that also carry that relationship are
/// considered.
pub fn build_cleanup_node_query(
    schema: &NodeSchema,
    selected_rel: Option<&RelSchema>,
) -> CartographyResult<String> {
    let sub_rel = sub_resource_for_cleanup(schema)?;
    let mut query = format!(
        "MATCH (n:{}){}(:{}{{{}}})\n",
        schema.label(),
        rel_arrow(sub_rel, ""),
        sub_rel.target_node_label,
        sub_rel.target_node_matcher.to_cypher()
    );

    if let Some(rel) = selected_rel {
        ensure_present(schema, rel)?;
        query.push_str(&format!(
            "MATCH (n){}(:{})\n",
            rel_arrow(rel, ""),
            rel.target_node_label
        ));
    }

    query.push_str("WHERE n.lastupdated <> $UPDATE_TAG\n");
    query.push_str("WITH n LIMIT $LIMIT_SIZE\n");
    query.push_str("DETACH DELETE n\n");
    query.push_str("RETURN COUNT(*) AS TotalCompleted;\n");
    Ok(query)
}

/// Query deleting stale relationships.
///
/// Without `selected_rel` this targets the sub resource relationship itself;
/// otherwise it targets `selected_rel` on nodes owned by the sub resource.
pub fn build_cleanup_rel_query(
    schema: &NodeSchema,
    selected_rel: Option<&RelSchema>,
) -> CartographyResult<String> {
    let sub_rel = sub_resource_for_cleanup(schema)?;

    let mut query = match selected_rel {
        None => format!(
            "MATCH (:{}){}(:{}{{{}}})\n",
            schema.label(),
            rel_arrow(sub_rel, "r"),
            sub_rel.target_node_label,
            sub_rel.target_node_matcher.to_cypher()
        ),
        Some(rel) => {
            ensure_present(schema, rel)?;
            format!(
                "MATCH (src:{}){}(:{}{{{}}})\nMATCH (src){}(:{})\n",
                schema.label(),
                rel_arrow(sub_rel, ""),
                sub_rel.target_node_label,
                sub_rel.target_node_matcher.to_cypher(),
                rel_arrow(rel, "r"),
                rel.target_node_label
            )
        }
    };

    query.push_str("WHERE r.lastupdated <> $UPDATE_TAG\n");
    query.push_str("WITH r LIMIT $LIMIT_SIZE\n");
    query.push_str("DELETE r\n");
    query.push_str("RETURN COUNT(*) AS TotalCompleted;\n");
    Ok(query)
}

/// Every `$parameter` name used by the given queries.
pub fn get_parameters<S: AsRef<str>>(queries: &[S]) -> BTreeSet<String> {
    let mut params = BTreeSet::new();

    for query in queries {
        let mut chars = query.as_ref().chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '$' {
                continue;
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                let valid = next == '_'
                    || next.is_ascii_alphabetic()
                    || (!name.is_empty() && next.is_ascii_digit());
                if !valid {
                    break;
                }
                name.push(next);
                chars.next();
            }
            if !name.is_empty() {
                params.insert(name);
            }
        }
    }

    params
}

/// The sub resource relationship, checked for use in cleanup.
///
/// The sub resource id is injected by the job runner as a parameter, so every
/// key of its matcher must come from kwargs.
fn sub_resource_for_cleanup(schema: &NodeSchema) -> CartographyResult<&RelSchema> {
    let sub_rel = schema.sub_resource_relationship().ok_or_else(|| {
        CartographyError::schema(format!(
            "cannot build a cleanup job for '{}': it has no sub resource relationship",
            schema.label()
        ))
    })?;

    for (key, value) in sub_rel.target_node_matcher.iter() {
        if !value.set_in_kwargs {
            return Err(CartographyError::schema(format!(
                "sub resource matcher key '{}' on '{}' must be set from kwargs (property '{}')",
                key,
                schema.label(),
                value.name
            )));
        }
    }

    Ok(sub_rel)
}

fn ensure_present(schema: &NodeSchema, rel: &RelSchema) -> CartographyResult<()> {
    if schema.has_relationship(rel) {
        Ok(())
    } else {
        Err(CartographyError::schema(format!(
            "relationship '{}' is not defined on node '{}'",
            rel.rel_label,
            schema.label()
        )))
    }
}

fn rel_arrow(rel: &RelSchema, var: &str) -> String {
    match rel.direction {
        LinkDirection::Inward => format!("<-[{}:{}]-", var, rel.rel_label),
        LinkDirection::Outward => format!("-[{}:{}]->", var, rel.rel_label),
    }
}
