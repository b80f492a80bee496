//! Batched writes of node and relationship data.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use cartography_core::model::{NodeSchema, PropertyRef, RelSchema, TargetNodeMatcher};
use cartography_core::querybuilder::{build_ingestion_query, build_matchlink_query};
use cartography_core::util::batch;

use crate::client::{GraphSession, Params};

/// Write `items` as nodes of `schema`, `batch_size` items per query.
///
/// `kwargs` supplies the `$parameters` the schema refers to, usually
/// `lastupdated` and the sub resource id. Returns the number of items written.
pub async fn load<S: GraphSession + ?Sized>(
    session: &S,
    schema: &NodeSchema,
    items: &[Value],
    kwargs: &Params,
    batch_size: usize,
) -> Result<usize> {
    if items.is_empty() {
        debug!(label = schema.label(), "Nothing to load");
        return Ok(0);
    }

    let mut refs: Vec<&PropertyRef> = schema.properties().iter().map(|(_, r)| r).collect();
    for rel in schema.all_relationships() {
        refs.extend(rel_refs(rel));
    }
    ensure_kwargs(schema.label(), refs, kwargs)?;

    let query = build_ingestion_query(schema)?;
    let written = run_batches(session, &query, items, kwargs, batch_size)
        .await
        .with_context(|| format!("Failed to load {} nodes", schema.label()))?;

    info!(label = schema.label(), count = written, "Loaded nodes");
    Ok(written)
}

/// Link existing nodes: one relationship per item.
///
/// Each item identifies a `source_label` node through `source_matcher` and the
/// target node through the relationship's own matcher.
pub async fn load_matchlinks<S: GraphSession + ?Sized>(
    session: &S,
    source_label: &str,
    source_matcher: &TargetNodeMatcher,
    rel: &RelSchema,
    items: &[Value],
    kwargs: &Params,
    batch_size: usize,
) -> Result<usize> {
    if items.is_empty() {
        return Ok(0);
    }

    let refs = source_matcher.iter().map(|(_, r)| r).chain(rel_refs(rel));
    ensure_kwargs(&rel.rel_label, refs, kwargs)?;

    let query = build_matchlink_query(source_label, source_matcher, rel)?;
    let written = run_batches(session, &query, items, kwargs, batch_size)
        .await
        .with_context(|| {
            format!(
                "Failed to load {} relationships from {} to {}",
                rel.rel_label, source_label, rel.target_node_label
            )
        })?;

    info!(
        rel = %rel.rel_label,
        source = source_label,
        target = %rel.target_node_label,
        count = written,
        "Loaded relationships"
    );
    Ok(written)
}

async fn run_batches<S: GraphSession + ?Sized>(
    session: &S,
    query: &str,
    items: &[Value],
    kwargs: &Params,
    batch_size: usize,
) -> Result<usize> {
    let mut written = 0;
    for chunk in batch(items.iter().cloned(), batch_size) {
        let mut params = kwargs.clone();
        written += chunk.len();
        params.insert("DictList".to_string(), Value::Array(chunk));
        session.run(query, &params).await?;
    }
    Ok(written)
}

fn rel_refs(rel: &RelSchema) -> impl Iterator<Item = &PropertyRef> {
    rel.target_node_matcher
        .iter()
        .map(|(_, r)| r)
        .chain(rel.properties.iter().map(|(_, r)| r))
}

fn ensure_kwargs<'a>(
    what: &str,
    refs: impl IntoIterator<Item = &'a PropertyRef>,
    kwargs: &Params,
) -> Result<()> {
    let missing: BTreeSet<&str> = refs
        .into_iter()
        .filter(|r| r.set_in_kwargs && !kwargs.contains_key(&r.name))
        .map(|r| r.name.as_str())
        .collect();

    if !missing.is_empty() {
        bail!("Cannot load {}: missing query parameters {:?}", what, missing);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use cartography_core::model::LinkDirection;
    use serde_json::json;

    fn bucket_schema() -> NodeSchema {
        NodeSchema::builder("S3Bucket")
            .property("id", PropertyRef::new("Name"))
            .property("arn", PropertyRef::new("Arn"))
            .property("lastupdated", PropertyRef::kwarg("lastupdated"))
            .sub_resource(RelSchema::new(
                "RESOURCE",
                "AWSAccount",
                LinkDirection::Inward,
                TargetNodeMatcher::new().with("id", PropertyRef::kwarg("AWS_ID")),
            ))
            .build()
            .unwrap()
    }

    fn kwargs() -> Params {
        json!({"lastupdated": 1, "AWS_ID": "123456789012"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_batches_items() {
        let session = RecordingSession::new();
        let items: Vec<Value> = (0..5)
            .map(|i| json!({"Name": format!("bucket-{}", i), "Arn": format!("arn:aws:s3:::bucket-{}", i)}))
            .collect();

        let written = load(&session, &bucket_schema(), &items, &kwargs(), 2).await.unwrap();

        assert_eq!(written, 5);
        let calls = session.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].query.contains("MERGE (i:S3Bucket {id: item.Name})"));
        assert_eq!(calls[0].params["DictList"].as_array().unwrap().len(), 2);
        assert_eq!(calls[2].params["DictList"].as_array().unwrap().len(), 1);
        assert_eq!(calls[2].params["AWS_ID"], json!("123456789012"));
    }

    #[tokio::test]
    async fn test_load_nothing() {
        let session = RecordingSession::new();
        assert_eq!(load(&session, &bucket_schema(), &[], &kwargs(), 10).await.unwrap(), 0);
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_requires_kwargs() {
        let session = RecordingSession::new();
        let mut params = kwargs();
        params.remove("AWS_ID");

        let err = load(&session, &bucket_schema(), &[json!({"Name": "b"})], &params, 10)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AWS_ID"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_matchlinks() {
        let session = RecordingSession::new();
        let rel = RelSchema::new(
            "CAN_READ",
            "S3Bucket",
            LinkDirection::Outward,
            TargetNodeMatcher::new().with("arn", PropertyRef::new("resource_arn")),
        );
        let source = TargetNodeMatcher::new().with("arn", PropertyRef::new("principal_arn"));
        let items = vec![json!({"principal_arn": "arn:aws:iam::1:role/r", "resource_arn": "arn:aws:s3:::b"})];
        let params = json!({"lastupdated": 9}).as_object().cloned().unwrap();

        let written = load_matchlinks(&session, "AWSPrincipal", &source, &rel, &items, &params, 1000)
            .await
            .unwrap();

        assert_eq!(written, 1);
        let calls = session.calls();
        assert!(calls[0].query.contains("MERGE (from)-[r:CAN_READ]->(to)"));
        assert_eq!(calls[0].params["lastupdated"], json!(9));
    }
}
