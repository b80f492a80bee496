//! Resource permission relationships for AWS accounts.
//!
//! Reads the IAM principals and policy statements already in the graph,
//! evaluates them against every resource of each mapped label, and draws
//! `(:AWSPrincipal)-[:REL]->(:Label)` for each grant. Relationships from older
//! runs are deleted afterwards.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use cartography_core::model::{LinkDirection, PropertyRef, RelSchema, TargetNodeMatcher};
use cartography_core::permission::{
    calculate_permission_relationships, PolicyStatement, PrincipalMapping, Principals,
    RelationshipMapping,
};
use cartography_core::util::validate_identifier;
use cartography_core::UpdateTag;

use crate::client::{GraphSession, Params};
use crate::loader::load_matchlinks;
use crate::metadata::merge_module_sync_metadata;
use crate::statement::GraphStatement;

/// Batch size of the stale relationship cleanup.
const CLEANUP_ITERATION_SIZE: u64 = 1000;

/// `syncedtype` recorded in the account's sync metadata.
const SYNCED_TYPE: &str = "PermissionRelationships";

/// Counts from one account's permission sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSyncResult {
    pub mappings_evaluated: usize,
    pub relationships_loaded: usize,
}

impl PermissionSyncResult {
    pub fn merge(&mut self, other: &PermissionSyncResult) {
        self.mappings_evaluated += other.mappings_evaluated;
        self.relationships_loaded += other.relationships_loaded;
    }
}

/// Principals of an account with the statements of each attached policy.
pub async fn get_principals_for_account<S: GraphSession + ?Sized>(
    session: &S,
    account_id: &str,
) -> Result<Principals> {
    let query = "MATCH (acc:AWSAccount {id: $AccountId})-[:RESOURCE]->(principal:AWSPrincipal)\
                 -[:POLICY]->(policy:AWSPolicy)-[:STATEMENT]->(statement:AWSPolicyStatement) \
                 RETURN principal.arn AS principal_arn, policy.id AS policy_id, \
                 collect(properties(statement)) AS statements";

    let rows = session
        .fetch(query, &account_params(account_id), &["principal_arn", "policy_id", "statements"])
        .await
        .with_context(|| format!("Failed to read principals of account {}", account_id))?;

    let mut principals = Principals::new();
    for row in rows {
        let (Some(principal_arn), Some(policy_id)) = (
            row.get("principal_arn").and_then(Value::as_str),
            row.get("policy_id").and_then(Value::as_str),
        ) else {
            warn!(account_id, "Skipping principal row without an ARN or policy id");
            continue;
        };

        let statements = match row.get("statements") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| PolicyStatement::from_properties(item.clone()))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Policy {} has an unreadable statement", policy_id))?,
            _ => Vec::new(),
        };

        principals
            .entry(principal_arn.to_string())
            .or_default()
            .entry(policy_id.to_string())
            .or_default()
            .extend(statements);
    }

    Ok(principals)
}

/// ARNs of every `node_label` node owned by the account.
pub async fn get_resource_arns<S: GraphSession + ?Sized>(
    session: &S,
    account_id: &str,
    node_label: &str,
) -> Result<Vec<String>> {
    validate_identifier(node_label)?;
    let query = format!(
        "MATCH (acc:AWSAccount {{id: $AccountId}})-[:RESOURCE]->(resource:{}) \
         RETURN resource.arn AS arn",
        node_label
    );

    let rows = session
        .fetch(&query, &account_params(account_id), &["arn"])
        .await
        .with_context(|| format!("Failed to read {} ARNs of account {}", node_label, account_id))?;

    Ok(rows
        .iter()
        .filter_map(|row| row.get("arn").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// Write one `relationship_name` relationship per mapping, `batch_size`
/// mappings per query.
pub async fn load_principal_mappings<S: GraphSession + ?Sized>(
    session: &S,
    principal_mappings: &[PrincipalMapping],
    node_label: &str,
    relationship_name: &str,
    update_tag: UpdateTag,
    batch_size: usize,
) -> Result<usize> {
    if principal_mappings.is_empty() {
        return Ok(0);
    }

    let source = TargetNodeMatcher::new().with("arn", PropertyRef::new("principal_arn"));
    let rel = RelSchema::new(
        relationship_name,
        node_label,
        LinkDirection::Outward,
        TargetNodeMatcher::new().with("arn", PropertyRef::new("resource_arn")),
    );
    let items = principal_mappings
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;

    let mut kwargs = Params::new();
    kwargs.insert("lastupdated".to_string(), Value::from(update_tag.value()));

    load_matchlinks(session, "AWSPrincipal", &source, &rel, &items, &kwargs, batch_size).await
}

/// Delete `relationship_name` relationships of the account not written by
/// this run.
pub async fn cleanup_rpr<S: GraphSession + ?Sized>(
    session: &S,
    node_label: &str,
    relationship_name: &str,
    update_tag: UpdateTag,
    account_id: &str,
) -> Result<()> {
    validate_identifier(node_label)?;
    validate_identifier(relationship_name)?;

    let query = format!(
        "MATCH (:AWSAccount {{id: $AWS_ID}})-[:RESOURCE]->(principal:AWSPrincipal)\
         -[r:{}]->(:{}) \
         WHERE r.lastupdated <> $UPDATE_TAG \
         WITH r LIMIT $LIMIT_SIZE \
         DELETE r \
         RETURN COUNT(*) AS TotalCompleted",
        relationship_name, node_label
    );

    let mut params = Params::new();
    params.insert("AWS_ID".to_string(), Value::from(account_id));
    params.insert("UPDATE_TAG".to_string(), Value::from(update_tag.value()));

    info!(account_id, rel = relationship_name, target = node_label, "Cleaning up stale permission relationships");
    GraphStatement::new(query, params, true, CLEANUP_ITERATION_SIZE)
        .run(session)
        .await
        .with_context(|| format!("Failed to clean up {} relationships", relationship_name))
}

/// Evaluate and load every mapping for one account.
pub async fn sync<S: GraphSession + ?Sized>(
    session: &S,
    account_id: &str,
    update_tag: UpdateTag,
    mappings: &[RelationshipMapping],
    batch_size: usize,
) -> Result<PermissionSyncResult> {
    info!(account_id, "Syncing permission relationships");

    let principals = get_principals_for_account(session, account_id).await?;
    let mut result = PermissionSyncResult::default();

    for mapping in mappings {
        let resource_arns = get_resource_arns(session, account_id, &mapping.target_label).await?;
        let allowed = calculate_permission_relationships(&principals, &resource_arns, mapping.permissions.as_slice());
        info!(
            account_id,
            target = %mapping.target_label,
            rel = %mapping.relationship_name,
            principals = principals.len(),
            resources = resource_arns.len(),
            relationships = allowed.len(),
            "Evaluated permission relationship"
        );

        result.relationships_loaded += load_principal_mappings(
            session,
            &allowed,
            &mapping.target_label,
            &mapping.relationship_name,
            update_tag,
            batch_size,
        )
        .await?;
        cleanup_rpr(session, &mapping.target_label, &mapping.relationship_name, update_tag, account_id)
            .await?;
        result.mappings_evaluated += 1;
    }

    Ok(result)
}

/// Run `sync` for every AWS account in the graph.
pub async fn sync_all_accounts<S: GraphSession + ?Sized>(
    session: &S,
    update_tag: UpdateTag,
    mappings: &[RelationshipMapping],
    batch_size: usize,
) -> Result<PermissionSyncResult> {
    let rows = session
        .fetch("MATCH (a:AWSAccount) RETURN a.id AS id ORDER BY id", &Params::new(), &["id"])
        .await
        .context("Failed to list AWS accounts")?;

    let mut total = PermissionSyncResult::default();
    for account_id in rows.iter().filter_map(|row| row.get("id").and_then(Value::as_str)) {
        let result = sync(session, account_id, update_tag, mappings, batch_size).await?;
        merge_module_sync_metadata(session, "AWSAccount", account_id, SYNCED_TYPE, update_tag).await?;
        total.merge(&result);
    }
    Ok(total)
}

fn account_params(account_id: &str) -> Params {
    let mut params = Params::new();
    params.insert("AccountId".to_string(), Value::from(account_id));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use serde_json::json;

    const ACCOUNT: &str = "123456789012";
    const READER: &str = "arn:aws:iam::123456789012:role/reader";
    const DENIED: &str = "arn:aws:iam::123456789012:role/denied";
    const BUCKET: &str = "arn:aws:s3:::logs";

    fn s3_read_mapping() -> RelationshipMapping {
        RelationshipMapping {
            permissions: vec!["S3:GetObject".to_string()],
            relationship_name: "CAN_READ".to_string(),
            target_label: "S3Bucket".to_string(),
        }
    }

    fn script_principals(session: &RecordingSession) {
        session.reply(
            "AWSPolicyStatement",
            vec![
                json!({
                    "principal_arn": READER,
                    "policy_id": "read",
                    "statements": [{"effect": "Allow", "action": ["s3:Get*"], "resource": ["*"]}],
                }),
                json!({
                    "principal_arn": DENIED,
                    "policy_id": "read",
                    "statements": [{"effect": "Allow", "action": ["s3:*"], "resource": ["*"]}],
                }),
                json!({
                    "principal_arn": DENIED,
                    "policy_id": "deny",
                    "statements": [{"effect": "Deny", "action": "s3:GetObject", "resource": BUCKET}],
                }),
            ],
        );
    }

    #[tokio::test]
    async fn test_get_principals_for_account() {
        let session = RecordingSession::new();
        script_principals(&session);

        let principals = get_principals_for_account(&session, ACCOUNT).await.unwrap();

        assert_eq!(principals.len(), 2);
        assert_eq!(principals[DENIED].len(), 2);
        assert_eq!(principals[READER]["read"].len(), 1);
        assert_eq!(session.calls()[0].params["AccountId"], json!(ACCOUNT));
    }

    #[tokio::test]
    async fn test_get_principals_rejects_bad_statement() {
        let session = RecordingSession::new();
        session.reply(
            "AWSPolicyStatement",
            vec![json!({"principal_arn": READER, "policy_id": "p", "statements": [{"action": "s3:*"}]})],
        );
        assert!(get_principals_for_account(&session, ACCOUNT).await.is_err());
    }

    #[tokio::test]
    async fn test_get_resource_arns() {
        let session = RecordingSession::new();
        session.reply("(resource:S3Bucket)", vec![json!({"arn": BUCKET}), json!({"arn": null})]);

        let arns = get_resource_arns(&session, ACCOUNT, "S3Bucket").await.unwrap();
        assert_eq!(arns, vec![BUCKET.to_string()]);
        assert!(get_resource_arns(&session, ACCOUNT, "S3Bucket) DELETE (x").await.is_err());
    }

    #[tokio::test]
    async fn test_load_principal_mappings_empty_is_noop() {
        let session = RecordingSession::new();
        let count = load_principal_mappings(&session, &[], "S3Bucket", "CAN_READ", UpdateTag(1), 10)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_principal_mappings_batches() {
        let session = RecordingSession::new();
        let mappings: Vec<PrincipalMapping> = [READER, DENIED]
            .iter()
            .map(|arn| PrincipalMapping {
                principal_arn: arn.to_string(),
                resource_arn: BUCKET.to_string(),
            })
            .collect();

        let count = load_principal_mappings(&session, &mappings, "S3Bucket", "CAN_READ", UpdateTag(1), 1)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let loads = session.calls_matching("MERGE (from)-[r:CAN_READ]->(to)");
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[1].params["DictList"], json!([{"principal_arn": DENIED, "resource_arn": BUCKET}]));
    }

    #[tokio::test]
    async fn test_cleanup_rpr() {
        let session = RecordingSession::new();
        session.reply("DELETE r", vec![json!({"TotalCompleted": 3})]);

        cleanup_rpr(&session, "S3Bucket", "CAN_READ", UpdateTag(5), ACCOUNT).await.unwrap();

        let calls = session.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].query.contains("-[r:CAN_READ]->(:S3Bucket)"));
        assert_eq!(calls[0].params["AWS_ID"], json!(ACCOUNT));
        assert_eq!(calls[0].params["UPDATE_TAG"], json!(5));
        assert_eq!(calls[0].params["LIMIT_SIZE"], json!(1000));
    }

    #[tokio::test]
    async fn test_sync_draws_only_allowed_relationships() {
        let session = RecordingSession::new();
        script_principals(&session);
        session.reply("(resource:S3Bucket)", vec![json!({"arn": BUCKET})]);

        let result = sync(&session, ACCOUNT, UpdateTag(42), &[s3_read_mapping()], 1000).await.unwrap();

        assert_eq!(
            result,
            PermissionSyncResult {
                mappings_evaluated: 1,
                relationships_loaded: 1,
            }
        );

        let loads = session.calls_matching("MERGE (from)-[r:CAN_READ]->(to)");
        assert_eq!(loads.len(), 1);
        assert_eq!(
            loads[0].params["DictList"],
            json!([{"principal_arn": READER, "resource_arn": BUCKET}])
        );
        assert_eq!(loads[0].params["lastupdated"], json!(42));
        assert_eq!(session.calls_matching("TotalCompleted").len(), 1);
    }

    #[tokio::test]
    async fn test_sync_without_resources_still_cleans_up() {
        let session = RecordingSession::new();
        script_principals(&session);

        let result = sync(&session, ACCOUNT, UpdateTag(42), &[s3_read_mapping()], 1000).await.unwrap();

        assert_eq!(result.relationships_loaded, 0);
        assert!(session.calls_matching("MERGE (from)").is_empty());
        assert_eq!(session.calls_matching("TotalCompleted").len(), 1);
    }

    #[tokio::test]
    async fn test_sync_all_accounts() {
        let session = RecordingSession::new();
        session.reply("MATCH (a:AWSAccount)", vec![json!({"id": "111"}), json!({"id": "222"})]);

        let result = sync_all_accounts(&session, UpdateTag(1), &[s3_read_mapping()], 1000).await.unwrap();

        assert_eq!(result.mappings_evaluated, 2);
        let principal_reads = session.calls_matching("AWSPolicyStatement");
        assert_eq!(principal_reads.len(), 2);
        assert_eq!(principal_reads[1].params["AccountId"], json!("222"));
        let metadata = session.calls_matching("ModuleSyncMetadata");
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0].params["id"], json!("AWSAccount_111_PermissionRelationships"));
    }
}
