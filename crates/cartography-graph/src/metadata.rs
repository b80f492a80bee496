//! Bookkeeping nodes recording when each module last synced.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use cartography_core::util::validate_identifier;
use cartography_core::UpdateTag;

use crate::client::{GraphSession, Params};

/// Record that `synced_type` was synced for the `group_type` node `group_id`.
///
/// Creates or updates one `(:ModuleSyncMetadata:SyncMetadata)` node with id
/// `{group_type}_{group_id}_{synced_type}`.
pub async fn merge_module_sync_metadata<S: GraphSession + ?Sized>(
    session: &S,
    group_type: &str,
    group_id: &str,
    synced_type: &str,
    update_tag: UpdateTag,
) -> Result<()> {
    validate_identifier(group_type)?;
    validate_identifier(synced_type)?;

    let query = "MERGE (n:ModuleSyncMetadata {id: $id}) \
                 ON CREATE SET n:SyncMetadata, n.firstseen = timestamp() \
                 SET n.syncedtype = $synced_type, \
                     n.grouptype = $group_type, \
                     n.groupid = $group_id, \
                     n.lastupdated = $UPDATE_TAG";

    let mut params = Params::new();
    params.insert(
        "id".to_string(),
        Value::from(format!("{}_{}_{}", group_type, group_id, synced_type)),
    );
    params.insert("synced_type".to_string(), Value::from(synced_type));
    params.insert("group_type".to_string(), Value::from(group_type));
    params.insert("group_id".to_string(), Value::from(group_id));
    params.insert("UPDATE_TAG".to_string(), Value::from(update_tag.value()));

    session
        .run(query, &params)
        .await
        .with_context(|| format!("Failed to record sync metadata for {} {}", group_type, group_id))?;

    debug!(group_type, group_id, synced_type, "Recorded module sync metadata");
    Ok(())
}
