//! Terminal workflow records and artefact collection.
//!
//! A completed workflow leaves behind one compact JSON record under
//! `workflow:<id>` with a TTL, carrying its progress, timestamps, and the
//! descriptors of any artefacts the file store links to it (directly or
//! through a `workflow_mapping` delegation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use synapse_kernel::error::{KvResult, StoreError};
use synapse_kernel::store::{keys, KvStore};
use synapse_kernel::workflow::{ExecutionStatus, Progress, WorkflowExecution};
use tracing::warn;

/// Descriptor of one artefact produced by a workflow. Content is inlined
/// only for small files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// File metadata as persisted by the file store.
#[derive(Debug, Deserialize)]
struct FileMetadata {
    filename: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    size: u64,
}

/// Compact terminal record of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub status: ExecutionStatus,
    pub task_name: String,
    pub description: String,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Write the terminal record of a completed workflow.
pub(crate) async fn persist_completed(
    store: &dyn KvStore,
    exec: &WorkflowExecution,
    artifacts: Vec<ArtifactDescriptor>,
    ttl: Duration,
) -> KvResult<()> {
    let record = WorkflowRecord {
        id: exec.id.clone(),
        status: ExecutionStatus::Completed,
        task_name: exec.plan.goal.goal_type.clone(),
        description: exec.user_request.clone(),
        progress: exec.progress.clone(),
        started_at: exec.started_at,
        completed_at: Utc::now(),
        artifacts,
    };
    let json =
        serde_json::to_string(&record).map_err(|err| StoreError::Serialization(err.to_string()))?;
    store.set_ex(&keys::workflow(&exec.id), &json, ttl).await
}

/// Artefact descriptors for a workflow: files linked to its id, plus
/// files linked to a delegated id when a `workflow_mapping` exists. File
/// storage is optional — everything here degrades to an empty or partial
/// list with a log line.
pub(crate) async fn collect_artifacts(
    store: &dyn KvStore,
    workflow_id: &str,
    max_inline_bytes: u64,
) -> Vec<ArtifactDescriptor> {
    let mut file_ids: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut owners = vec![workflow_id.to_string()];
    match store.get(&keys::workflow_mapping(workflow_id)).await {
        Ok(Some(delegated)) => owners.push(delegated),
        Ok(None) => {}
        Err(err) => warn!(%err, %workflow_id, "workflow mapping unreadable"),
    }

    for owner in owners {
        match store.smembers(&keys::files_by_workflow(&owner)).await {
            Ok(ids) => {
                for id in ids {
                    if seen.insert(id.clone()) {
                        file_ids.push(id);
                    }
                }
            }
            Err(err) => warn!(%err, %owner, "file index unreadable"),
        }
    }

    let mut artifacts = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        let metadata = match store.get(&keys::file_metadata(&file_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<FileMetadata>(&raw) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(%err, %file_id, "skipping undecodable file metadata");
                    continue;
                }
            },
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, %file_id, "file metadata unreadable");
                continue;
            }
        };

        let content = if metadata.size <= max_inline_bytes {
            store
                .get(&keys::file_content(&file_id))
                .await
                .unwrap_or_default()
        } else {
            None
        };

        artifacts.push(ArtifactDescriptor {
            filename: metadata.filename,
            content_type: metadata.content_type,
            size: metadata.size,
            content,
        });
    }
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synapse_foundation::MemoryKvStore;

    async fn link_file(
        store: &MemoryKvStore,
        workflow_id: &str,
        file_id: &str,
        filename: &str,
        size: u64,
        content: &str,
    ) {
        store
            .sadd(&keys::files_by_workflow(workflow_id), file_id)
            .await
            .unwrap();
        store
            .set(
                &keys::file_metadata(file_id),
                &json!({
                    "filename": filename,
                    "content_type": "text/plain",
                    "size": size,
                })
                .to_string(),
            )
            .await
            .unwrap();
        store
            .set(&keys::file_content(file_id), content)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn small_artifacts_inline_content() {
        let store = MemoryKvStore::new();
        link_file(&store, "w1", "f1", "out.txt", 5, "hello").await;

        let artifacts = collect_artifacts(&store, "w1", 1024).await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].filename, "out.txt");
        assert_eq!(artifacts[0].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn oversized_artifacts_keep_content_external() {
        let store = MemoryKvStore::new();
        link_file(&store, "w1", "f1", "big.bin", 10_000, "...").await;

        let artifacts = collect_artifacts(&store, "w1", 1024).await;
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].content.is_none());
        assert_eq!(artifacts[0].size, 10_000);
    }

    #[tokio::test]
    async fn delegated_mapping_contributes_artifacts() {
        let store = MemoryKvStore::new();
        link_file(&store, "w1", "f1", "own.txt", 3, "own").await;
        link_file(&store, "delegate", "f2", "delegated.txt", 3, "del").await;
        store
            .set(&keys::workflow_mapping("w1"), "delegate")
            .await
            .unwrap();

        let mut artifacts = collect_artifacts(&store, "w1", 1024).await;
        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].filename, "delegated.txt");
        assert_eq!(artifacts[1].filename, "own.txt");
    }

    #[tokio::test]
    async fn missing_file_store_means_no_artifacts() {
        let store = MemoryKvStore::new();
        assert!(collect_artifacts(&store, "w1", 1024).await.is_empty());
    }
}
