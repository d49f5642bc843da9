//! Key-value store contract.
//!
//! The store is the only shared mutable state outside orchestrator process
//! memory. All updates are individual key / set-member operations; no
//! multi-key transaction is assumed, and readers tolerate either ordering
//! of paired writes by merging sources.

use crate::error::KvResult;
use async_trait::async_trait;
use std::time::Duration;

/// Abstract key-value / small-data store.
///
/// The operation set is deliberately redis-shaped: strings, sets, pattern
/// scans, counters, and TTLs. Backends live in `synapse-foundation`
/// (`MemoryKvStore`, and `RedisKvStore` behind the `persistence-redis`
/// feature).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value. `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Write a string value with no TTL.
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Write a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    /// Remove a key of any type. Returns `true` when it existed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// List keys matching a glob pattern (`*` wildcards only).
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>>;

    /// Add a member to a set, creating the set if absent.
    async fn sadd(&self, key: &str, member: &str) -> KvResult<()>;

    /// Remove a member from a set. Returns `true` when it was present.
    async fn srem(&self, key: &str, member: &str) -> KvResult<bool>;

    /// All members of a set, unordered. Empty for an absent key.
    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    /// Increment an integer value, creating it at 0 first. Returns the
    /// new value.
    async fn incr(&self, key: &str) -> KvResult<i64>;

    /// Set a TTL on an existing key. Returns `false` when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool>;
}

/// Key layout shared by every component that touches the store.
///
/// Centralised so the registry, planners, and orchestrator cannot drift
/// apart on key shapes.
pub mod keys {
    /// Set of currently active workflow ids.
    pub const ACTIVE_WORKFLOWS: &str = "active_workflows";

    /// Monotonic count of terminal workflow executions.
    pub const METRICS_TOTAL_EXECUTIONS: &str = "metrics:total_executions";

    /// Monotonic count of successful workflow executions.
    pub const METRICS_SUCCESSFUL_EXECUTIONS: &str = "metrics:successful_executions";

    /// RFC-3339 timestamp of the most recent terminal transition.
    pub const METRICS_LAST_EXECUTION: &str = "metrics:last_execution";

    /// Rolling arithmetic mean of per-workflow wallclock seconds.
    pub const METRICS_AVG_EXECUTION_TIME: &str = "metrics:avg_execution_time";

    /// JSON [`Capability`](crate::Capability) record.
    pub fn capability(id: &str) -> String {
        format!("capability:{id}")
    }

    /// Pattern matching every capability record.
    pub const CAPABILITY_PATTERN: &str = "capability:*";

    /// JSON [`Episode`](crate::Episode) record.
    pub fn episode(id: &str) -> String {
        format!("episode:{id}")
    }

    /// JSON [`WorkflowTemplate`](crate::WorkflowTemplate) record.
    pub fn workflow_template(id: &str) -> String {
        format!("workflow_template:{id}")
    }

    /// Pattern matching every registered template.
    pub const WORKFLOW_TEMPLATE_PATTERN: &str = "workflow_template:*";

    /// Compact JSON record of a terminal workflow, 24 h TTL.
    pub fn workflow(id: &str) -> String {
        format!("workflow:{id}")
    }

    /// Pattern matching every terminal workflow record.
    pub const WORKFLOW_PATTERN: &str = "workflow:*";

    /// Persisted retry count for one step of one workflow, 24 h TTL.
    pub fn step_retry(workflow_id: &str, step_id: &str) -> String {
        format!("workflow_step_retry:{workflow_id}:{step_id}")
    }

    /// Pattern matching every retry counter of one workflow.
    pub fn step_retry_pattern(workflow_id: &str) -> String {
        format!("workflow_step_retry:{workflow_id}:*")
    }

    /// Learned success rate for one capability.
    pub fn capability_success_rate(id: &str) -> String {
        format!("capability_success_rate:{id}")
    }

    /// Learned success rate fallback keyed by task name.
    pub fn task_success_rate(task_name: &str) -> String {
        format!("task_success_rate:{task_name}")
    }

    /// Delegated workflow id for artefact lookup.
    pub fn workflow_mapping(workflow_id: &str) -> String {
        format!("workflow_mapping:{workflow_id}")
    }

    /// Set of file ids produced by a workflow.
    pub fn files_by_workflow(workflow_id: &str) -> String {
        format!("file:by_workflow:{workflow_id}")
    }

    /// JSON file metadata record.
    pub fn file_metadata(file_id: &str) -> String {
        format!("file:metadata:{file_id}")
    }

    /// Raw file content.
    pub fn file_content(file_id: &str) -> String {
        format!("file:content:{file_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn key_shapes_match_the_store_layout() {
        assert_eq!(keys::capability("c1"), "capability:c1");
        assert_eq!(keys::step_retry("w1", "s1"), "workflow_step_retry:w1:s1");
        assert_eq!(keys::step_retry_pattern("w1"), "workflow_step_retry:w1:*");
        assert_eq!(keys::files_by_workflow("w1"), "file:by_workflow:w1");
        assert_eq!(keys::workflow_mapping("w1"), "workflow_mapping:w1");
    }
}
