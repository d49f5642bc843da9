//! Persisted per-step retry budgets.
//!
//! Counters live in the store under `workflow_step_retry:<wid>:<sid>`
//! with a TTL, so an orchestrator restart inside the TTL window resumes a
//! step with its remaining budget instead of a fresh one. The in-memory
//! cache is authoritative for the current run; store writes are
//! best-effort mirrors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use synapse_kernel::store::{keys, KvStore};
use tracing::warn;

pub(crate) struct RetryLedger {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    counts: HashMap<String, u32>,
}

impl RetryLedger {
    pub(crate) fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            counts: HashMap::new(),
        }
    }

    /// Retries already consumed by a step, seeded from the store on first
    /// read.
    pub(crate) async fn current(&mut self, workflow_id: &str, step_key: &str) -> u32 {
        if let Some(count) = self.counts.get(step_key) {
            return *count;
        }
        let persisted = match self.store.get(&keys::step_retry(workflow_id, step_key)).await {
            Ok(Some(raw)) => raw.parse::<u32>().unwrap_or(0),
            Ok(None) => 0,
            Err(err) => {
                warn!(%err, %step_key, "retry counter unreadable, assuming fresh budget");
                0
            }
        };
        self.counts.insert(step_key.to_string(), persisted);
        persisted
    }

    /// Consume one retry. Returns the new count.
    pub(crate) async fn increment(&mut self, workflow_id: &str, step_key: &str) -> u32 {
        let local_next = self.current(workflow_id, step_key).await + 1;
        let key = keys::step_retry(workflow_id, step_key);
        let next = match self.store.incr(&key).await {
            Ok(persisted) => {
                if let Err(err) = self.store.expire(&key, self.ttl).await {
                    warn!(%err, %key, "failed to set retry counter ttl");
                }
                persisted.max(0) as u32
            }
            Err(err) => {
                warn!(%err, %key, "retry counter persist failed, tracking in memory");
                local_next
            }
        };
        self.counts.insert(step_key.to_string(), next);
        next
    }

    /// Drop one step's counter (step succeeded).
    pub(crate) async fn clear(&mut self, workflow_id: &str, step_key: &str) {
        self.counts.remove(step_key);
        if let Err(err) = self
            .store
            .delete(&keys::step_retry(workflow_id, step_key))
            .await
        {
            warn!(%err, %step_key, "failed to clear retry counter");
        }
    }

    /// Drop every counter of a workflow (terminal failure or cancel).
    pub(crate) async fn clear_all(&mut self, workflow_id: &str) {
        self.counts.clear();
        let pattern = keys::step_retry_pattern(workflow_id);
        match self.store.keys(&pattern).await {
            Ok(counter_keys) => {
                for key in counter_keys {
                    if let Err(err) = self.store.delete(&key).await {
                        warn!(%err, %key, "failed to delete retry counter");
                    }
                }
            }
            Err(err) => warn!(%err, %pattern, "failed to enumerate retry counters"),
        }
    }
}
