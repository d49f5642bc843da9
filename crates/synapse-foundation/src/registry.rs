//! Capability registry — store-backed CRUD and goal matching with
//! learning-weighted ranking.

use std::cmp::Ordering;
use std::sync::Arc;
use synapse_kernel::capability::{Capability, Goal};
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::store::{keys, KvStore};
use tracing::{debug, warn};

/// Weight applied to the learned success rate when ranking matches.
const LEARNED_RATE_WEIGHT: f64 = 2.0;

/// Smoothing factor for learned-rate updates.
const SUCCESS_RATE_ALPHA: f64 = 0.3;

/// Persists [`Capability`] records and answers list, get, and
/// match-by-goal queries.
pub struct CapabilityRegistry {
    store: Arc<dyn KvStore>,
}

impl CapabilityRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist a capability, assigning a fresh id when absent and
    /// stamping `created_at`. Returns the stored record.
    pub async fn save(&self, mut capability: Capability) -> WorkflowResult<Capability> {
        if capability.id.is_empty() {
            capability.id = uuid::Uuid::new_v4().to_string();
        }
        capability.created_at = chrono::Utc::now();

        let json = serde_json::to_string(&capability)?;
        self.store
            .set(&keys::capability(&capability.id), &json)
            .await?;
        debug!(id = %capability.id, task = %capability.task_name, "capability saved");
        Ok(capability)
    }

    /// Fetch one capability by id. Decode failures are fatal here — the
    /// caller addressed the record directly.
    pub async fn get(&self, id: &str) -> WorkflowResult<Capability> {
        let raw = self
            .store
            .get(&keys::capability(id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("capability '{id}'")))?;
        let capability = serde_json::from_str(&raw)?;
        Ok(capability)
    }

    /// All capability records, unordered. A record that fails to decode
    /// is skipped so one corrupt entry cannot stall planning.
    pub async fn list(&self) -> WorkflowResult<Vec<Capability>> {
        let mut capabilities = Vec::new();
        for key in self.store.keys(keys::CAPABILITY_PATTERN).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Capability>(&raw) {
                Ok(capability) => capabilities.push(capability),
                Err(err) => warn!(%key, %err, "skipping undecodable capability record"),
            }
        }
        Ok(capabilities)
    }

    /// Capabilities that can serve `goal`, best first.
    ///
    /// Ranking is `score + 2.0 × learned_success_rate`, the learned rate
    /// read per capability with a task-level fallback. Ties break on id
    /// so the order is stable within a process.
    pub async fn find_matching(&self, goal: &Goal) -> WorkflowResult<Vec<Capability>> {
        let matches: Vec<Capability> = self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.matches_goal(goal))
            .collect();

        let mut ranked = Vec::with_capacity(matches.len());
        for capability in matches {
            let learned = self.learned_success_rate(&capability).await;
            let rank = capability.score + LEARNED_RATE_WEIGHT * learned;
            ranked.push((rank, capability));
        }
        ranked.sort_by(|(ra, a), (rb, b)| {
            rb.partial_cmp(ra)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(ranked.into_iter().map(|(_, c)| c).collect())
    }

    /// Stamp `last_used` on a capability after a successful execution.
    pub async fn record_use(&self, id: &str) -> WorkflowResult<()> {
        let mut capability = self.get(id).await?;
        capability.last_used = Some(chrono::Utc::now());
        let json = serde_json::to_string(&capability)?;
        self.store.set(&keys::capability(id), &json).await?;
        Ok(())
    }

    /// Fold one execution outcome into the learned success rates for a
    /// capability and its task name (exponential moving average).
    pub async fn record_outcome(
        &self,
        capability_id: &str,
        task_name: &str,
        success: bool,
    ) -> WorkflowResult<()> {
        let observation = if success { 1.0 } else { 0.0 };
        self.update_rate(&keys::capability_success_rate(capability_id), observation)
            .await?;
        self.update_rate(&keys::task_success_rate(task_name), observation)
            .await?;
        Ok(())
    }

    async fn update_rate(&self, key: &str, observation: f64) -> WorkflowResult<()> {
        let previous = self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse::<f64>().ok());
        let next = match previous {
            Some(rate) => rate + SUCCESS_RATE_ALPHA * (observation - rate),
            None => observation,
        };
        self.store.set(key, &format!("{next:.6}")).await?;
        Ok(())
    }

    /// Learned success rate in `[0, 1]`: per-capability key first, then
    /// the task-level fallback, then 0. Read failures degrade to 0 —
    /// ranking must not fail because a learning key is unreadable.
    async fn learned_success_rate(&self, capability: &Capability) -> f64 {
        for key in [
            keys::capability_success_rate(&capability.id),
            keys::task_success_rate(&capability.task_name),
        ] {
            match self.store.get(&key).await {
                Ok(Some(raw)) => {
                    if let Ok(rate) = raw.parse::<f64>() {
                        return rate.clamp(0.0, 1.0);
                    }
                    warn!(%key, %raw, "unparseable learned rate, ignoring");
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%key, %err, "learned rate read failed, ranking without it");
                    return 0.0;
                }
            }
        }
        0.0
    }
}
