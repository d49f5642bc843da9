//! Orchestrator tunables.

use std::time::Duration;
use synapse_kernel::event::EVENT_CHANNEL_CAPACITY;

/// Knobs of the workflow orchestrator. Every deadline and TTL the engine
/// applies lives here; code never hard-codes them at use sites.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of each per-workflow event channel.
    pub event_capacity: usize,

    /// Cadence of the cooperative wait while a workflow is paused.
    pub pause_poll_interval: Duration,

    /// How long a completed execution stays in the in-memory active map
    /// so fast status polls skip the store.
    pub completed_linger: Duration,

    /// TTL of persisted per-step retry counters.
    pub retry_counter_ttl: Duration,

    /// TTL of the terminal workflow record.
    pub record_ttl: Duration,

    /// TTL refreshed on the `active_workflows` set.
    pub active_set_ttl: Duration,

    /// Most-recent store-sourced entries returned by `list_active`.
    pub list_limit: usize,

    /// Aggregate deadline of the store side of `list_active`; hitting it
    /// returns partial results, never an error.
    pub list_deadline: Duration,

    /// Timeout applied to capability steps that declare none.
    pub default_step_timeout: Duration,

    /// Largest artefact content inlined into the terminal record.
    pub max_inline_artifact_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: EVENT_CHANNEL_CAPACITY,
            pause_poll_interval: Duration::from_millis(100),
            completed_linger: Duration::from_secs(30),
            retry_counter_ttl: Duration::from_secs(24 * 60 * 60),
            record_ttl: Duration::from_secs(24 * 60 * 60),
            active_set_ttl: Duration::from_secs(24 * 60 * 60),
            list_limit: 50,
            list_deadline: Duration::from_secs(3),
            default_step_timeout: Duration::from_secs(300),
            max_inline_artifact_bytes: 64 * 1024,
        }
    }
}
