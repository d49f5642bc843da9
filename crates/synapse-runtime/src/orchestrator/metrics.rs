//! Store-held aggregate metrics.
//!
//! Counters and gauges live in the external store, not in process
//! memory, so an orchestrator restart does not zero them. Every write is
//! best-effort: metrics must never block or fail a terminal transition.

use chrono::Utc;
use std::time::Duration;
use synapse_kernel::store::{keys, KvStore};
use tracing::warn;

/// Fold one terminal workflow into the aggregate metrics.
pub(crate) async fn record_terminal(store: &dyn KvStore, success: bool, duration: Duration) {
    let total = match store.incr(keys::METRICS_TOTAL_EXECUTIONS).await {
        Ok(total) => total,
        Err(err) => {
            warn!(%err, "failed to bump total executions, skipping metrics");
            return;
        }
    };
    if success {
        if let Err(err) = store.incr(keys::METRICS_SUCCESSFUL_EXECUTIONS).await {
            warn!(%err, "failed to bump successful executions");
        }
    }
    if let Err(err) = store
        .set(keys::METRICS_LAST_EXECUTION, &Utc::now().to_rfc3339())
        .await
    {
        warn!(%err, "failed to stamp last execution");
    }

    // Rolling arithmetic mean from the previous value and the new total.
    let previous = match store.get(keys::METRICS_AVG_EXECUTION_TIME).await {
        Ok(raw) => raw.and_then(|value| value.parse::<f64>().ok()).unwrap_or(0.0),
        Err(err) => {
            warn!(%err, "failed to read average execution time");
            0.0
        }
    };
    let seconds = duration.as_secs_f64();
    let average = if total <= 1 {
        seconds
    } else {
        previous + (seconds - previous) / total as f64
    };
    if let Err(err) = store
        .set(keys::METRICS_AVG_EXECUTION_TIME, &format!("{average:.6}"))
        .await
    {
        warn!(%err, "failed to store average execution time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_foundation::MemoryKvStore;

    #[tokio::test]
    async fn counters_and_average_accumulate() {
        let store = MemoryKvStore::new();

        record_terminal(&store, true, Duration::from_secs(10)).await;
        record_terminal(&store, false, Duration::from_secs(20)).await;

        assert_eq!(
            store.get(keys::METRICS_TOTAL_EXECUTIONS).await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(
            store.get(keys::METRICS_SUCCESSFUL_EXECUTIONS).await.unwrap(),
            Some("1".to_string())
        );
        let average: f64 = store
            .get(keys::METRICS_AVG_EXECUTION_TIME)
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!((average - 15.0).abs() < 1e-6);

        let stamp = store.get(keys::METRICS_LAST_EXECUTION).await.unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
