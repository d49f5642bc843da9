//! HTTP client for the principles service.
//!
//! Narrow contract: `POST {base_url}/check-plan` with `{"plan": <plan>}`,
//! answered by `{"blocked": bool, "reason": string}`. Anything other than
//! a decodable 2xx inside the deadline is `PrinciplesUnavailable`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::principles::{PrinciplesGate, PrinciplesVerdict};
use tracing::debug;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Principles gate backed by an HTTP endpoint.
pub struct HttpPrinciplesGate {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpPrinciplesGate {
    /// Gate for the service at `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/check-plan", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PrinciplesGate for HttpPrinciplesGate {
    async fn check_plan(&self, plan: &Value) -> WorkflowResult<PrinciplesVerdict> {
        let response = self
            .client
            .post(self.endpoint())
            .timeout(self.request_timeout)
            .json(&json!({ "plan": plan }))
            .send()
            .await
            .map_err(|err| WorkflowError::PrinciplesUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkflowError::PrinciplesUnavailable(format!(
                "check-plan returned {status}"
            )));
        }

        let verdict: PrinciplesVerdict = response
            .json()
            .await
            .map_err(|err| WorkflowError::PrinciplesUnavailable(err.to_string()))?;
        debug!(blocked = verdict.blocked, reason = %verdict.reason, "principles verdict");
        Ok(verdict)
    }
}
