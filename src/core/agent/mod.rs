use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::credentials::Credentials;
use super::store::types::MonitoringJob;

/// How deep the agent may iterate its own investigation loop.
const MAX_ITERATIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The service broke the run/poll/state contract (non-2xx on start,
    /// missing run/thread ids, unreadable bodies).
    #[error("agent protocol error: {0}")]
    Protocol(String),
    /// The run reached a terminal error/timeout status on the agent side.
    #[error("agent run failed: {0}")]
    Execution(String),
    /// Our own polling cap was exceeded. The remote run is not cancelled;
    /// we just stop waiting for it.
    #[error("agent run timed out after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub thread_id: String,
}

/// The external investigation agent, modeled strictly as a
/// start/poll/fetch-state machine so tests can swap in a mock.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Start an asynchronous run. The input is the full request body.
    async fn start_run(&self, body: Value) -> Result<RunHandle, AgentError>;

    /// Current status of a run: queued | running | success | error | timeout.
    async fn poll_run(&self, run_id: &str) -> Result<String, AgentError>;

    /// Final thread state once the run succeeded.
    async fn fetch_state(&self, thread_id: &str) -> Result<Value, AgentError>;
}

/// HTTP implementation against the agent service.
pub struct HttpAgentApi {
    base_url: String,
    client: Client,
}

impl HttpAgentApi {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn start_run(&self, body: Value) -> Result<RunHandle, AgentError> {
        let res = self
            .client
            .post(format!("{}/runs", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Protocol(format!("POST /runs failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Protocol(format!(
                "POST /runs returned {}: {}",
                status, body
            )));
        }

        let parsed: Value = res
            .json()
            .await
            .map_err(|e| AgentError::Protocol(format!("POST /runs body unreadable: {}", e)))?;

        match (
            parsed.get("run_id").and_then(|v| v.as_str()),
            parsed.get("thread_id").and_then(|v| v.as_str()),
        ) {
            (Some(run_id), Some(thread_id)) => Ok(RunHandle {
                run_id: run_id.to_string(),
                thread_id: thread_id.to_string(),
            }),
            _ => Err(AgentError::Protocol(
                "run response missing run_id or thread_id".to_string(),
            )),
        }
    }

    async fn poll_run(&self, run_id: &str) -> Result<String, AgentError> {
        let res = self
            .client
            .get(format!("{}/runs/{}", self.base_url, run_id))
            .send()
            .await
            .map_err(|e| AgentError::Protocol(format!("poll failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AgentError::Protocol(format!(
                "poll returned {}",
                res.status()
            )));
        }

        let parsed: Value = res
            .json()
            .await
            .map_err(|e| AgentError::Protocol(format!("poll body unreadable: {}", e)))?;
        Ok(parsed
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    async fn fetch_state(&self, thread_id: &str) -> Result<Value, AgentError> {
        let res = self
            .client
            .get(format!("{}/threads/{}/state", self.base_url, thread_id))
            .send()
            .await
            .map_err(|e| AgentError::Protocol(format!("GET thread state failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AgentError::Protocol(format!(
                "GET thread state returned {}",
                res.status()
            )));
        }

        let body: Value = res.json().await.map_err(|e| {
            AgentError::Protocol(format!("thread state body unreadable: {}", e))
        })?;
        // `values` carries the graph state; fall back to the raw body when a
        // server variant omits the wrapper.
        Ok(body.get("values").cloned().unwrap_or(body))
    }
}

/// Drives a run to completion: start, poll on an interval, fetch the final
/// state, under a hard wall-clock cap measured from the start response.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AgentRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl AgentRunner {
    pub async fn run(&self, api: &dyn AgentApi, body: Value) -> Result<Value, AgentError> {
        let handle = api.start_run(body).await?;
        let deadline = Instant::now() + self.timeout;

        loop {
            tokio::time::sleep(self.poll_interval).await;
            if Instant::now() >= deadline {
                return Err(AgentError::Timeout(self.timeout.as_secs()));
            }

            match api.poll_run(&handle.run_id).await {
                Ok(status) => match status.as_str() {
                    "success" => return api.fetch_state(&handle.thread_id).await,
                    "error" | "timeout" => {
                        return Err(AgentError::Execution(format!(
                            "agent run {} ended with status '{}'",
                            handle.run_id, status
                        )));
                    }
                    // queued, running, or anything unrecognized: keep waiting.
                    _ => {}
                },
                Err(e) => {
                    // A failed poll round-trip is transient; the deadline
                    // still bounds how long we keep retrying.
                    debug!("poll for run {} failed, retrying: {}", handle.run_id, e);
                }
            }
        }
    }
}

/// Assemble the request body for `POST /runs`.
pub fn build_run_input(
    assistant_id: &str,
    job: &MonitoringJob,
    run_id: &str,
    prompt: &str,
    creds: &Credentials,
    started_at: i64,
) -> Value {
    let affected_services: Vec<String> = job
        .config
        .get("services")
        .and_then(|s| s.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    let service = affected_services
        .first()
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    serde_json::json!({
        "assistant_id": assistant_id,
        "input": {
            "investigation_id": run_id,
            "org_id": job.org_id,
            "alert_context": {
                "alert_name": format!("[Monitoring] {}", job.name),
                "service": service,
                "severity": "monitoring",
                "message": format!(
                    "Scheduled {} check (every {} minutes)",
                    job.job_type.as_str(),
                    job.schedule_interval_minutes
                ),
            },
            "messages": [{"role": "user", "content": prompt}],
            "datadog_creds": creds.datadog,
            "github_creds": creds.github,
            "slack_creds": creds.slack,
            "phase": "investigation",
            "iteration": 0,
            "max_iterations": MAX_ITERATIONS,
            "recent_deployments": [],
            "affected_services": affected_services,
            "started_at": started_at,
        },
    })
}
