use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::Semaphore;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use super::agent::{AgentApi, AgentRunner, build_run_input};
use super::alerts::decide;
use super::config::Config;
use super::credentials::CredentialLoader;
use super::parser::parse_agent_output;
use super::prompt::build_prompt;
use super::store::types::{Finding, MonitoringJob, MonitoringJobRun};
use super::store::{Store, now_ms};
use super::vault::SecretsVault;

/// Upper bound on simultaneously executing job pipelines. One slow agent
/// call must not starve unrelated tenants' schedules, but neither should a
/// burst of due jobs open hundreds of agent runs at once.
const MAX_CONCURRENT_RUNS: usize = 8;

struct RunOutcome {
    summary: String,
    findings: Vec<Finding>,
    alert_sent: bool,
    alert_severity: Option<String>,
}

/// Fans out due (or manually triggered) monitoring jobs, each through the
/// same pipeline: record run → load credentials → build prompt → run agent
/// → parse → decide alert → finalize run → update job counters.
pub struct SchedulerEngine {
    store: Arc<Store>,
    loader: CredentialLoader,
    agent: Option<Arc<dyn AgentApi>>,
    runner: AgentRunner,
    assistant_id: String,
    permits: Arc<Semaphore>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<Store>,
        vault: Arc<SecretsVault>,
        agent: Option<Arc<dyn AgentApi>>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            loader: CredentialLoader::new(vault, config),
            agent,
            runner: AgentRunner::default(),
            assistant_id: config.assistant_id.clone(),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_RUNS)),
        })
    }

    /// Register the once-a-minute due-job scan on the cron runtime.
    pub async fn register_cron(self: &Arc<Self>, cron: &JobScheduler) -> Result<()> {
        let engine = self.clone();
        let tick_job = Job::new_async("0 * * * * *", move |_uuid, mut _l| {
            let engine = engine.clone();
            Box::pin(async move {
                let dispatched = engine.tick().await;
                if dispatched > 0 {
                    info!("schedule tick dispatched {} job(s)", dispatched);
                }
            })
        })?;
        cron.add(tick_job).await?;
        Ok(())
    }

    /// One scheduling pass: scan for due jobs across all tenants and
    /// dispatch each as an independent task. Returns how many were
    /// dispatched. Does not wait for any pipeline to finish.
    pub async fn tick(self: &Arc<Self>) -> usize {
        let due = match self.store.get_due_jobs(now_ms()).await {
            Ok(due) => due,
            Err(e) => {
                warn!("due-job scan failed: {}", e);
                return 0;
            }
        };

        let mut dispatched = 0;
        for job in due {
            let job_id = job.id.clone();
            match self.dispatch(job).await {
                Ok(Some(_)) => dispatched += 1,
                Ok(None) => debug!("job {} already has a run in flight, skipping", job_id),
                Err(e) => warn!("failed to dispatch job {}: {}", job_id, e),
            }
        }
        dispatched
    }

    /// Manual trigger. Bypasses the due-time check but follows the identical
    /// pipeline. Returns the run id as soon as the run row exists; the
    /// pipeline continues in the background.
    pub async fn run_job_now(self: &Arc<Self>, org_id: &str, job_id: &str) -> Result<String> {
        let job = self
            .store
            .get_job(org_id, job_id)
            .await?
            .ok_or_else(|| anyhow!("job not found"))?;

        match self.dispatch(job).await? {
            Some(run_id) => Ok(run_id),
            None => Err(anyhow!("a run is already in progress for this job")),
        }
    }

    /// Create the run row (refusing if one is already in flight), then spawn
    /// the pipeline. The row exists in `running` status before any agent
    /// call is made; if row creation fails the attempt is abandoned with no
    /// partial state.
    async fn dispatch(self: &Arc<Self>, job: MonitoringJob) -> Result<Option<String>> {
        let Some(run) = self.store.start_run(&job).await? else {
            return Ok(None);
        };
        let run_id = run.id.clone();

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = engine.permits.clone().acquire_owned().await.ok();
            engine.execute(job, run).await;
        });
        Ok(Some(run_id))
    }

    async fn execute(&self, job: MonitoringJob, run: MonitoringJobRun) {
        debug!("job {} ({}) run {} starting", job.id, job.name, run.id);

        match self.execute_inner(&job, &run).await {
            Ok(outcome) => {
                match self
                    .store
                    .complete_run(
                        &run.id,
                        &outcome.summary,
                        &outcome.findings,
                        outcome.alert_sent,
                        outcome.alert_severity.as_deref(),
                    )
                    .await
                {
                    Ok(true) => info!("job {} run {} completed", job.id, run.id),
                    Ok(false) => warn!("run {} was already finalized", run.id),
                    // The agent run already happened and cannot be rolled
                    // back; recording is best-effort.
                    Err(e) => warn!("failed to record completion of run {}: {}", run.id, e),
                }
                if let Err(e) = self.store.update_job_after_run(&job.id, true).await {
                    warn!("post-run update failed for job {}: {}", job.id, e);
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("job {} run {} failed: {}", job.id, run.id, message);
                if let Err(e) = self.store.fail_run(&run.id, &message).await {
                    warn!("failed to record failure of run {}: {}", run.id, e);
                }
                if let Err(e) = self.store.update_job_after_run(&job.id, false).await {
                    warn!("post-run update failed for job {}: {}", job.id, e);
                }
            }
        }
    }

    async fn execute_inner(
        &self,
        job: &MonitoringJob,
        run: &MonitoringJobRun,
    ) -> Result<RunOutcome> {
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| anyhow!("agent service is not configured (OPSWATCH_AGENT_URL)"))?;

        let mut creds = self.loader.load(&job.org_id).await;
        // A job-level channel overrides the org-wide default from the vault.
        if let (Some(slack), Some(channel)) = (creds.slack.as_mut(), &job.slack_channel_id) {
            slack.channel_id = channel.clone();
        }
        let has_slack = creds.slack.is_some();

        let prompt = build_prompt(job.job_type, job.schedule_interval_minutes, &job.config);
        let input = build_run_input(
            &self.assistant_id,
            job,
            &run.id,
            &prompt,
            &creds,
            run.started_at,
        );

        let state = self.runner.run(agent.as_ref(), input).await?;
        let parsed = parse_agent_output(Some(&state));
        let decision = decide(&parsed.findings, job.notify_on, has_slack);

        Ok(RunOutcome {
            summary: parsed.summary,
            findings: parsed.findings,
            alert_sent: decision.alert_sent,
            alert_severity: decision.severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentError, RunHandle};
    use crate::core::store::types::{JobType, NewJob, NotifyOn, RunStatus};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            agent_url: None,
            assistant_id: "investigation".to_string(),
            github_app_id: None,
            github_private_key: None,
            db_path: std::path::PathBuf::from(":memory:"),
            api_host: "127.0.0.1".to_string(),
            api_port: 0,
            internal_token: "test-token".to_string(),
        }
    }

    async fn build_engine(
        agent: Option<Arc<dyn AgentApi>>,
        runner: AgentRunner,
    ) -> (Arc<SchedulerEngine>, Arc<Store>, Arc<SecretsVault>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vault = Arc::new(SecretsVault::new(store.get_db()));
        vault.initialize().await.unwrap();
        let config = test_config();
        let engine = Arc::new(SchedulerEngine {
            store: store.clone(),
            loader: CredentialLoader::new(vault.clone(), &config),
            agent,
            runner,
            assistant_id: config.assistant_id.clone(),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_RUNS)),
        });
        (engine, store, vault)
    }

    fn fast_runner() -> AgentRunner {
        AgentRunner {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(250),
        }
    }

    async fn seed_job(store: &Store, notify_on: NotifyOn) -> MonitoringJob {
        store
            .create_job(NewJob {
                org_id: "org-a".to_string(),
                name: "api health".to_string(),
                job_type: JobType::HealthCheck,
                schedule_interval_minutes: 15,
                enabled: true,
                config: serde_json::json!({"services": ["api"]}),
                notify_on,
                slack_channel_id: None,
            })
            .await
            .unwrap()
    }

    async fn wait_terminal(store: &Store, org: &str, run_id: &str) -> RunStatus {
        for _ in 0..400 {
            let run = store.get_run(org, run_id).await.unwrap().unwrap();
            if run.status != RunStatus::Running {
                return run.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {} never reached a terminal status", run_id);
    }

    /// Agent that immediately succeeds with a canned final message.
    struct HappyAgent {
        content: String,
    }

    #[async_trait]
    impl AgentApi for HappyAgent {
        async fn start_run(&self, _body: Value) -> Result<RunHandle, AgentError> {
            Ok(RunHandle {
                run_id: "r1".to_string(),
                thread_id: "t1".to_string(),
            })
        }
        async fn poll_run(&self, _run_id: &str) -> Result<String, AgentError> {
            Ok("success".to_string())
        }
        async fn fetch_state(&self, _thread_id: &str) -> Result<Value, AgentError> {
            Ok(serde_json::json!({
                "messages": [{"type": "ai", "content": self.content}]
            }))
        }
    }

    struct BrokenAgent;

    #[async_trait]
    impl AgentApi for BrokenAgent {
        async fn start_run(&self, _body: Value) -> Result<RunHandle, AgentError> {
            Err(AgentError::Protocol(
                "POST /runs returned 503: unavailable".to_string(),
            ))
        }
        async fn poll_run(&self, _run_id: &str) -> Result<String, AgentError> {
            unreachable!()
        }
        async fn fetch_state(&self, _thread_id: &str) -> Result<Value, AgentError> {
            unreachable!()
        }
    }

    struct NeverDoneAgent;

    #[async_trait]
    impl AgentApi for NeverDoneAgent {
        async fn start_run(&self, _body: Value) -> Result<RunHandle, AgentError> {
            Ok(RunHandle {
                run_id: "r1".to_string(),
                thread_id: "t1".to_string(),
            })
        }
        async fn poll_run(&self, _run_id: &str) -> Result<String, AgentError> {
            Ok("running".to_string())
        }
        async fn fetch_state(&self, _thread_id: &str) -> Result<Value, AgentError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn successful_pipeline_records_completed_run_with_alert() {
        let content = "Check done.\n```json\n{\"summary\":\"1 error found\",\"findings\":\
                       [{\"type\":\"error\",\"title\":\"5xx spike on api\"}]}\n```";
        let agent: Arc<dyn AgentApi> = Arc::new(HappyAgent {
            content: content.to_string(),
        });
        let (engine, store, vault) = build_engine(Some(agent), fast_runner()).await;

        vault.store_secret("org-a", "slack", "bot_token", "xoxb-1").await.unwrap();
        vault.store_secret("org-a", "slack", "channel_id", "C042").await.unwrap();

        let job = seed_job(&store, NotifyOn::Issues).await;
        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();

        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Completed);
        let run = store.get_run("org-a", &run_id).await.unwrap().unwrap();
        assert_eq!(run.summary, "1 error found");
        assert_eq!(run.findings.len(), 1);
        assert!(run.alert_sent);
        assert_eq!(run.alert_severity.as_deref(), Some("error"));

        // Job bookkeeping: counter reset, schedule recomputed.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(job.consecutive_failures, 0);
        assert!(job.last_run_at.is_some());
        assert!(job.next_run_at.is_some());
    }

    #[tokio::test]
    async fn clean_run_without_slack_does_not_alert() {
        let content = "```json\n{\"summary\":\"All clear\",\"findings\":[]}\n```";
        let agent: Arc<dyn AgentApi> = Arc::new(HappyAgent {
            content: content.to_string(),
        });
        let (engine, store, _vault) = build_engine(Some(agent), fast_runner()).await;

        let job = seed_job(&store, NotifyOn::Issues).await;
        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();

        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Completed);
        let run = store.get_run("org-a", &run_id).await.unwrap().unwrap();
        assert_eq!(run.summary, "All clear");
        assert!(!run.alert_sent);
        assert_eq!(run.alert_severity, None);
    }

    #[tokio::test]
    async fn agent_failure_records_failed_run_and_increments_counter() {
        let (engine, store, _vault) = build_engine(Some(Arc::new(BrokenAgent)), fast_runner()).await;
        let job = seed_job(&store, NotifyOn::Issues).await;

        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();
        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Failed);

        let run = store.get_run("org-a", &run_id).await.unwrap().unwrap();
        assert!(run.error_message.unwrap().contains("503"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(job.consecutive_failures, 1);
        assert!(job.next_run_at.is_some()); // schedule kept despite failure
    }

    #[tokio::test]
    async fn poll_cap_exceeded_records_timeout_failure() {
        let (engine, store, _vault) = build_engine(Some(Arc::new(NeverDoneAgent)), fast_runner()).await;
        let job = seed_job(&store, NotifyOn::Issues).await;

        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();
        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Failed);

        let run = store.get_run("org-a", &run_id).await.unwrap().unwrap();
        assert!(run.error_message.unwrap().contains("timed out"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(job.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn overlapping_manual_trigger_is_rejected() {
        let runner = AgentRunner {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
        };
        let (engine, store, _vault) = build_engine(Some(Arc::new(NeverDoneAgent)), runner).await;
        let job = seed_job(&store, NotifyOn::Issues).await;

        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();
        let second = engine.run_job_now("org-a", &job.id).await;
        assert!(second.unwrap_err().to_string().contains("already in progress"));

        // After the first run times out, triggering works again.
        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Failed);
        assert!(engine.run_job_now("org-a", &job.id).await.is_ok());
    }

    #[tokio::test]
    async fn missing_agent_configuration_fails_the_run_not_the_process() {
        let (engine, store, _vault) = build_engine(None, fast_runner()).await;
        let job = seed_job(&store, NotifyOn::Issues).await;

        let run_id = engine.run_job_now("org-a", &job.id).await.unwrap();
        assert_eq!(wait_terminal(&store, "org-a", &run_id).await, RunStatus::Failed);
        let run = store.get_run("org-a", &run_id).await.unwrap().unwrap();
        assert!(run.error_message.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn tick_dispatches_due_jobs_without_waiting_for_them() {
        // Agent runs stay in flight until the (short) poll cap expires, so
        // the second tick observes both jobs as already running.
        let (engine, store, _vault) = build_engine(Some(Arc::new(NeverDoneAgent)), fast_runner()).await;

        let job_a = seed_job(&store, NotifyOn::Never).await;
        let job_b = store
            .create_job(NewJob {
                org_id: "org-b".to_string(),
                name: "deploy watch".to_string(),
                job_type: JobType::DeploymentWatcher,
                schedule_interval_minutes: 30,
                enabled: true,
                config: serde_json::json!({}),
                notify_on: NotifyOn::Always,
                slack_channel_id: None,
            })
            .await
            .unwrap();

        // Force both jobs due by rewinding next_run_at.
        for job in [&job_a, &job_b] {
            let db = store.get_db();
            let db = db.lock().await;
            db.execute(
                "UPDATE monitoring_jobs SET next_run_at = 1 WHERE id = ?1",
                rusqlite::params![job.id],
            )
            .unwrap();
        }

        assert_eq!(engine.tick().await, 2);
        // Re-ticking while both runs are in flight dispatches nothing.
        assert_eq!(engine.tick().await, 0);

        for (org, job) in [("org-a", &job_a), ("org-b", &job_b)] {
            let runs = loop {
                let runs = store.list_runs(org, &job.id).await.unwrap();
                if !runs.is_empty() {
                    break runs;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            };
            wait_terminal(&store, org, &runs[0].id).await;
        }
    }

    #[tokio::test]
    async fn manual_trigger_on_unknown_job_is_an_error() {
        let (engine, _store, _vault) = build_engine(None, fast_runner()).await;
        let err = engine.run_job_now("org-a", "nope").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
