use serde::{Deserialize, Serialize};

/// The built-in monitoring job flavors. Each maps to a distinct agent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DeploymentWatcher,
    HealthCheck,
    ErrorScanner,
    BaselineBuilder,
    Custom,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DeploymentWatcher => "deployment_watcher",
            JobType::HealthCheck => "health_check",
            JobType::ErrorScanner => "error_scanner",
            JobType::BaselineBuilder => "baseline_builder",
            JobType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deployment_watcher" => Some(JobType::DeploymentWatcher),
            "health_check" => Some(JobType::HealthCheck),
            "error_scanner" => Some(JobType::ErrorScanner),
            "baseline_builder" => Some(JobType::BaselineBuilder),
            "custom" => Some(JobType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    Always,
    Issues,
    Never,
}

impl NotifyOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyOn::Always => "always",
            NotifyOn::Issues => "issues",
            NotifyOn::Never => "never",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(NotifyOn::Always),
            "issues" => Some(NotifyOn::Issues),
            "never" => Some(NotifyOn::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Info,
    Warning,
    Error,
    Success,
}

/// One structured observation from an agent run. Produced by the agent,
/// schema-validated on ingestion; entries that fail validation are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: FindingType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A tenant-owned schedule definition, persisted in `monitoring_jobs`.
///
/// Invariant: `next_run_at` is Some iff `enabled` is true.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringJob {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub job_type: JobType,
    pub schedule_interval_minutes: i64,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub notify_on: NotifyOn,
    pub slack_channel_id: Option<String>,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub consecutive_failures: i64,
    pub created_at: i64,
}

/// One execution attempt. Created in `running` status before the agent is
/// invoked; transitions exactly once to `completed` or `failed`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringJobRun {
    pub id: String,
    pub job_id: String,
    pub org_id: String,
    pub status: RunStatus,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub error_message: Option<String>,
    pub alert_sent: bool,
    pub alert_severity: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// Fields accepted when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub org_id: String,
    pub name: String,
    pub job_type: JobType,
    pub schedule_interval_minutes: i64,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub notify_on: NotifyOn,
    pub slack_channel_id: Option<String>,
}

/// Partial update for an existing job. `slack_channel_id` uses a nested
/// Option so "clear the channel" and "leave unchanged" stay distinct.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub schedule_interval_minutes: Option<i64>,
    pub enabled: Option<bool>,
    pub config: Option<serde_json::Value>,
    pub notify_on: Option<NotifyOn>,
    pub slack_channel_id: Option<Option<String>>,
}
