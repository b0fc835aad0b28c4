use anyhow::Result;
use rusqlite::{Row, params};

use super::types::{Finding, MonitoringJob, MonitoringJobRun, RunStatus};
use super::{Store, now_ms};

fn map_run(row: &Row<'_>) -> rusqlite::Result<MonitoringJobRun> {
    let status: String = row.get(3)?;
    let findings: String = row.get(5)?;
    Ok(MonitoringJobRun {
        id: row.get(0)?,
        job_id: row.get(1)?,
        org_id: row.get(2)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        summary: row.get(4)?,
        findings: serde_json::from_str(&findings).unwrap_or_default(),
        error_message: row.get(6)?,
        alert_sent: row.get::<_, i64>(7)? != 0,
        alert_severity: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        duration_ms: row.get(11)?,
    })
}

const RUN_COLUMNS: &str = "id, job_id, org_id, status, summary, findings, error_message, \
     alert_sent, alert_severity, started_at, completed_at, duration_ms";

impl Store {
    /// Create the run row for one execution attempt, in `running` status.
    /// Must happen before any agent call. Returns None when the job already
    /// has a run in flight (the check and insert share one lock, so two
    /// concurrent triggers cannot both pass).
    pub async fn start_run(&self, job: &MonitoringJob) -> Result<Option<MonitoringJobRun>> {
        let db = self.conn().await;

        let active: i64 = db.query_row(
            "SELECT COUNT(*) FROM monitoring_job_runs WHERE job_id = ?1 AND status = 'running'",
            params![job.id],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Ok(None);
        }

        let run = MonitoringJobRun {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            org_id: job.org_id.clone(),
            status: RunStatus::Running,
            summary: String::new(),
            findings: Vec::new(),
            error_message: None,
            alert_sent: false,
            alert_severity: None,
            started_at: now_ms(),
            completed_at: None,
            duration_ms: None,
        };
        db.execute(
            "INSERT INTO monitoring_job_runs (id, job_id, org_id, status, summary, findings, \
             started_at) VALUES (?1, ?2, ?3, 'running', '', '[]', ?4)",
            params![run.id, run.job_id, run.org_id, run.started_at],
        )?;
        Ok(Some(run))
    }

    /// Finalize a run as completed. The WHERE clause only matches rows still
    /// in `running`, so a second finalization is a no-op (returns false).
    pub async fn complete_run(
        &self,
        run_id: &str,
        summary: &str,
        findings: &[Finding],
        alert_sent: bool,
        alert_severity: Option<&str>,
    ) -> Result<bool> {
        let now = now_ms();
        let findings_json = serde_json::to_string(findings)?;
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE monitoring_job_runs SET status = 'completed', summary = ?1, findings = ?2, \
             alert_sent = ?3, alert_severity = ?4, completed_at = ?5, \
             duration_ms = ?5 - started_at \
             WHERE id = ?6 AND status = 'running'",
            params![
                summary,
                findings_json,
                alert_sent as i64,
                alert_severity,
                now,
                run_id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Finalize a run as failed with the captured error message. No-op on
    /// already-terminal rows, same as `complete_run`.
    pub async fn fail_run(&self, run_id: &str, error_message: &str) -> Result<bool> {
        let now = now_ms();
        let db = self.conn().await;
        let changed = db.execute(
            "UPDATE monitoring_job_runs SET status = 'failed', error_message = ?1, \
             completed_at = ?2, duration_ms = ?2 - started_at \
             WHERE id = ?3 AND status = 'running'",
            params![error_message, now, run_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn get_run(&self, org_id: &str, run_id: &str) -> Result<Option<MonitoringJobRun>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM monitoring_job_runs WHERE id = ?1 AND org_id = ?2",
            RUN_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![run_id, org_id], map_run)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_runs(&self, org_id: &str, job_id: &str) -> Result<Vec<MonitoringJobRun>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM monitoring_job_runs WHERE job_id = ?1 AND org_id = ?2 \
             ORDER BY started_at DESC",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id, org_id], map_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::{FindingType, JobType, NewJob, NotifyOn};

    async fn seed_job(store: &Store) -> MonitoringJob {
        store
            .create_job(NewJob {
                org_id: "org-a".to_string(),
                name: "error scan".to_string(),
                job_type: JobType::ErrorScanner,
                schedule_interval_minutes: 30,
                enabled: true,
                config: serde_json::json!({}),
                notify_on: NotifyOn::Issues,
                slack_channel_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn run_starts_in_running_status() {
        let store = Store::open_in_memory().unwrap();
        let job = seed_job(&store).await;

        let run = store.start_run(&job).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let stored = store.get_run("org-a", &run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(stored.completed_at, None);
    }

    #[tokio::test]
    async fn second_start_is_refused_while_running() {
        let store = Store::open_in_memory().unwrap();
        let job = seed_job(&store).await;

        let first = store.start_run(&job).await.unwrap();
        assert!(first.is_some());
        let second = store.start_run(&job).await.unwrap();
        assert!(second.is_none());

        // Once the first run is terminal, a new attempt is allowed again.
        store
            .fail_run(&first.unwrap().id, "boom")
            .await
            .unwrap();
        assert!(store.start_run(&job).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn terminal_transition_happens_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let job = seed_job(&store).await;
        let run = store.start_run(&job).await.unwrap().unwrap();

        let findings = vec![Finding {
            kind: FindingType::Warning,
            title: "p95 latency above baseline".to_string(),
            description: None,
            metric: Some("latency.p95".to_string()),
            value: Some("812ms".to_string()),
        }];
        assert!(
            store
                .complete_run(&run.id, "1 warning", &findings, true, Some("warning"))
                .await
                .unwrap()
        );

        // Re-finalizing in either direction is a no-op.
        assert!(!store.fail_run(&run.id, "late failure").await.unwrap());
        assert!(
            !store
                .complete_run(&run.id, "again", &[], false, None)
                .await
                .unwrap()
        );

        let stored = store.get_run("org-a", &run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.summary, "1 warning");
        assert_eq!(stored.findings.len(), 1);
        assert!(stored.alert_sent);
        assert_eq!(stored.alert_severity.as_deref(), Some("warning"));
        assert!(stored.duration_ms.is_some());
    }

    #[tokio::test]
    async fn failed_run_records_error_message() {
        let store = Store::open_in_memory().unwrap();
        let job = seed_job(&store).await;
        let run = store.start_run(&job).await.unwrap().unwrap();

        assert!(store.fail_run(&run.id, "agent run timed out").await.unwrap());
        let stored = store.get_run("org-a", &run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("agent run timed out"));
    }

    #[tokio::test]
    async fn runs_are_listed_newest_first_and_tenant_scoped() {
        let store = Store::open_in_memory().unwrap();
        let job = seed_job(&store).await;

        let r1 = store.start_run(&job).await.unwrap().unwrap();
        store.complete_run(&r1.id, "ok", &[], false, None).await.unwrap();
        let r2 = store.start_run(&job).await.unwrap().unwrap();
        store.fail_run(&r2.id, "nope").await.unwrap();

        let runs = store.list_runs("org-a", &job.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].started_at >= runs[1].started_at);

        assert!(store.list_runs("org-b", &job.id).await.unwrap().is_empty());
        assert!(store.get_run("org-b", &r1.id).await.unwrap().is_none());
    }
}
