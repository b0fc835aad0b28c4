use anyhow::{Result, anyhow};
use rusqlite::{Row, params};

use super::types::{JobType, JobUpdate, MonitoringJob, NewJob, NotifyOn};
use super::{MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES, Store, now_ms};

fn bad_enum(idx: usize, val: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown value '{}'", val).into(),
    )
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<MonitoringJob> {
    let job_type: String = row.get(3)?;
    let config: String = row.get(6)?;
    let notify_on: String = row.get(7)?;
    Ok(MonitoringJob {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        job_type: JobType::parse(&job_type).ok_or_else(|| bad_enum(3, &job_type))?,
        schedule_interval_minutes: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        config: serde_json::from_str(&config).unwrap_or_else(|_| serde_json::json!({})),
        notify_on: NotifyOn::parse(&notify_on).ok_or_else(|| bad_enum(7, &notify_on))?,
        slack_channel_id: row.get(8)?,
        last_run_at: row.get(9)?,
        next_run_at: row.get(10)?,
        consecutive_failures: row.get(11)?,
        created_at: row.get(12)?,
    })
}

const JOB_COLUMNS: &str = "id, org_id, name, job_type, schedule_interval_minutes, enabled, config, \
     notify_on, slack_channel_id, last_run_at, next_run_at, consecutive_failures, created_at";

fn validate_interval(minutes: i64) -> Result<()> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(anyhow!(
            "schedule_interval_minutes must be between {} and {}, got {}",
            MIN_INTERVAL_MINUTES,
            MAX_INTERVAL_MINUTES,
            minutes
        ));
    }
    Ok(())
}

fn interval_ms(minutes: i64) -> i64 {
    minutes * 60_000
}

impl Store {
    pub async fn create_job(&self, new: NewJob) -> Result<MonitoringJob> {
        validate_interval(new.schedule_interval_minutes)?;
        if new.name.trim().is_empty() {
            return Err(anyhow!("job name must not be empty"));
        }
        if !new.config.is_object() {
            return Err(anyhow!("job config must be a JSON object"));
        }

        let now = now_ms();
        let next_run_at = new
            .enabled
            .then(|| now + interval_ms(new.schedule_interval_minutes));

        let job = MonitoringJob {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: new.org_id,
            name: new.name.trim().to_string(),
            job_type: new.job_type,
            schedule_interval_minutes: new.schedule_interval_minutes,
            enabled: new.enabled,
            config: new.config,
            notify_on: new.notify_on,
            slack_channel_id: new.slack_channel_id,
            last_run_at: None,
            next_run_at,
            consecutive_failures: 0,
            created_at: now,
        };

        let db = self.conn().await;
        db.execute(
            "INSERT INTO monitoring_jobs (id, org_id, name, job_type, schedule_interval_minutes, \
             enabled, config, notify_on, slack_channel_id, last_run_at, next_run_at, \
             consecutive_failures, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.org_id,
                job.name,
                job.job_type.as_str(),
                job.schedule_interval_minutes,
                job.enabled as i64,
                job.config.to_string(),
                job.notify_on.as_str(),
                job.slack_channel_id,
                job.last_run_at,
                job.next_run_at,
                job.consecutive_failures,
                job.created_at,
            ],
        )?;
        Ok(job)
    }

    pub async fn get_job(&self, org_id: &str, job_id: &str) -> Result<Option<MonitoringJob>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM monitoring_jobs WHERE id = ?1 AND org_id = ?2",
            JOB_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![job_id, org_id], map_job)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self, org_id: &str) -> Result<Vec<MonitoringJob>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM monitoring_jobs WHERE org_id = ?1 ORDER BY created_at",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![org_id], map_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    pub async fn update_job(
        &self,
        org_id: &str,
        job_id: &str,
        update: JobUpdate,
    ) -> Result<Option<MonitoringJob>> {
        let Some(mut job) = self.get_job(org_id, job_id).await? else {
            return Ok(None);
        };

        let was_enabled = job.enabled;
        let old_interval = job.schedule_interval_minutes;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(anyhow!("job name must not be empty"));
            }
            job.name = name.trim().to_string();
        }
        if let Some(minutes) = update.schedule_interval_minutes {
            validate_interval(minutes)?;
            job.schedule_interval_minutes = minutes;
        }
        if let Some(enabled) = update.enabled {
            job.enabled = enabled;
        }
        if let Some(config) = update.config {
            if !config.is_object() {
                return Err(anyhow!("job config must be a JSON object"));
            }
            job.config = config;
        }
        if let Some(notify_on) = update.notify_on {
            job.notify_on = notify_on;
        }
        if let Some(channel) = update.slack_channel_id {
            job.slack_channel_id = channel;
        }

        // next_run_at tracks the enabled flag: cleared when disabled, set
        // when enabling or when the cadence changes.
        job.next_run_at = if !job.enabled {
            None
        } else if !was_enabled
            || job.next_run_at.is_none()
            || job.schedule_interval_minutes != old_interval
        {
            Some(now_ms() + interval_ms(job.schedule_interval_minutes))
        } else {
            job.next_run_at
        };

        let db = self.conn().await;
        db.execute(
            "UPDATE monitoring_jobs SET name = ?1, schedule_interval_minutes = ?2, enabled = ?3, \
             config = ?4, notify_on = ?5, slack_channel_id = ?6, next_run_at = ?7 \
             WHERE id = ?8 AND org_id = ?9",
            params![
                job.name,
                job.schedule_interval_minutes,
                job.enabled as i64,
                job.config.to_string(),
                job.notify_on.as_str(),
                job.slack_channel_id,
                job.next_run_at,
                job.id,
                job.org_id,
            ],
        )?;
        Ok(Some(job))
    }

    /// Delete a job and all of its runs.
    pub async fn delete_job(&self, org_id: &str, job_id: &str) -> Result<bool> {
        let db = self.conn().await;
        db.execute(
            "DELETE FROM monitoring_job_runs WHERE job_id = ?1 AND org_id = ?2",
            params![job_id, org_id],
        )?;
        let deleted = db.execute(
            "DELETE FROM monitoring_jobs WHERE id = ?1 AND org_id = ?2",
            params![job_id, org_id],
        )?;
        Ok(deleted > 0)
    }

    /// Cross-tenant scan for jobs that are enabled and past due.
    pub async fn get_due_jobs(&self, now: i64) -> Result<Vec<MonitoringJob>> {
        let db = self.conn().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM monitoring_jobs \
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![now], map_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Post-run bookkeeping on the job row. Success resets the failure
    /// counter; failure increments it. Either way the schedule is recomputed
    /// while the job stays enabled, so a failing job keeps its cadence.
    pub async fn update_job_after_run(&self, job_id: &str, success: bool) -> Result<()> {
        let now = now_ms();
        let db = self.conn().await;

        let mut stmt = db.prepare(
            "SELECT enabled, schedule_interval_minutes FROM monitoring_jobs WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![job_id])?;
        let Some(row) = rows.next()? else {
            // Job deleted while its run was in flight; nothing to update.
            return Ok(());
        };
        let enabled: i64 = row.get(0)?;
        let minutes: i64 = row.get(1)?;
        drop(rows);
        drop(stmt);

        let next_run_at = (enabled != 0).then(|| now + interval_ms(minutes));
        if success {
            db.execute(
                "UPDATE monitoring_jobs SET last_run_at = ?1, next_run_at = ?2, \
                 consecutive_failures = 0 WHERE id = ?3",
                params![now, next_run_at, job_id],
            )?;
        } else {
            db.execute(
                "UPDATE monitoring_jobs SET last_run_at = ?1, next_run_at = ?2, \
                 consecutive_failures = consecutive_failures + 1 WHERE id = ?3",
                params![now, next_run_at, job_id],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::{JobType, NotifyOn};

    fn new_job(org: &str, minutes: i64, enabled: bool) -> NewJob {
        NewJob {
            org_id: org.to_string(),
            name: "api health".to_string(),
            job_type: JobType::HealthCheck,
            schedule_interval_minutes: minutes,
            enabled,
            config: serde_json::json!({"services": ["api"]}),
            notify_on: NotifyOn::Issues,
            slack_channel_id: None,
        }
    }

    #[tokio::test]
    async fn create_sets_next_run_only_when_enabled() {
        let store = Store::open_in_memory().unwrap();

        let enabled = store.create_job(new_job("org-a", 15, true)).await.unwrap();
        assert!(enabled.next_run_at.is_some());
        assert!(enabled.next_run_at.unwrap() > enabled.created_at);

        let disabled = store.create_job(new_job("org-a", 15, false)).await.unwrap();
        assert_eq!(disabled.next_run_at, None);
    }

    #[tokio::test]
    async fn interval_bounds_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.create_job(new_job("org-a", 4, true)).await.is_err());
        assert!(store.create_job(new_job("org-a", 1441, true)).await.is_err());
        assert!(store.create_job(new_job("org-a", 5, true)).await.is_ok());
        assert!(store.create_job(new_job("org-a", 1440, true)).await.is_ok());
    }

    #[tokio::test]
    async fn disabling_clears_next_run_and_enabling_restores_it() {
        let store = Store::open_in_memory().unwrap();
        let job = store.create_job(new_job("org-a", 30, true)).await.unwrap();

        let update = JobUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        let job = store
            .update_job("org-a", &job.id, update)
            .await
            .unwrap()
            .unwrap();
        assert!(!job.enabled);
        assert_eq!(job.next_run_at, None);

        let update = JobUpdate {
            enabled: Some(true),
            ..Default::default()
        };
        let job = store
            .update_job("org-a", &job.id, update)
            .await
            .unwrap()
            .unwrap();
        assert!(job.enabled);
        assert!(job.next_run_at.is_some());
    }

    #[tokio::test]
    async fn jobs_are_tenant_scoped() {
        let store = Store::open_in_memory().unwrap();
        let job = store.create_job(new_job("org-a", 15, true)).await.unwrap();

        assert!(store.get_job("org-b", &job.id).await.unwrap().is_none());
        assert!(store.get_job("org-a", &job.id).await.unwrap().is_some());
        assert!(!store.delete_job("org-b", &job.id).await.unwrap());
        assert!(store.delete_job("org-a", &job.id).await.unwrap());
    }

    #[tokio::test]
    async fn due_scan_picks_only_enabled_past_due_jobs() {
        let store = Store::open_in_memory().unwrap();
        let first = store.create_job(new_job("org-a", 15, true)).await.unwrap();
        store.create_job(new_job("org-b", 15, false)).await.unwrap();
        let second = store.create_job(new_job("org-c", 15, true)).await.unwrap();

        let horizon = first.next_run_at.unwrap().max(second.next_run_at.unwrap());
        let found = store.get_due_jobs(horizon).await.unwrap();
        assert!(found.iter().any(|j| j.id == first.id));
        assert!(found.iter().any(|j| j.id == second.id));
        assert_eq!(found.len(), 2); // the disabled job never shows up

        assert_eq!(store.get_due_jobs(0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn after_run_bookkeeping_tracks_failures_and_schedule() {
        let store = Store::open_in_memory().unwrap();
        let job = store.create_job(new_job("org-a", 15, true)).await.unwrap();

        store.update_job_after_run(&job.id, false).await.unwrap();
        store.update_job_after_run(&job.id, false).await.unwrap();
        let j = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(j.consecutive_failures, 2);
        assert!(j.next_run_at.is_some());
        assert!(j.last_run_at.is_some());

        store.update_job_after_run(&job.id, true).await.unwrap();
        let j = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(j.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn after_run_on_disabled_job_keeps_next_run_clear() {
        let store = Store::open_in_memory().unwrap();
        let job = store.create_job(new_job("org-a", 15, false)).await.unwrap();

        store.update_job_after_run(&job.id, true).await.unwrap();
        let j = store.get_job("org-a", &job.id).await.unwrap().unwrap();
        assert_eq!(j.next_run_at, None);
    }
}
