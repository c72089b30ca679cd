//! Background jobs: the fixed alert-evaluation sweep and the
//! interval-driven scrape.
//!
//! The alert job runs every minute and is never rescheduled. The scrape
//! job's interval comes from the stored configuration and can be swapped
//! at runtime by removing the job and registering a replacement.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::DEFAULT_SCRAPE_INTERVAL_MINUTES;
use crate::events::EventBus;
use crate::repository::{AlertRepository, RepositoryError, ScrapeConfigRepository};
use crate::services::{evaluate_alerts, ScrapeService};

const ALERT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job scheduler error: {0}")]
    Jobs(#[from] JobSchedulerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Everything the background jobs need, shared across invocations.
pub struct SchedulerContext {
    pub scrape: Arc<ScrapeService>,
    pub alert_repo: Arc<AlertRepository>,
    pub config_repo: Arc<ScrapeConfigRepository>,
    pub events: EventBus,
}

pub struct Scheduler {
    inner: JobScheduler,
    ctx: Arc<SchedulerContext>,
    alert_job: Uuid,
    scrape_job: Mutex<Uuid>,
}

impl Scheduler {
    /// Register both jobs and start ticking. The scrape interval is read
    /// from the stored configuration, falling back to the default.
    pub async fn start(ctx: SchedulerContext) -> Result<Self> {
        let ctx = Arc::new(ctx);
        let inner = JobScheduler::new().await?;

        let alert_job = inner.add(make_alert_job(ctx.clone())?).await?;

        let minutes = ctx
            .config_repo
            .get()?
            .map(|config| config.scrape_interval_minutes)
            .unwrap_or(DEFAULT_SCRAPE_INTERVAL_MINUTES);
        let scrape_job = inner.add(make_scrape_job(ctx.clone(), minutes)?).await?;

        inner.start().await?;
        info!(scrape_interval_minutes = minutes, "scheduler started");

        Ok(Self {
            inner,
            ctx,
            alert_job,
            scrape_job: Mutex::new(scrape_job),
        })
    }

    /// Replace the scrape job with one on a new interval. The alert job is
    /// untouched.
    pub async fn reschedule_scrape(&self, minutes: u32) -> Result<()> {
        let mut current = self.scrape_job.lock().await;
        self.inner.remove(&current).await?;
        let replacement = self
            .inner
            .add(make_scrape_job(self.ctx.clone(), minutes)?)
            .await?;
        *current = replacement;
        info!(scrape_interval_minutes = minutes, "scrape job rescheduled");
        Ok(())
    }

    pub fn alert_job_id(&self) -> Uuid {
        self.alert_job
    }

    pub async fn scrape_job_id(&self) -> Uuid {
        *self.scrape_job.lock().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.clone();
        inner.shutdown().await?;
        Ok(())
    }
}

fn make_alert_job(ctx: Arc<SchedulerContext>) -> Result<Job> {
    let job = Job::new_repeated_async(ALERT_SWEEP_INTERVAL, move |_uuid, _lock| {
        let ctx = ctx.clone();
        Box::pin(async move {
            // Job errors are logged, never propagated: one bad tick must
            // not stop the schedule.
            match evaluate_alerts(&ctx.alert_repo, &ctx.events, Utc::now()) {
                Ok(0) => {}
                Ok(flipped) => debug!(flipped, "alert sweep applied changes"),
                Err(e) => error!(error = %e, "alert evaluation failed"),
            }
        })
    })?;
    Ok(job)
}

fn make_scrape_job(ctx: Arc<SchedulerContext>, minutes: u32) -> Result<Job> {
    let minutes = minutes.max(1);
    let interval = Duration::from_secs(u64::from(minutes) * 60);
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let ctx = ctx.clone();
        Box::pin(async move {
            match ctx.scrape.run().await {
                Ok(outcome) => debug!(?outcome, "scheduled scrape finished"),
                Err(e) => error!(error = %e, "scheduled scrape failed"),
            }
        })
    })?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ScrapeDataRepository;
    use crate::vault::Vault;

    async fn scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let events = EventBus::new();
        let scrape = ScrapeService::new(
            ScrapeConfigRepository::new(&db).unwrap(),
            ScrapeDataRepository::new(&db).unwrap(),
            Vault::from_secret("test-secret"),
            events.clone(),
        );
        let ctx = SchedulerContext {
            scrape: Arc::new(scrape),
            alert_repo: Arc::new(AlertRepository::new(&db).unwrap()),
            config_repo: Arc::new(ScrapeConfigRepository::new(&db).unwrap()),
            events,
        };
        let scheduler = Scheduler::start(ctx).await.unwrap();
        (dir, scheduler)
    }

    #[tokio::test]
    async fn jobs_are_distinct_on_start() {
        let (_dir, scheduler) = scheduler().await;
        assert_ne!(scheduler.alert_job_id(), scheduler.scrape_job_id().await);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reschedule_replaces_only_the_scrape_job() {
        let (_dir, scheduler) = scheduler().await;
        let alert_before = scheduler.alert_job_id();
        let scrape_before = scheduler.scrape_job_id().await;

        scheduler.reschedule_scrape(5).await.unwrap();

        assert_ne!(scheduler.scrape_job_id().await, scrape_before);
        assert_eq!(scheduler.alert_job_id(), alert_before);
        scheduler.shutdown().await.unwrap();
    }
}
