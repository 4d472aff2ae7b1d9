use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backup::{BackupOptions, BackupService};
use crate::errors::BackupError;
use crate::models::job::{parse_schedule, validate_new_job};
use crate::models::{JobStatus, JobView, NewScheduledJob, NextRun, ScheduledJob};
use crate::storage::JobStore;

/// Longest single sleep of a trigger; it re-reads the clock after each one.
const MAX_SLEEP: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Backed by a std lock so it can be
/// read from sync and async code alike.
pub struct FakeClock {
    time: std::sync::RwLock<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: std::sync::RwLock::new(time),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.time.write().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// compute_next_run
// ---------------------------------------------------------------------------

/// Next fire strictly after `after`, evaluating `schedule` in `timezone`
/// (UTC when `None`). `after` is truncated to whole seconds first, so a
/// reading a few milliseconds before a boundary still yields that boundary.
pub fn compute_next_run(
    schedule: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let cron = parse_schedule(schedule)?;
    let after = after.trunc_subsecs(0);

    let next = match timezone {
        Some(tz_name) => {
            let tz: chrono_tz::Tz = tz_name
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", tz_name, e))?;
            cron.find_next_occurrence(&after.with_timezone(&tz), false)
                .map_err(|e| anyhow::anyhow!("Cron next occurrence error: {}", e))?
                .with_timezone(&Utc)
        }
        None => cron
            .find_next_occurrence(&after, false)
            .map_err(|e| anyhow::anyhow!("Cron next occurrence error: {}", e))?,
    };
    Ok(next)
}

// ---------------------------------------------------------------------------
// SchedulerEngine
// ---------------------------------------------------------------------------

/// Everything one live trigger needs, shared with the fires it spawns.
struct TriggerContext {
    job_id: i64,
    job_name: String,
    schedule: String,
    timezone: Option<String>,
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<BackupService>,
    clock: Arc<dyn Clock>,
}

/// Owns one live trigger per enabled job.
///
/// The trigger registry is the only shared mutable state. Its lock is held
/// for map operations only; backups run on their own tasks.
pub struct SchedulerEngine {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<BackupService>,
    clock: Arc<dyn Clock>,
    timezone: Option<String>,
    triggers: Mutex<HashMap<i64, JoinHandle<()>>>,
    /// `true` once the engine has been stopped.
    shutdown: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<BackupService>,
        clock: Arc<dyn Clock>,
        timezone: Option<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs,
            pipeline,
            clock,
            timezone,
            triggers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<i64, JoinHandle<()>>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a trigger for every enabled job. Individual failures are
    /// logged and skipped. Returns how many triggers were installed.
    pub async fn start(&self) -> usize {
        self.shutdown.send_replace(false);

        let jobs = match self.jobs.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to load scheduled jobs: {:#}", e);
                return 0;
            }
        };

        let mut installed = 0;
        for job in jobs.iter().filter(|j| j.enabled) {
            match self.install_trigger(job) {
                Ok(()) => installed += 1,
                Err(e) => tracing::error!(
                    "Failed to install trigger for job '{}' ({}): {}",
                    job.name,
                    job.id,
                    e
                ),
            }
        }

        tracing::info!("Scheduler started with {} active job(s)", installed);
        installed
    }

    /// Stop accepting fires and tear down every trigger. Backups already
    /// running are left to finish; see [`BackupService::drain`]. Safe to
    /// call more than once.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);

        let mut registry = self.registry();
        let count = registry.len();
        for (_, handle) in registry.drain() {
            handle.abort();
        }
        drop(registry);

        if count > 0 {
            tracing::info!("Scheduler stopped, {} trigger(s) removed", count);
        }
    }

    pub async fn create_job(&self, new: NewScheduledJob) -> Result<ScheduledJob, BackupError> {
        validate_new_job(&new)?;

        let job = self
            .jobs
            .insert_job(new)
            .await
            .map_err(BackupError::ledger)?;
        tracing::info!("Created job '{}' ({}) with schedule '{}'", job.name, job.id, job.schedule);

        if job.enabled {
            if let Err(e) = self.install_trigger(&job) {
                tracing::error!("Failed to install trigger for job '{}' ({}): {}", job.name, job.id, e);
            }
        }
        Ok(job)
    }

    /// Flip `enabled`, persist it and rebuild the trigger. Returns the new state.
    pub async fn toggle_job(&self, id: i64) -> Result<bool, BackupError> {
        let job = self.find_job(id).await?;
        let enabled = !job.enabled;

        self.jobs
            .set_enabled(id, enabled)
            .await
            .map_err(BackupError::ledger)?;
        self.remove_trigger(id);

        if enabled {
            // the stored schedule is authoritative, not what we read above
            let fresh = self.find_job(id).await?;
            if let Err(e) = self.install_trigger(&fresh) {
                tracing::error!("Failed to install trigger for job '{}' ({}): {}", fresh.name, id, e);
            }
        }

        tracing::info!("Job '{}' ({}) {}", job.name, id, if enabled { "enabled" } else { "paused" });
        Ok(enabled)
    }

    /// Tear down the trigger, then delete the row. The teardown stands even
    /// if the delete fails.
    pub async fn delete_job(&self, id: i64) -> Result<(), BackupError> {
        self.remove_trigger(id);
        self.jobs
            .delete_job(id)
            .await
            .map_err(BackupError::ledger)?;
        tracing::info!("Deleted job {}", id);
        Ok(())
    }

    /// All jobs, newest first, with status and next run computed now.
    pub async fn get_jobs(&self) -> Result<Vec<JobView>, BackupError> {
        let jobs = self.jobs.list_jobs().await.map_err(BackupError::ledger)?;
        let now = self.clock.now();

        Ok(jobs
            .into_iter()
            .map(|job| {
                let (status, next_run) = if job.enabled {
                    let next = match compute_next_run(&job.schedule, self.timezone.as_deref(), now) {
                        Ok(at) => NextRun::At(at),
                        Err(e) => {
                            tracing::warn!("Cannot compute next run for job {}: {:#}", job.id, e);
                            NextRun::Unavailable
                        }
                    };
                    (JobStatus::Active, next)
                } else {
                    (JobStatus::Paused, NextRun::Paused)
                };
                JobView {
                    job,
                    status,
                    next_run,
                }
            })
            .collect())
    }

    /// Whether a live trigger exists for `id`.
    pub fn is_installed(&self, id: i64) -> bool {
        self.registry().contains_key(&id)
    }

    pub fn installed_count(&self) -> usize {
        self.registry().len()
    }

    async fn find_job(&self, id: i64) -> Result<ScheduledJob, BackupError> {
        self.jobs
            .get_job(id)
            .await
            .map_err(BackupError::ledger)?
            .ok_or_else(|| BackupError::NotFound(format!("Job with id '{}' not found", id)))
    }

    fn install_trigger(&self, job: &ScheduledJob) -> Result<(), BackupError> {
        // reject schedules that cannot produce a fire before spawning anything
        compute_next_run(&job.schedule, self.timezone.as_deref(), self.clock.now())
            .map_err(|e| BackupError::Cron(format!("{:#}", e)))?;

        if *self.shutdown.borrow() {
            tracing::debug!("Scheduler stopped, not installing trigger for job {}", job.id);
            return Ok(());
        }

        let ctx = Arc::new(TriggerContext {
            job_id: job.id,
            job_name: job.name.clone(),
            schedule: job.schedule.clone(),
            timezone: self.timezone.clone(),
            jobs: Arc::clone(&self.jobs),
            pipeline: Arc::clone(&self.pipeline),
            clock: Arc::clone(&self.clock),
        });
        let handle = tokio::spawn(run_trigger(ctx, self.shutdown.subscribe()));

        if let Some(previous) = self.registry().insert(job.id, handle) {
            previous.abort();
        }
        tracing::debug!("Installed trigger for job {} ('{}')", job.id, job.schedule);
        Ok(())
    }

    fn remove_trigger(&self, id: i64) -> bool {
        match self.registry().remove(&id) {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Removed trigger for job {}", id);
                true
            }
            None => false,
        }
    }
}

impl Drop for SchedulerEngine {
    fn drop(&mut self) {
        for (_, handle) in self.registry().drain() {
            handle.abort();
        }
    }
}

/// Sleep until each due time, then spawn the backup on the pipeline's
/// tracker so it outlives this trigger and is awaited at shutdown.
async fn run_trigger(ctx: Arc<TriggerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = ctx.clock.now();
        let after = match last_fire {
            Some(fired) if fired > now => fired,
            _ => now,
        };
        let fire_at = match compute_next_run(&ctx.schedule, ctx.timezone.as_deref(), after) {
            Ok(at) => at,
            Err(e) => {
                tracing::error!("Trigger for job {} stopped: {:#}", ctx.job_id, e);
                return;
            }
        };

        loop {
            let wait = (fire_at - ctx.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if wait.is_zero() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(wait.min(MAX_SLEEP)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }

        if *shutdown.borrow() {
            return;
        }
        last_fire = Some(fire_at);
        ctx.pipeline.attempts().spawn(fire(Arc::clone(&ctx), fire_at));
    }
}

async fn fire(ctx: Arc<TriggerContext>, due: DateTime<Utc>) {
    tracing::info!("Job '{}' ({}) fired, due {}", ctx.job_name, ctx.job_id, due);

    if let Err(e) = ctx.pipeline.create_backup(BackupOptions::full()).await {
        tracing::error!("Scheduled backup for job {} failed: {}", ctx.job_id, e);
    }

    if let Err(e) = ctx.jobs.set_last_run(ctx.job_id, ctx.clock.now()).await {
        tracing::warn!("Failed to update last run for job {}: {:#}", ctx.job_id, e);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
