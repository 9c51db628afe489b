//! Job scheduler for periodic synchronization
//!
//! This module keeps a registry of named jobs, each with a cron cadence
//! (seconds field first, e.g. `0 */15 * * * *`), and drives them with one
//! trigger task per job while the scheduler is running.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;

/// Future returned by a job handler
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Job body, invoked once per trigger
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobHandler`]
pub fn job_handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

/// Public view of a registered job
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct JobInfo {
    pub name: String,
    pub cadence: String,
    pub next_run: Option<DateTime<Utc>>,
}

struct Trigger {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ScheduledJob {
    cadence: String,
    schedule: Schedule,
    handler: JobHandler,
    trigger: Option<Trigger>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, ScheduledJob>,
    running: bool,
}

/// Registry of named periodic jobs
///
/// Registration and removal take the registry lock exclusively; listing
/// takes it shared.
#[derive(Clone, Default)]
pub struct JobScheduler {
    registry: Arc<RwLock<Registry>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any job with the same name
    ///
    /// When the scheduler is running the new trigger starts immediately.
    pub async fn add_job(
        &self,
        name: &str,
        cadence: &str,
        handler: JobHandler,
    ) -> Result<(), SchedulerError> {
        let schedule = parse_cadence(cadence)?;

        let replaced = {
            let mut registry = self.registry.write().await;
            let trigger = registry
                .running
                .then(|| spawn_trigger(name, schedule.clone(), handler.clone()));

            registry.jobs.insert(
                name.to_string(),
                ScheduledJob {
                    cadence: cadence.to_string(),
                    schedule,
                    handler,
                    trigger,
                },
            )
        };

        match replaced {
            Some(old) => {
                stop_trigger(old.trigger).await;
                info!(job = %name, cadence = %cadence, "Replaced scheduled job");
            }
            None => info!(job = %name, cadence = %cadence, "Added scheduled job"),
        }

        Ok(())
    }

    /// Cancel and unregister a job; unknown names are ignored
    pub async fn remove_job(&self, name: &str) -> bool {
        let removed = self.registry.write().await.jobs.remove(name);

        match removed {
            Some(job) => {
                stop_trigger(job.trigger).await;
                info!(job = %name, "Removed scheduled job");
                true
            }
            None => {
                debug!(job = %name, "Remove requested for unknown job");
                false
            }
        }
    }

    /// Names of the registered jobs, in no particular order
    pub async fn list_jobs(&self) -> Vec<String> {
        self.registry.read().await.jobs.keys().cloned().collect()
    }

    /// Registered jobs with their cadence and next fire time
    pub async fn job_info(&self) -> Vec<JobInfo> {
        let registry = self.registry.read().await;
        let mut jobs: Vec<JobInfo> = registry
            .jobs
            .iter()
            .map(|(name, job)| JobInfo {
                name: name.clone(),
                cadence: job.cadence.clone(),
                next_run: registry
                    .running
                    .then(|| job.schedule.upcoming(Utc).next())
                    .flatten(),
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub async fn is_running(&self) -> bool {
        self.registry.read().await.running
    }

    /// Begin dispatching triggers for every registered job
    pub async fn start(&self) {
        let mut registry = self.registry.write().await;
        if registry.running {
            debug!("Scheduler already running");
            return;
        }
        registry.running = true;

        for (name, job) in registry.jobs.iter_mut() {
            if job.trigger.is_none() {
                job.trigger = Some(spawn_trigger(name, job.schedule.clone(), job.handler.clone()));
            }
        }

        info!(jobs = registry.jobs.len(), "Scheduler started");
    }

    /// Halt all triggers
    ///
    /// Returns once every trigger task has exited. Handlers that are already
    /// running are left to finish on their own.
    pub async fn stop(&self) {
        let triggers: Vec<Trigger> = {
            let mut registry = self.registry.write().await;
            if !registry.running {
                return;
            }
            registry.running = false;
            registry
                .jobs
                .values_mut()
                .filter_map(|job| job.trigger.take())
                .collect()
        };

        let count = triggers.len();
        for trigger in triggers {
            stop_trigger(Some(trigger)).await;
        }

        info!(jobs = count, "Scheduler stopped");
    }
}

fn parse_cadence(cadence: &str) -> Result<Schedule, SchedulerError> {
    let schedule =
        Schedule::from_str(cadence).map_err(|e| SchedulerError::InvalidCadence {
            cadence: cadence.to_string(),
            reason: e.to_string(),
        })?;

    if schedule.upcoming(Utc).next().is_none() {
        return Err(SchedulerError::Exhausted(cadence.to_string()));
    }

    Ok(schedule)
}

fn spawn_trigger(name: &str, schedule: Schedule, handler: JobHandler) -> Trigger {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_trigger(
        name.to_string(),
        schedule,
        handler,
        cancel.clone(),
    ));
    Trigger { cancel, handle }
}

async fn stop_trigger(trigger: Option<Trigger>) {
    if let Some(trigger) = trigger {
        trigger.cancel.cancel();
        if let Err(e) = trigger.handle.await {
            warn!(error = %e, "Trigger task ended abnormally");
        }
    }
}

/// Next fire time strictly after both `now` and the previous fire
///
/// The sleep is monotonic while `now` is wall clock; anchoring on the last
/// fire keeps a lagging wall clock from yielding the same instant twice.
fn next_fire(
    schedule: &Schedule,
    last_fired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let anchor = last_fired.map_or(now, |last| last.max(now));
    schedule.after(&anchor).next()
}

async fn run_trigger(
    name: String,
    schedule: Schedule,
    handler: JobHandler,
    cancel: CancellationToken,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let Some(next) = next_fire(&schedule, last_fired, now) else {
            warn!(job = %name, "Cadence has no further fire times");
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        debug!(job = %name, next_run = %next, "Waiting for next trigger");

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job = %name, "Trigger cancelled");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fired = Some(next);

        // Each run gets its own task so a panicking handler cannot take
        // the trigger loop down with it
        let job = name.clone();
        let run = tokio::spawn(handler());
        tokio::spawn(async move {
            if let Err(e) = run.await {
                if e.is_panic() {
                    error!(job = %job, "Scheduled job panicked");
                }
            }
        });
    }
}
