use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::utils::format_duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Shorter intervals are raised to this value
    pub min_interval: Duration,
    /// How often the daemon re-reads the run-flag
    pub poll: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(15 * 60),
            poll: Duration::from_secs(5),
        }
    }
}

/// Identifies one scheduled periodic job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: Uuid,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Run ended at a gate without doing anything
    NoOp,
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enqueued,
    Running,
    Cancelled,
}

pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;
pub type JobFn = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Periodic job runner the control surface drives
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, tag: &str, interval: Duration, job: JobFn) -> JobHandle;

    /// Cancels every job carrying the tag
    fn cancel_tag(&self, tag: &str);

    fn cancel(&self, handle: &JobHandle);

    /// Forgets cancelled jobs
    fn prune(&self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub handle: JobHandle,
    pub interval: Duration,
    pub state: JobState,
    pub runs: u32,
    pub last_result: Option<JobResult>,
}

struct JobRecord {
    info: JobInfo,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    jobs: Vec<JobRecord>,
    // One lock per tag keeps runs of the same tag from overlapping
    tag_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// In-process scheduler running each job on a tokio task.
///
/// The first tick fires immediately, then once per interval. Cancellation is
/// cooperative: the job's token is cancelled and the running execution is
/// expected to notice it at its next checkpoint.
pub struct TokioScheduler {
    min_interval: Duration,
    registry: Arc<Mutex<Registry>>,
}

impl TokioScheduler {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            min_interval: settings.min_interval,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        lock(&self.registry).jobs.iter().map(|r| r.info.clone()).collect()
    }

    #[cfg(test)]
    pub fn job(&self, handle: &JobHandle) -> Option<JobInfo> {
        lock(&self.registry)
            .jobs
            .iter()
            .find(|r| &r.info.handle == handle)
            .map(|r| r.info.clone())
    }

    /// Cancels every job and waits up to `grace` for each loop to wind down
    pub async fn shutdown(&self, grace: Duration) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut registry = lock(&self.registry);
            for record in registry.jobs.iter_mut() {
                cancel_record(record);
            }
            registry.jobs.drain(..).map(|r| r.task).collect()
        };

        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("Job did not stop within {}, aborting", format_duration(grace));
                abort.abort();
            }
        }
    }

    fn clamp(&self, interval: Duration) -> Duration {
        let floor = self.min_interval.max(Duration::from_millis(1));
        if interval < floor {
            warn!(
                "Requested interval {} is below the minimum, using {}",
                format_duration(interval),
                format_duration(floor)
            );
            floor
        } else {
            interval
        }
    }

    async fn run_loop(
        registry: Arc<Mutex<Registry>>,
        handle: JobHandle,
        interval: Duration,
        token: CancellationToken,
        tag_lock: Arc<tokio::sync::Mutex<()>>,
        job: JobFn,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => break,
            }

            // Wait for a superseded job of the same tag to finish its run
            let _guard = tokio::select! {
                guard = tag_lock.lock() => guard,
                _ = token.cancelled() => break,
            };
            if token.is_cancelled() {
                break;
            }

            update(&registry, &handle, |info| info.state = JobState::Running);
            debug!("Job '{}' ({}) started", handle.tag, handle.id);

            let start = Instant::now();
            let result = job(token.clone()).await;

            match &result {
                JobResult::Success => info!(
                    "Job '{}' finished with success, elapsed {}",
                    handle.tag,
                    format_duration(start.elapsed())
                ),
                JobResult::NoOp => debug!("Job '{}' finished without work", handle.tag),
                JobResult::Failure(reason) => {
                    error!("Job '{}' failed: {}, next attempt on the next tick", handle.tag, reason)
                }
            }

            update(&registry, &handle, |info| {
                info.runs += 1;
                info.last_result = Some(result);
                if info.state == JobState::Running {
                    info.state = JobState::Enqueued;
                }
            });
        }

        debug!("Job '{}' ({}) loop ended", handle.tag, handle.id);
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(&self, tag: &str, interval: Duration, job: JobFn) -> JobHandle {
        let interval = self.clamp(interval);
        let handle = JobHandle {
            id: Uuid::new_v4(),
            tag: tag.to_string(),
        };
        let token = CancellationToken::new();

        let mut registry = lock(&self.registry);
        let tag_lock = registry
            .tag_locks
            .entry(tag.to_string())
            .or_default()
            .clone();

        let task = tokio::spawn(Self::run_loop(
            self.registry.clone(),
            handle.clone(),
            interval,
            token.clone(),
            tag_lock,
            job,
        ));

        registry.jobs.push(JobRecord {
            info: JobInfo {
                handle: handle.clone(),
                interval,
                state: JobState::Enqueued,
                runs: 0,
                last_result: None,
            },
            token,
            task,
        });

        info!(
            "Scheduled job '{}' ({}) every {}",
            handle.tag,
            handle.id,
            format_duration(interval)
        );
        handle
    }

    fn cancel_tag(&self, tag: &str) {
        let mut registry = lock(&self.registry);
        for record in registry.jobs.iter_mut().filter(|r| r.info.handle.tag == tag) {
            cancel_record(record);
        }
    }

    fn cancel(&self, handle: &JobHandle) {
        let mut registry = lock(&self.registry);
        match registry.jobs.iter_mut().find(|r| &r.info.handle == handle) {
            Some(record) => cancel_record(record),
            None => debug!("Job {} not found, nothing to cancel", handle.id),
        }
    }

    fn prune(&self) {
        let mut registry = lock(&self.registry);
        let before = registry.jobs.len();
        // A pruned job still finishing its last run holds the tag lock until it is done
        registry.jobs.retain(|r| r.info.state != JobState::Cancelled);
        let pruned = before - registry.jobs.len();
        if pruned > 0 {
            debug!("Pruned {} job records", pruned);
        }
    }
}

fn cancel_record(record: &mut JobRecord) {
    if record.info.state != JobState::Cancelled {
        info!("Cancelling job '{}' ({})", record.info.handle.tag, record.info.handle.id);
        record.token.cancel();
        record.info.state = JobState::Cancelled;
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn update(registry: &Mutex<Registry>, handle: &JobHandle, f: impl FnOnce(&mut JobInfo)) {
    let mut registry = lock(registry);
    if let Some(record) = registry.jobs.iter_mut().find(|r| &r.info.handle == handle) {
        let cancelled = record.info.state == JobState::Cancelled;
        f(&mut record.info);
        // Cancellation is final, a late run must not resurrect the record
        if cancelled {
            record.info.state = JobState::Cancelled;
        }
    }
}
