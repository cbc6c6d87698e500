use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use crate::alerts::AlertNotifier;
use crate::check::CheckJob;
use crate::config::Config;
use crate::control::Controller;
use crate::fetch::HttpFetcher;
use crate::scheduler::TokioScheduler;
use crate::settings::{Frequency, RunFlag};
use crate::store::ConfigStore;
use crate::utils::format_duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builds the check from the config file and the store
pub fn build_check(config: &Config, store: Arc<dyn ConfigStore>) -> Result<CheckJob> {
    let fetcher = HttpFetcher::new(config.fetch.clone()).context("Failed to build http client")?;
    let notifier = AlertNotifier::new(config.notifications.clone());
    Ok(CheckJob::new(
        store,
        Arc::new(fetcher),
        Arc::new(notifier),
        config.timezone,
    ))
}

/// Runs until Ctrl+C, following the run-flag and interval kept in the store
pub async fn run(config: &Config, store: Arc<dyn ConfigStore>) -> Result<()> {
    let check = Arc::new(build_check(config, store.clone())?);
    let scheduler = Arc::new(TokioScheduler::new(&config.scheduler));
    let controller = Controller::new(store.clone(), scheduler.clone(), check.into_job());

    let mut applied: Option<Frequency> = None;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(config.scheduler.poll);

    info!("Daemon started, polling run state every {}", format_duration(config.scheduler.poll));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown initiated");
                break;
            }
            _ = poll.tick() => {
                if let Err(e) = sync(&controller, store.as_ref(), &mut applied).await {
                    error!("Failed to apply run state: {:#}", e);
                }
            }
        }
    }

    // The run-flag stays as is, a restarted daemon resumes watching
    if let Some(handle) = controller.current() {
        info!("Leaving job {} to wind down", handle.id);
    }
    for job in scheduler.jobs() {
        info!(
            "Job '{}' every {} ran {} time(s), last result {:?}",
            job.handle.tag,
            format_duration(job.interval),
            job.runs,
            job.last_result
        );
    }
    scheduler.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

/// Starts, restarts or stops the periodic job so it matches the stored state.
/// `applied` holds the frequency of the job currently scheduled, if any.
async fn sync(
    controller: &Controller,
    store: &dyn ConfigStore,
    applied: &mut Option<Frequency>,
) -> Result<()> {
    let flag = store.run_flag().await?;

    match flag {
        RunFlag::Active => {
            let frequency = store.frequency().await?;
            if *applied != Some(frequency) {
                controller.start(frequency).await?;
                *applied = Some(frequency);
            }
        }
        RunFlag::Stopped => {
            if applied.take().is_some() {
                controller.stop().await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobFn, JobFuture, JobResult, JobState, SchedulerSettings};
    use crate::settings::Key;
    use crate::store::memory::MemoryStore;
    use tokio_util::sync::CancellationToken;

    fn noop_job() -> JobFn {
        Arc::new(|_token: CancellationToken| -> JobFuture { Box::pin(async { JobResult::NoOp }) })
    }

    #[tokio::test]
    async fn test_sync_follows_stored_state() {
        let store = Arc::new(MemoryStore::default());
        let scheduler = Arc::new(TokioScheduler::new(&SchedulerSettings::default()));
        let controller = Controller::new(store.clone(), scheduler.clone(), noop_job());
        let mut applied = None;

        // Nothing stored yet: stopped, nothing scheduled
        sync(&controller, store.as_ref(), &mut applied).await.unwrap();
        assert_eq!(applied, None);
        assert!(scheduler.jobs().is_empty());

        store.put(Key::RunFlag, "active");
        store.put(Key::IntervalMinutes, "10");
        sync(&controller, store.as_ref(), &mut applied).await.unwrap();
        assert_eq!(applied, Some(Frequency::TenMinutes));
        let first = controller.current().unwrap();

        // Unchanged state keeps the same job
        sync(&controller, store.as_ref(), &mut applied).await.unwrap();
        assert_eq!(controller.current(), Some(first.clone()));

        store.put(Key::IntervalMinutes, "60");
        sync(&controller, store.as_ref(), &mut applied).await.unwrap();
        assert_eq!(applied, Some(Frequency::OneHour));
        let second = controller.current().unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.job(&first).map(|j| j.state), Some(JobState::Cancelled));

        store.put(Key::RunFlag, "stopped");
        sync(&controller, store.as_ref(), &mut applied).await.unwrap();
        assert_eq!(applied, None);
        assert_eq!(controller.current(), None);
        assert!(scheduler.jobs().is_empty());

        scheduler.shutdown(Duration::from_secs(1)).await;
    }
}
