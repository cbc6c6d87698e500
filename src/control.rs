use log::info;
use std::sync::{Arc, Mutex, PoisonError};

use crate::scheduler::{JobFn, JobHandle, JobScheduler};
use crate::settings::{Frequency, Key, RunFlag};
use crate::store::{ConfigStore, StoreError};

/// Tag shared by every scheduled instance of the page check
pub const WATCH_TAG: &str = "keyword-watch";

/// Start/stop surface over the job scheduler.
///
/// The run-flag is always written before the scheduler is touched, so an
/// execution already in flight sees `Stopped` at its next check even if the
/// cancellation itself has not reached it yet.
pub struct Controller {
    store: Arc<dyn ConfigStore>,
    scheduler: Arc<dyn JobScheduler>,
    job: JobFn,
    current: Mutex<Option<JobHandle>>,
}

impl Controller {
    pub fn new(store: Arc<dyn ConfigStore>, scheduler: Arc<dyn JobScheduler>, job: JobFn) -> Self {
        Self {
            store,
            scheduler,
            job,
            current: Mutex::new(None),
        }
    }

    pub async fn start(&self, frequency: Frequency) -> Result<JobHandle, StoreError> {
        self.store
            .set_many(&[
                (Key::RunFlag, Some(RunFlag::Active.as_str().to_string())),
                (Key::IntervalMinutes, Some(frequency.minutes().to_string())),
            ])
            .await?;

        self.scheduler.cancel_tag(WATCH_TAG);
        let handle = self
            .scheduler
            .schedule(WATCH_TAG, frequency.interval(), self.job.clone());

        info!("Watching every {} minutes (job {})", frequency.minutes(), handle.id);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        Ok(handle)
    }

    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.set_run_flag(RunFlag::Stopped).await?;

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous {
            self.scheduler.cancel(&handle);
        }
        self.scheduler.prune();

        info!("Watching stopped");
        Ok(())
    }

    pub fn current(&self) -> Option<JobHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
