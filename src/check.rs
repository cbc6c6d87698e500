use chrono::Utc;
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::alerts::{Notification, Notifier};
use crate::fetch::{FetchError, PageFetcher};
use crate::matcher;
use crate::scheduler::{JobFn, JobFuture, JobResult};
use crate::settings::{validate_keyword, Key, MatchState, RunFlag, SettingsError};
use crate::store::{ConfigStore, StoreError};
use crate::utils::format_duration;

/// Steps of a single check, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    ReadingConfig,
    CheckingFlag,
    Fetching,
    Matching,
    Persisting,
    Notifying,
    Done,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Keyword present, counters persisted
    Matched(MatchState),
    NoMatch,
    /// The run-flag or the cancellation token closed the gate at this step
    Stopped { at: CheckState },
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("missing setting '{0}'")]
    ConfigMissing(Key),
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// One scheduled check: read settings, fetch the page, count a match, notify.
///
/// The run-flag is re-read after every step that can take a while, so a stop
/// request lands before anything is persisted or announced.
pub struct CheckJob {
    store: Arc<dyn ConfigStore>,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    timezone: Tz,
}

impl CheckJob {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            timezone,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<CheckOutcome, CheckError> {
        let start = Instant::now();
        let result = self.execute(cancel).await;
        let elapsed = format_duration(start.elapsed());

        match &result {
            Ok(CheckOutcome::Matched(state)) => {
                info!("Check matched (count {}), elapsed {}", state.count, elapsed)
            }
            Ok(CheckOutcome::NoMatch) => info!("Check found no match, elapsed {}", elapsed),
            Ok(CheckOutcome::Stopped { at }) => {
                info!("Check stopped at {}, nothing done", at)
            }
            Err(e) => error!("Check failed after {}: {}", elapsed, e),
        }

        result
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<CheckOutcome, CheckError> {
        enter(CheckState::ReadingConfig);
        let url = self.require(Key::Url).await?;
        let keyword = self.require(Key::Keyword).await?;
        validate_keyword(&keyword)?;

        enter(CheckState::CheckingFlag);
        if self.is_stopped(cancel).await? {
            return Ok(CheckOutcome::Stopped { at: CheckState::CheckingFlag });
        }

        enter(CheckState::Fetching);
        let fetched = tokio::select! {
            fetched = self.fetcher.fetch(&url) => fetched,
            _ = cancel.cancelled() => {
                return Ok(CheckOutcome::Stopped { at: CheckState::Fetching });
            }
        };
        if self.is_stopped(cancel).await? {
            return Ok(CheckOutcome::Stopped { at: CheckState::Fetching });
        }
        let text = fetched?;

        enter(CheckState::Matching);
        let found = matcher::matches(&text, &keyword)?;
        if self.is_stopped(cancel).await? {
            return Ok(CheckOutcome::Stopped { at: CheckState::Matching });
        }
        if !found {
            enter(CheckState::Done);
            return Ok(CheckOutcome::NoMatch);
        }

        enter(CheckState::Persisting);
        let state = self.store.record_match(Utc::now().timestamp_millis()).await?;

        // Persisted before notifying: a failed or interrupted alert never loses the count
        enter(CheckState::Notifying);
        let notification = Notification::keyword_found(&state, &url, &keyword, &self.timezone);
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Match counted but notification failed: {}", e);
        }

        enter(CheckState::Done);
        Ok(CheckOutcome::Matched(state))
    }

    async fn require(&self, key: Key) -> Result<String, CheckError> {
        self.store
            .get(key)
            .await?
            .ok_or(CheckError::ConfigMissing(key))
    }

    async fn is_stopped(&self, cancel: &CancellationToken) -> Result<bool, CheckError> {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        Ok(self.store.run_flag().await? != RunFlag::Active)
    }

    /// Adapts the check to the scheduler's job signature
    pub fn into_job(self: Arc<Self>) -> JobFn {
        Arc::new(move |cancel: CancellationToken| -> JobFuture {
            let job = self.clone();
            Box::pin(async move {
                match job.run(&cancel).await {
                    Ok(CheckOutcome::Matched(_)) | Ok(CheckOutcome::NoMatch) => JobResult::Success,
                    Ok(CheckOutcome::Stopped { .. }) => JobResult::NoOp,
                    Err(e) => JobResult::Failure(e.to_string()),
                }
            })
        })
    }
}

fn enter(state: CheckState) {
    debug!("Check state: {}", state);
}
