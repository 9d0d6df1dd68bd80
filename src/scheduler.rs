use anyhow::Result;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::ScraperConfig;
use crate::models::{Filter, Listing};
use crate::plugins::traits::{Notifier, SourceFetcher};
use crate::store::DedupStore;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
}

/// What started a cycle. Only used for logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Timer,
    Manual,
}

/// Fixed waits that throttle traffic to the source site and the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub inter_filter_delay: Duration,
    pub inter_listing_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            inter_filter_delay: Duration::from_millis(3000),
            inter_listing_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&ScraperConfig> for Pacing {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            inter_filter_delay: Duration::from_millis(config.filter_delay_ms),
            inter_listing_delay: Duration::from_millis(config.listing_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub filters_processed: usize,
    pub filters_failed: usize,
    pub listings_seen: usize,
    pub already_sent: usize,
    pub notified: usize,
    pub notify_failures: usize,
    pub mark_failures: usize,
    pub lookup_failures: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still running; nothing was done.
    Skipped,
    /// The cycle body panicked; the state machine was still reset.
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingOutcome {
    AlreadySent,
    Notified,
    NotifyFailed,
}

/// Resets the state to `Idle` when dropped, including during unwinding.
struct RunningGuard<'a>(&'a AtomicU8);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

/// Drives scrape, dedupe and notify for every filter, one cycle at a time.
pub struct CycleScheduler {
    filters: Vec<Filter>,
    fetcher: Arc<dyn SourceFetcher>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn DedupStore>,
    pacing: Pacing,
    state: AtomicU8,
}

impl CycleScheduler {
    pub fn new(
        filters: Vec<Filter>,
        fetcher: Arc<dyn SourceFetcher>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn DedupStore>,
        pacing: Pacing,
    ) -> Self {
        Self {
            filters,
            fetcher,
            notifier,
            store,
            pacing,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> CycleState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => CycleState::Running,
            _ => CycleState::Idle,
        }
    }

    /// Single-flight entry point shared by the startup run, the timer and manual checks.
    pub async fn trigger(&self, trigger: Trigger) -> CycleOutcome {
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(?trigger, "Previous check still running, skipping this interval");
            return CycleOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.state);

        tracing::info!(?trigger, "Checking for new ads...");

        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(report) => {
                tracing::info!(
                    notified = report.notified,
                    already_sent = report.already_sent,
                    failed_filters = report.filters_failed,
                    "Check cycle finished in {}ms",
                    report.elapsed_ms
                );
                CycleOutcome::Completed(report)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Error in check cycle: {}", message);
                CycleOutcome::Aborted(message)
            }
        }
    }

    /// Like [`trigger`](Self::trigger), but drops the cycle when `cancel` resolves first.
    ///
    /// Returns `None` when cancelled. Listings marked before that stay marked
    /// and the state is back to `Idle`.
    pub async fn trigger_or_cancel<F>(&self, trigger: Trigger, cancel: F) -> Option<CycleOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            outcome = self.trigger(trigger) => Some(outcome),
            _ = cancel => {
                tracing::warn!(?trigger, "Check cycle cancelled");
                None
            }
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();

        for (index, filter) in self.filters.iter().enumerate() {
            if index > 0 {
                tracing::debug!("Waiting before processing next filter...");
                tokio::time::sleep(self.pacing.inter_filter_delay).await;
            }

            tracing::info!(filter = %filter.name, "Processing filter");

            let listings = match self.fetcher.fetch(&filter.url).await {
                Ok(listings) => listings,
                Err(e) => {
                    tracing::error!(filter = %filter.name, error = %e, "Error fetching listings");
                    report.filters_failed += 1;
                    continue;
                }
            };

            tracing::info!(filter = %filter.name, "Found {} ads", listings.len());
            report.filters_processed += 1;
            report.listings_seen += listings.len();

            for listing in &listings {
                match self.process_listing(filter, listing, &mut report).await {
                    Ok(ListingOutcome::AlreadySent) => report.already_sent += 1,
                    Ok(ListingOutcome::Notified) => report.notified += 1,
                    Ok(ListingOutcome::NotifyFailed) => report.notify_failures += 1,
                    Err(e) => {
                        tracing::error!(
                            filter = %filter.name,
                            listing_id = %listing.id,
                            error = %e,
                            "Error processing ad"
                        );
                        report.lookup_failures += 1;
                    }
                }

                tokio::time::sleep(self.pacing.inter_listing_delay).await;
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn process_listing(
        &self,
        filter: &Filter,
        listing: &Listing,
        report: &mut CycleReport,
    ) -> crate::Result<ListingOutcome> {
        if self.store.is_sent(&listing.id, &filter.name).await? {
            tracing::debug!(filter = %filter.name, listing_id = %listing.id, "Skipping already sent ad");
            return Ok(ListingOutcome::AlreadySent);
        }

        tracing::info!(filter = %filter.name, listing_id = %listing.id, "New ad found: {}", listing.title);

        let outcome = match self.notifier.notify(listing, &filter.target).await {
            Ok(()) => {
                tracing::info!(
                    filter = %filter.name,
                    listing_id = %listing.id,
                    "Sent notification for: {}",
                    listing.title
                );
                ListingOutcome::Notified
            }
            Err(e) => {
                tracing::error!(
                    filter = %filter.name,
                    listing_id = %listing.id,
                    error = %e,
                    "Error sending notification"
                );
                ListingOutcome::NotifyFailed
            }
        };

        // Marked even when delivery failed: an attempted listing is never retried.
        match self.store.mark_sent(&listing.id, &filter.name, &listing.title).await {
            Ok(()) => {
                tracing::debug!(filter = %filter.name, listing_id = %listing.id, "Marked ad as sent");
            }
            Err(e) => {
                tracing::error!(
                    filter = %filter.name,
                    listing_id = %listing.id,
                    error = %e,
                    "Error marking ad as sent"
                );
                report.mark_failures += 1;
            }
        }

        Ok(outcome)
    }
}

/// Fires [`CycleScheduler::trigger`] on a fixed interval.
pub struct PollingScheduler {
    scheduler: JobScheduler,
    cycle: Arc<CycleScheduler>,
    interval: Duration,
}

impl PollingScheduler {
    pub async fn new(cycle: Arc<CycleScheduler>, interval: Duration) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            cycle,
            interval,
        })
    }

    /// Runs one cycle in the background right away, then every `interval`.
    pub async fn start(&mut self) -> Result<()> {
        let cycle = Arc::clone(&self.cycle);
        let job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let cycle = Arc::clone(&cycle);
            Box::pin(async move {
                cycle.trigger(Trigger::Timer).await;
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        let cycle = Arc::clone(&self.cycle);
        tokio::spawn(async move {
            cycle.trigger(Trigger::Startup).await;
        });

        tracing::info!("Polling every {} minute(s)", self.interval.as_secs() / 60);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        tracing::info!("Polling scheduler shutdown");
        Ok(())
    }
}
