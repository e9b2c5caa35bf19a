//! Sync coordinator
//!
//! Orchestrates provider fetch, scoring and the three remote pushes, and owns
//! the durable retry queue.
//!
//! ```text
//! Idle ──sync_now──▶ Syncing ──all pushes ok──▶ Idle (last_sync = now)
//!                       │
//!                       └──any failure──▶ Idle (error set, retry queued)
//! ```
//!
//! At most one sync runs per store. The persisted `is_syncing` flag is
//! claimed in one transaction, so a second `sync_now` on any coordinator
//! sharing the store returns [`SyncOutcome::Rejected`] immediately.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result, SyncFailure};
use crate::providers::{HealthSampleProvider, UsageSampleProvider};
use crate::remote::RemoteSink;
use crate::scoring::{
    compute_productivity_score, compute_vitality_score, VitalityPolicy, STREAK_THRESHOLD,
};
use crate::types::{
    DailyHealthSample, DailyUsageSample, ProductivityScore, RetryQueueEntry, SyncState,
    VitalityScore,
};

/// Cached samples older than this are pruned after each sync.
const SAMPLE_RETENTION_DAYS: u32 = 31;

/// Settings the coordinator needs from configuration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub user_id: String,
    /// Upper bound for each remote request
    pub push_timeout: Duration,
    /// Upper bound for each provider fetch
    pub fetch_timeout: Duration,
    pub vitality_window_days: u32,
    pub birth_year: Option<i32>,
    pub vitality_policy: VitalityPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_id: config.user.user_id.clone(),
            push_timeout: config.remote.timeout(),
            fetch_timeout: config.sync.fetch_timeout(),
            vitality_window_days: config.sync.vitality_window_days.max(1),
            birth_year: config.user.birth_year,
            vitality_policy: config.vitality.clone(),
        }
    }
}

/// What a completed sync pushed.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub synced_at: DateTime<Utc>,
    pub health: DailyHealthSample,
    /// `None` when usage tracking is unavailable
    pub usage: Option<DailyUsageSample>,
    pub score: ProductivityScore,
    /// `None` without a birth year or when the window could not be scored
    pub vitality: Option<VitalityScore>,
    pub duration_ms: u64,
}

/// Result of one `sync_now` call.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Synced(Box<SyncReport>),
    /// The sync ran and failed; `state` is the persisted state afterwards
    Failed {
        state: SyncState,
        failure: SyncFailure,
    },
    /// Another sync was in flight, or the coordinator was shut down
    Rejected,
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }
}

/// Result of one `retry_failed_syncs` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Sync attempts made (0 or 1)
    pub attempted: usize,
    /// Queue entries removed
    pub resolved: usize,
    /// Queue entries left afterwards
    pub remaining: usize,
}

/// Dashboard data: remote reads with the local last-known-good fallback.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub remote_health: Option<DailyHealthSample>,
    pub remote_score: Option<ProductivityScore>,
    pub local_score: Option<ProductivityScore>,
    pub state: SyncState,
    pub pending_retries: usize,
}

impl Dashboard {
    /// Score to display: the dashboard's when reachable, else the local one.
    pub fn best_score(&self) -> Option<&ProductivityScore> {
        self.remote_score.as_ref().or(self.local_score.as_ref())
    }
}

/// Marks one sync as in flight for as long as it lives.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    store: &'a Database,
    settled: bool,
}

impl<'a> InFlight<'a> {
    /// Claim this coordinator's flag, then the persisted one shared by every
    /// coordinator on the same store. `None` if either is already held.
    fn acquire(flag: &'a AtomicBool, store: &'a Database) -> Result<Option<Self>> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }

        match store.try_begin_sync() {
            Ok(true) => Ok(Some(Self {
                flag,
                store,
                settled: false,
            })),
            Ok(false) => {
                flag.store(false, Ordering::Release);
                Ok(None)
            }
            Err(e) => {
                flag.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // A sync future dropped mid-flight never reached record_success/record_failure
        if !self.settled {
            if let Err(e) = self.store.end_sync() {
                tracing::warn!(error = %e, "Failed to clear is_syncing flag");
            }
        }
        self.flag.store(false, Ordering::Release);
    }
}

async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Network(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs_f64()
        ))),
    }
}

/// Owns the sync state machine for one process.
pub struct SyncCoordinator {
    health: Arc<HealthSampleProvider>,
    usage: Arc<UsageSampleProvider>,
    sink: Arc<dyn RemoteSink>,
    store: Arc<Database>,
    options: SyncOptions,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl SyncCoordinator {
    /// Create a coordinator over `store`. Coordinators sharing one store
    /// also share its `is_syncing` flag, so at most one of them syncs at a
    /// time.
    pub fn new(
        health: Arc<HealthSampleProvider>,
        usage: Arc<UsageSampleProvider>,
        sink: Arc<dyn RemoteSink>,
        store: Arc<Database>,
        options: SyncOptions,
    ) -> Result<Self> {
        Ok(Self {
            health,
            usage,
            sink,
            store,
            options,
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Clear an `is_syncing` flag left behind by a process that died
    /// mid-sync. Returns whether a flag was cleared.
    ///
    /// The caller must hold the process-wide sync lock for the store, so no
    /// live sync can own the flag.
    pub fn recover_stale_sync(&self) -> Result<bool> {
        if self.is_syncing() {
            return Ok(false);
        }

        let mut cleared = false;
        self.store.update_sync_state(|state| {
            cleared = state.is_syncing;
            state.is_syncing = false;
        })?;
        if cleared {
            tracing::warn!("Cleared stale is_syncing flag from a previous process");
        }
        Ok(cleared)
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Token that cancels the coordinator. An in-flight sync fails with
    /// "sync cancelled"; later syncs are rejected.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        self.store.sync_state()
    }

    pub fn retry_queue(&self) -> Result<Vec<RetryQueueEntry>> {
        self.store.list_retry_queue()
    }

    /// Fetch, score and push today's data.
    ///
    /// `Err` is returned only when the store itself fails; sync failures are
    /// reported as [`SyncOutcome::Failed`] and queued for retry when retryable.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.run(true).await
    }

    /// Retry the persisted queue, oldest entry first.
    ///
    /// The payload is always today's data, so one successful attempt resolves
    /// every entry queued before it. A failed attempt leaves the queue as is
    /// and stops.
    pub async fn retry_failed_syncs(&self) -> Result<RetryReport> {
        let queue = self.store.list_retry_queue()?;
        let Some(oldest) = queue.first() else {
            return Ok(RetryReport::default());
        };

        tracing::info!(
            queued = queue.len(),
            oldest_id = %oldest.id,
            oldest_enqueued_at = %oldest.enqueued_at,
            "Retrying failed syncs"
        );

        let mut report = RetryReport::default();
        match self.run(false).await? {
            SyncOutcome::Synced(_) => {
                report.attempted = 1;
                let ids: Vec<_> = queue.iter().map(|e| e.id).collect();
                report.resolved = self.store.remove_retry_entries(&ids)?;
            }
            SyncOutcome::Failed { failure, .. } => {
                report.attempted = 1;
                tracing::warn!(
                    class = %failure.class,
                    error = %failure.message,
                    "Retry failed, leaving queue in place"
                );
            }
            SyncOutcome::Rejected => {
                tracing::info!("Sync in flight, skipping retry");
            }
        }

        report.remaining = self.store.retry_queue_len()?;
        tracing::info!(
            attempted = report.attempted,
            resolved = report.resolved,
            remaining = report.remaining,
            "Retry pass complete"
        );
        Ok(report)
    }

    /// Vitality score over the cached window ending at `as_of`.
    pub fn vitality(&self, as_of: NaiveDate) -> Result<VitalityScore> {
        let birth_year = self.options.birth_year.ok_or_else(|| {
            Error::Config("user.birth_year is required for the vitality score".to_string())
        })?;

        let span = i64::from(self.options.vitality_window_days.max(1)) - 1;
        let from = as_of - ChronoDuration::days(span);
        let window = self.store.cached_health_samples(from, as_of)?;

        compute_vitality_score(birth_year, &window, as_of, &self.options.vitality_policy)
    }

    /// Latest remote data plus local fallbacks. Remote failures read as `None`.
    pub async fn dashboard(&self) -> Result<Dashboard> {
        let limit = self.options.push_timeout;
        let (health, score) = tokio::join!(
            with_timeout(limit, "latest health", self.sink.latest_health()),
            with_timeout(limit, "latest score", self.sink.latest_score()),
        );

        let remote_health = health.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to fetch latest health from dashboard");
            None
        });
        let remote_score = score.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to fetch latest score from dashboard");
            None
        });

        Ok(Dashboard {
            remote_health,
            remote_score,
            local_score: self.store.latest_score(&self.options.user_id)?,
            state: self.store.sync_state()?,
            pending_retries: self.store.retry_queue_len()?,
        })
    }

    async fn run(&self, enqueue_on_failure: bool) -> Result<SyncOutcome> {
        if self.cancel.is_cancelled() {
            tracing::info!("Coordinator cancelled, rejecting sync");
            return Ok(SyncOutcome::Rejected);
        }

        let Some(mut in_flight) = InFlight::acquire(&self.in_flight, &self.store)? else {
            tracing::info!("Sync already in progress, rejecting");
            return Ok(SyncOutcome::Rejected);
        };

        let started = Instant::now();
        tracing::info!(user_id = %self.options.user_id, "Sync started");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Unknown("sync cancelled".to_string())),
            result = self.pipeline(started) => result,
        };

        let outcome = match result {
            Ok(report) => {
                self.store.record_success(report.synced_at)?;
                tracing::info!(
                    date = %report.score.date,
                    score = report.score.score,
                    streak_days = report.score.streak_days,
                    usage = report.usage.is_some(),
                    duration_ms = report.duration_ms,
                    "Sync complete"
                );
                SyncOutcome::Synced(Box::new(report))
            }
            Err(e) => {
                let failure = SyncFailure::from(&e);
                let retry = (enqueue_on_failure && failure.class.is_retryable())
                    .then(|| RetryQueueEntry::new(&failure, Utc::now()));
                let state = self.store.record_failure(&failure, retry.as_ref())?;

                tracing::warn!(
                    class = %failure.class,
                    error = %failure.message,
                    queued = retry.is_some(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Sync failed"
                );
                SyncOutcome::Failed { state, failure }
            }
        };

        in_flight.settled = true;
        Ok(outcome)
    }

    async fn pipeline(&self, started: Instant) -> Result<SyncReport> {
        let today = Utc::now().date_naive();
        let user_id = &self.options.user_id;

        let limit = self.options.fetch_timeout;
        let (health, usage) = tokio::join!(
            with_timeout(limit, "health fetch", self.health.fetch_for(today)),
            with_timeout(limit, "usage fetch", self.usage.fetch_for(today)),
        );
        let health = health?;
        let usage = match usage {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::info!(error = %e, "Continuing sync without usage data");
                None
            }
        };

        let history = self.store.streak_run(user_id, today, STREAK_THRESHOLD)?;
        let score = compute_productivity_score(&health, usage.as_ref(), &history);

        // Local first: the score and samples are kept even if every push fails
        self.store.upsert_score(&score)?;
        self.store.cache_health_sample(&health)?;
        if let Some(sample) = &usage {
            self.store.cache_usage_sample(sample)?;
        }
        let retention = self.options.vitality_window_days.max(SAMPLE_RETENTION_DAYS);
        self.store
            .prune_cached_samples(today - ChronoDuration::days(i64::from(retention)))?;

        let vitality = match self.options.birth_year {
            Some(_) => match self.vitality(today) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "Vitality score unavailable");
                    None
                }
            },
            None => None,
        };

        let limit = self.options.push_timeout;
        let (pushed_health, pushed_usage, pushed_score) = tokio::join!(
            with_timeout(limit, "health push", self.sink.push_health(&health)),
            async {
                match &usage {
                    Some(sample) => {
                        with_timeout(limit, "usage push", self.sink.push_usage(sample)).await
                    }
                    None => Ok(()),
                }
            },
            with_timeout(limit, "score push", self.sink.push_score(&score)),
        );
        pushed_health?;
        pushed_usage?;
        pushed_score?;

        Ok(SyncReport {
            synced_at: Utc::now(),
            health,
            usage,
            score,
            vitality,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
