//! Background sync triggers
//!
//! The platform scheduler (or the CLI watch loop) calls into
//! [`BackgroundSync`], which enforces the minimum interval between syncs.
//! Triggers are best effort: a skipped or rejected trigger is not an error.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::coordinator::{SyncCoordinator, SyncOutcome};
use crate::error::Result;

/// Outcome of a single trigger.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// The last background sync is younger than the minimum interval
    Skipped { last: DateTime<Utc> },
    Ran(SyncOutcome),
}

/// Interval-guarded entry points into a [`SyncCoordinator`].
pub struct BackgroundSync {
    coordinator: Arc<SyncCoordinator>,
    min_interval: Duration,
}

impl BackgroundSync {
    pub fn new(coordinator: Arc<SyncCoordinator>, min_interval: Duration) -> Self {
        Self {
            coordinator,
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_background_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.coordinator.store().last_background_sync()
    }

    /// Whether a sync is due at `now`. Returns the last sync time when not.
    fn not_due(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(last) = self.last_background_sync()? else {
            return Ok(None);
        };

        let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
        if elapsed < self.min_interval {
            Ok(Some(last))
        } else {
            Ok(None)
        }
    }

    /// Handler for the periodic background trigger.
    ///
    /// Idempotent within the minimum interval. The background timestamp is
    /// only recorded after a successful sync.
    pub async fn on_trigger(&self) -> Result<TriggerOutcome> {
        let now = Utc::now();
        if let Some(last) = self.not_due(now)? {
            tracing::debug!(%last, "Background sync not due yet");
            return Ok(TriggerOutcome::Skipped { last });
        }

        tracing::info!("Background sync triggered");
        let outcome = self.coordinator.sync_now().await?;
        if outcome.is_synced() {
            self.coordinator.store().set_last_background_sync(now)?;
        }
        Ok(TriggerOutcome::Ran(outcome))
    }

    /// Sync when the app comes to the foreground, unless a background sync
    /// ran within the minimum interval.
    pub async fn sync_on_app_open(&self) -> Result<TriggerOutcome> {
        if let Some(last) = self.not_due(Utc::now())? {
            tracing::debug!(%last, "Skipping app-open sync");
            return Ok(TriggerOutcome::Skipped { last });
        }

        tracing::info!("Syncing on app open");
        Ok(TriggerOutcome::Ran(self.coordinator.sync_now().await?))
    }

    /// Fire [`on_trigger`](Self::on_trigger) every `min_interval` until
    /// `cancel` fires. A trigger that errors is logged and the loop goes on.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.min_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.on_trigger().await {
                        Ok(TriggerOutcome::Ran(SyncOutcome::Failed { failure, .. })) => {
                            tracing::warn!(error = %failure, "Periodic sync failed");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Periodic sync trigger failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Periodic sync loop shutting down");
                    break;
                }
            }
        }
    }
}
