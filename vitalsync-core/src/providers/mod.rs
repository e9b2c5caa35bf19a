//! Capability providers
//!
//! Providers turn an opaque platform capability into a daily sample. The
//! platform side is abstracted behind [`HealthCapability`] and
//! [`UsageCapability`]; each per-metric getter can fail on its own without
//! taking its siblings down.
//!
//! ## Design Principles
//!
//! 1. **Partial data is normal**: a metric the platform cannot provide becomes 0
//! 2. **Only an unreachable platform is fatal**: signalled by
//!    [`Error::CapabilityUnavailable`](crate::Error::CapabilityUnavailable)
//! 3. **No scoring here**: providers only read and shape data
//!
//! The [`file`] module provides capabilities backed by daily JSON exports,
//! used by the desktop host.

pub mod file;
mod health;
mod usage;

pub use health::HealthSampleProvider;
pub use usage::{
    count_focus_sessions, focus_sessions, AppCategorizer, FocusSession, FocusSessions,
    UsageSampleProvider, FOCUS_SESSION_MINUTES,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::Result;
use crate::types::CapabilityStatus;

/// Sleep for one night, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SleepReading {
    pub total_hours: f64,
    /// `None` when the platform does not report stages
    pub deep_hours: Option<f64>,
    pub rem_hours: Option<f64>,
}

/// Workouts recorded on one day.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkoutReading {
    pub count: u32,
    pub minutes: f64,
}

/// Platform health data source.
///
/// Getters are keyed by calendar day. Return
/// [`Error::CapabilityUnavailable`](crate::Error::CapabilityUnavailable) only
/// when the platform itself cannot be reached; any other error is treated as
/// a missing metric.
#[async_trait]
pub trait HealthCapability: Send + Sync {
    /// Short name for logs (e.g., "healthkit", "file")
    fn name(&self) -> &str;

    /// Ask the platform for read access.
    async fn request_access(&self) -> CapabilityStatus;

    /// Called once before the getters of one fetch for `date`. Sources that
    /// read a whole day at once snapshot it here so the getters agree.
    async fn prepare(&self, _date: NaiveDate) {}

    async fn steps(&self, date: NaiveDate) -> Result<u32>;

    async fn distance_meters(&self, date: NaiveDate) -> Result<f64>;

    async fn active_energy_kcal(&self, date: NaiveDate) -> Result<f64>;

    async fn heart_rate_bpm(&self, date: NaiveDate) -> Result<f64>;

    /// Many platforms do not expose HRV at all.
    async fn heart_rate_variability(&self, _date: NaiveDate) -> Result<Option<f64>> {
        Ok(None)
    }

    async fn sleep(&self, date: NaiveDate) -> Result<SleepReading>;

    async fn workouts(&self, date: NaiveDate) -> Result<WorkoutReading>;
}

/// One uncategorized stretch of app usage, in chronological order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAppUsage {
    pub app_id: String,
    pub minutes_spent: f64,
}

/// Platform screen-time data source.
#[async_trait]
pub trait UsageCapability: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the platform for usage access. `Unavailable` is a normal answer
    /// on platforms without screen-time support.
    async fn request_access(&self) -> CapabilityStatus;

    /// See [`HealthCapability::prepare`].
    async fn prepare(&self, _date: NaiveDate) {}

    /// App usage for `date`, oldest first.
    async fn app_usage(&self, date: NaiveDate) -> Result<Vec<RawAppUsage>>;

    async fn pickups(&self, date: NaiveDate) -> Result<u32>;

    async fn notifications(&self, date: NaiveDate) -> Result<u32>;
}

/// Keep a metric reading, or fall back to its default when the failure is
/// not a capability failure.
pub(crate) fn metric_or_default<T: Default>(
    capability: &str,
    metric: &str,
    date: NaiveDate,
    reading: Result<T>,
) -> Result<T> {
    match reading {
        Ok(value) => Ok(value),
        Err(e @ crate::Error::CapabilityUnavailable(_)) => Err(e),
        Err(e) => {
            tracing::warn!(
                capability,
                metric,
                %date,
                error = %e,
                "Metric unavailable, defaulting to zero"
            );
            Ok(T::default())
        }
    }
}
