//! File-backed capabilities
//!
//! Reads daily JSON exports written by a companion app or a manual export:
//!
//! ```text
//! <root>/health/2025-04-02.json
//! <root>/usage/2025-04-02.json
//! ```
//!
//! The capability is granted when the `health/` (or `usage/`) directory
//! exists and unavailable otherwise. A missing day file or a missing field
//! reads as an unavailable metric, not as a capability failure.
//!
//! [`prepare`](HealthCapability::prepare) reads the day file once, and every
//! getter of that fetch answers from the same parsed export.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{HealthCapability, RawAppUsage, SleepReading, UsageCapability, WorkoutReading};
use crate::error::{Error, Result};
use crate::types::CapabilityStatus;

/// Contents of `health/<date>.json`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthExport {
    pub steps: Option<u32>,
    pub distance_meters: Option<f64>,
    pub active_energy_kcal: Option<f64>,
    pub heart_rate_bpm: Option<f64>,
    pub heart_rate_variability: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub deep_sleep_hours: Option<f64>,
    pub rem_sleep_hours: Option<f64>,
    pub workout_count: Option<u32>,
    pub workout_minutes: Option<f64>,
}

/// Contents of `usage/<date>.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageExport {
    pub app_usage: Vec<RawAppUsage>,
    pub pickups: Option<u32>,
    pub notifications: Option<u32>,
}

fn day_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.json", date.format("%Y-%m-%d")))
}

async fn read_export<T: DeserializeOwned>(dir: &Path, date: NaiveDate) -> Result<T> {
    if !dir.is_dir() {
        return Err(Error::CapabilityUnavailable(format!(
            "export directory {} is missing",
            dir.display()
        )));
    }

    let content = tokio::fs::read_to_string(day_file(dir, date)).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Parsed export of the day last prepared. `None` inside means the day file
/// could not be read or parsed.
type Snapshot<T> = Option<(NaiveDate, Option<Arc<T>>)>;

/// One day's export, read once per fetch.
#[derive(Debug)]
struct DayExport<T> {
    dir: PathBuf,
    snapshot: Mutex<Snapshot<T>>,
}

impl<T: DeserializeOwned> DayExport<T> {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            snapshot: Mutex::new(None),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Snapshot<T>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn prepare(&self, date: NaiveDate) {
        if !self.dir.is_dir() {
            *self.slot() = None;
            return;
        }

        let export = match read_export::<T>(&self.dir, date).await {
            Ok(export) => Some(Arc::new(export)),
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), %date, error = %e, "No readable export");
                None
            }
        };
        *self.slot() = Some((date, export));
    }

    async fn get(&self, date: NaiveDate) -> Result<Arc<T>> {
        let prepared = match self.slot().as_ref() {
            Some((day, export)) if *day == date => Some(export.clone()),
            _ => None,
        };

        match prepared {
            Some(Some(export)) => Ok(export),
            Some(None) => Err(Error::Unknown(format!(
                "no readable export in {} for {}",
                self.dir.display(),
                date
            ))),
            None => Ok(Arc::new(read_export(&self.dir, date).await?)),
        }
    }
}

fn access_for(dir: &Path) -> CapabilityStatus {
    if dir.is_dir() {
        CapabilityStatus::Granted
    } else {
        CapabilityStatus::Unavailable
    }
}

fn missing(metric: &str, date: NaiveDate) -> Error {
    Error::Unknown(format!("{} not recorded for {}", metric, date))
}

/// Health capability over `<root>/health/<date>.json`.
#[derive(Debug)]
pub struct FileHealthCapability {
    export: DayExport<HealthExport>,
}

impl FileHealthCapability {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            export: DayExport::new(root.as_ref().join("health")),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.export.dir
    }

    async fn export(&self, date: NaiveDate) -> Result<Arc<HealthExport>> {
        self.export.get(date).await
    }
}

#[async_trait]
impl HealthCapability for FileHealthCapability {
    fn name(&self) -> &str {
        "file"
    }

    async fn request_access(&self) -> CapabilityStatus {
        access_for(self.dir())
    }

    async fn prepare(&self, date: NaiveDate) {
        self.export.prepare(date).await;
    }

    async fn steps(&self, date: NaiveDate) -> Result<u32> {
        self.export(date)
            .await?
            .steps
            .ok_or_else(|| missing("steps", date))
    }

    async fn distance_meters(&self, date: NaiveDate) -> Result<f64> {
        self.export(date)
            .await?
            .distance_meters
            .ok_or_else(|| missing("distance", date))
    }

    async fn active_energy_kcal(&self, date: NaiveDate) -> Result<f64> {
        self.export(date)
            .await?
            .active_energy_kcal
            .ok_or_else(|| missing("active energy", date))
    }

    async fn heart_rate_bpm(&self, date: NaiveDate) -> Result<f64> {
        self.export(date)
            .await?
            .heart_rate_bpm
            .ok_or_else(|| missing("heart rate", date))
    }

    async fn heart_rate_variability(&self, date: NaiveDate) -> Result<Option<f64>> {
        Ok(self.export(date).await?.heart_rate_variability)
    }

    async fn sleep(&self, date: NaiveDate) -> Result<SleepReading> {
        let export = self.export(date).await?;
        let total_hours = export.sleep_hours.ok_or_else(|| missing("sleep", date))?;
        Ok(SleepReading {
            total_hours,
            deep_hours: export.deep_sleep_hours,
            rem_hours: export.rem_sleep_hours,
        })
    }

    async fn workouts(&self, date: NaiveDate) -> Result<WorkoutReading> {
        let export = self.export(date).await?;
        Ok(WorkoutReading {
            count: export.workout_count.unwrap_or(0),
            minutes: export.workout_minutes.unwrap_or(0.0),
        })
    }
}

/// Usage capability over `<root>/usage/<date>.json`.
#[derive(Debug)]
pub struct FileUsageCapability {
    export: DayExport<UsageExport>,
}

impl FileUsageCapability {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            export: DayExport::new(root.as_ref().join("usage")),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.export.dir
    }

    async fn export(&self, date: NaiveDate) -> Result<Arc<UsageExport>> {
        self.export.get(date).await
    }
}

#[async_trait]
impl UsageCapability for FileUsageCapability {
    fn name(&self) -> &str {
        "file"
    }

    async fn request_access(&self) -> CapabilityStatus {
        access_for(self.dir())
    }

    async fn prepare(&self, date: NaiveDate) {
        self.export.prepare(date).await;
    }

    async fn app_usage(&self, date: NaiveDate) -> Result<Vec<RawAppUsage>> {
        Ok(self.export(date).await?.app_usage.clone())
    }

    async fn pickups(&self, date: NaiveDate) -> Result<u32> {
        self.export(date)
            .await?
            .pickups
            .ok_or_else(|| missing("pickups", date))
    }

    async fn notifications(&self, date: NaiveDate) -> Result<u32> {
        self.export(date)
            .await?
            .notifications
            .ok_or_else(|| missing("notifications", date))
    }
}
