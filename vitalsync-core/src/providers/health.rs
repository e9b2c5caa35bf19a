//! Daily health sample provider

use chrono::{NaiveDate, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use super::{metric_or_default, HealthCapability};
use crate::config::GoalsConfig;
use crate::error::{Error, Result};
use crate::types::{CapabilityStatus, DailyHealthSample};

/// Share of total sleep assumed to be deep sleep when stages are missing.
const DEEP_SLEEP_SHARE: f64 = 0.20;
/// Share of total sleep assumed to be REM when stages are missing.
const REM_SLEEP_SHARE: f64 = 0.25;

/// Reads one day of biometrics from a [`HealthCapability`].
pub struct HealthSampleProvider {
    capability: Arc<dyn HealthCapability>,
    user_id: String,
    goals: GoalsConfig,
    status: Mutex<Option<CapabilityStatus>>,
}

impl HealthSampleProvider {
    pub fn new(
        capability: Arc<dyn HealthCapability>,
        user_id: impl Into<String>,
        goals: GoalsConfig,
    ) -> Self {
        Self {
            capability,
            user_id: user_id.into(),
            goals,
            status: Mutex::new(None),
        }
    }

    /// Request access from the platform and remember the outcome.
    pub async fn initialize(&self) -> CapabilityStatus {
        let status = self.capability.request_access().await;
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);

        tracing::info!(
            capability = self.capability.name(),
            ?status,
            "Health capability initialized"
        );
        status
    }

    /// Outcome of the last [`initialize`](Self::initialize), if any.
    pub fn status(&self) -> Option<CapabilityStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_some_and(|s| s.is_granted())
    }

    /// Fetch today's sample (UTC calendar day).
    pub async fn fetch_today(&self) -> Result<DailyHealthSample> {
        self.fetch_for(Utc::now().date_naive()).await
    }

    /// Fetch the sample for `date`. All metrics are read concurrently.
    pub async fn fetch_for(&self, date: NaiveDate) -> Result<DailyHealthSample> {
        if !self.is_ready() {
            return Err(Error::CapabilityUnavailable(format!(
                "{} access is {}",
                self.capability.name(),
                match self.status() {
                    Some(CapabilityStatus::Denied) => "denied",
                    Some(CapabilityStatus::Unavailable) => "unavailable",
                    Some(CapabilityStatus::Granted) => "granted",
                    None => "not initialized",
                }
            )));
        }

        let cap = self.capability.as_ref();
        cap.prepare(date).await;
        let (steps, distance, energy, heart_rate, hrv, sleep, workouts) = tokio::join!(
            cap.steps(date),
            cap.distance_meters(date),
            cap.active_energy_kcal(date),
            cap.heart_rate_bpm(date),
            cap.heart_rate_variability(date),
            cap.sleep(date),
            cap.workouts(date),
        );

        let name = cap.name();
        let steps = metric_or_default(name, "steps", date, steps)?;
        let distance = metric_or_default(name, "distance", date, distance)?;
        let energy = metric_or_default(name, "active_energy", date, energy)?;
        let heart_rate = metric_or_default(name, "heart_rate", date, heart_rate)?;
        let hrv = metric_or_default(name, "heart_rate_variability", date, hrv)?;
        let sleep = metric_or_default(name, "sleep", date, sleep)?;
        let workouts = metric_or_default(name, "workouts", date, workouts)?;

        let sample = DailyHealthSample {
            user_id: self.user_id.clone(),
            timestamp: Utc::now(),
            date,
            steps,
            steps_goal: self.goals.steps,
            distance_meters: distance,
            active_energy_kcal: energy,
            heart_rate_bpm: heart_rate,
            heart_rate_variability: hrv.unwrap_or(0.0),
            sleep_hours: sleep.total_hours,
            sleep_goal_hours: self.goals.sleep_hours,
            deep_sleep_hours: sleep
                .deep_hours
                .unwrap_or(sleep.total_hours * DEEP_SLEEP_SHARE),
            rem_sleep_hours: sleep
                .rem_hours
                .unwrap_or(sleep.total_hours * REM_SLEEP_SHARE),
            workout_count: workouts.count,
            workout_minutes: workouts.minutes,
        }
        .sanitized();

        tracing::debug!(
            %date,
            steps = sample.steps,
            sleep_hours = sample.sleep_hours,
            workouts = sample.workout_count,
            "Fetched health sample"
        );

        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SleepReading, WorkoutReading};
    use async_trait::async_trait;

    struct StubHealth {
        status: CapabilityStatus,
        heart_rate_fails: bool,
        platform_down: bool,
    }

    impl StubHealth {
        fn granted() -> Self {
            Self {
                status: CapabilityStatus::Granted,
                heart_rate_fails: false,
                platform_down: false,
            }
        }
    }

    #[async_trait]
    impl HealthCapability for StubHealth {
        fn name(&self) -> &str {
            "stub"
        }

        async fn request_access(&self) -> CapabilityStatus {
            self.status
        }

        async fn steps(&self, _date: NaiveDate) -> Result<u32> {
            if self.platform_down {
                return Err(Error::CapabilityUnavailable("store offline".into()));
            }
            Ok(8_000)
        }

        async fn distance_meters(&self, _date: NaiveDate) -> Result<f64> {
            Ok(5_600.0)
        }

        async fn active_energy_kcal(&self, _date: NaiveDate) -> Result<f64> {
            Ok(380.0)
        }

        async fn heart_rate_bpm(&self, _date: NaiveDate) -> Result<f64> {
            if self.heart_rate_fails {
                Err(Error::Unknown("no samples".into()))
            } else {
                Ok(64.0)
            }
        }

        async fn sleep(&self, _date: NaiveDate) -> Result<SleepReading> {
            Ok(SleepReading {
                total_hours: 8.0,
                deep_hours: None,
                rem_hours: None,
            })
        }

        async fn workouts(&self, _date: NaiveDate) -> Result<WorkoutReading> {
            Ok(WorkoutReading {
                count: 1,
                minutes: 35.0,
            })
        }
    }

    fn provider(stub: StubHealth) -> HealthSampleProvider {
        HealthSampleProvider::new(Arc::new(stub), "user-1", GoalsConfig::default())
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 2).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_requires_initialize() {
        let provider = provider(StubHealth::granted());
        let err = provider.fetch_for(day()).await.unwrap_err();
        assert!(matches!(err, Error::CapabilityUnavailable(_)));

        assert_eq!(provider.initialize().await, CapabilityStatus::Granted);
        assert!(provider.fetch_for(day()).await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_capability_fails_fetch() {
        let provider = provider(StubHealth {
            status: CapabilityStatus::Denied,
            ..StubHealth::granted()
        });
        assert_eq!(provider.initialize().await, CapabilityStatus::Denied);
        assert!(!provider.is_ready());
        let err = provider.fetch_for(day()).await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_sample_fields_and_sleep_stage_estimate() {
        let provider = provider(StubHealth::granted());
        provider.initialize().await;
        let sample = provider.fetch_for(day()).await.unwrap();

        assert_eq!(sample.date, day());
        assert_eq!(sample.steps, 8_000);
        assert_eq!(sample.steps_goal, 10_000);
        assert_eq!(sample.sleep_goal_hours, 8.0);
        assert_eq!(sample.heart_rate_variability, 0.0);
        assert!((sample.deep_sleep_hours - 1.6).abs() < 1e-9);
        assert!((sample.rem_sleep_hours - 2.0).abs() < 1e-9);
        assert_eq!(sample.workout_count, 1);
    }

    #[tokio::test]
    async fn test_failed_metric_defaults_to_zero() {
        let provider = provider(StubHealth {
            heart_rate_fails: true,
            ..StubHealth::granted()
        });
        provider.initialize().await;
        let sample = provider.fetch_for(day()).await.unwrap();

        assert_eq!(sample.heart_rate_bpm, 0.0);
        assert_eq!(sample.steps, 8_000);
    }

    #[tokio::test]
    async fn test_unreachable_platform_aborts_fetch() {
        let provider = provider(StubHealth {
            platform_down: true,
            ..StubHealth::granted()
        });
        provider.initialize().await;
        let err = provider.fetch_for(day()).await.unwrap_err();
        assert!(matches!(err, Error::CapabilityUnavailable(_)));
    }
}
