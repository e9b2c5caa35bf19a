//! Daily usage sample provider, app categorization and focus sessions

use chrono::{NaiveDate, Utc};
use std::iter::Enumerate;
use std::slice::Iter;
use std::sync::{Arc, Mutex, PoisonError};

use super::{metric_or_default, UsageCapability};
use crate::config::CategoryConfig;
use crate::error::{Error, Result};
use crate::types::{non_negative, AppCategory, AppInterval, CapabilityStatus, DailyUsageSample};

/// Productive minutes that make up one focus session.
pub const FOCUS_SESSION_MINUTES: f64 = 30.0;

/// Assigns an [`AppCategory`] by substring match against allow-lists.
///
/// Productive entries are checked first, so an app matching both lists is
/// productive.
#[derive(Debug, Clone, Default)]
pub struct AppCategorizer {
    productive: Vec<String>,
    entertainment: Vec<String>,
}

impl AppCategorizer {
    pub fn new(productive: Vec<String>, entertainment: Vec<String>) -> Self {
        Self {
            productive,
            entertainment,
        }
    }

    pub fn from_config(config: &CategoryConfig) -> Self {
        Self::new(config.productive.clone(), config.entertainment.clone())
    }

    pub fn categorize(&self, app_id: &str) -> AppCategory {
        if self.productive.iter().any(|p| app_id.contains(p.as_str())) {
            AppCategory::Productive
        } else if self.entertainment.iter().any(|e| app_id.contains(e.as_str())) {
            AppCategory::Entertainment
        } else {
            AppCategory::Neutral
        }
    }
}

/// A completed focus session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusSession {
    /// Index of the interval that completed the session
    pub end_index: usize,
    /// Productive minutes accumulated in the run
    pub minutes: f64,
}

/// Lazily walks intervals and yields a [`FocusSession`] each time an
/// uninterrupted run of productive intervals reaches
/// [`FOCUS_SESSION_MINUTES`]. Any non-productive interval resets the run.
pub struct FocusSessions<'a> {
    intervals: Enumerate<Iter<'a, AppInterval>>,
    running: f64,
}

impl Iterator for FocusSessions<'_> {
    type Item = FocusSession;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, interval) in self.intervals.by_ref() {
            if interval.category != AppCategory::Productive {
                self.running = 0.0;
                continue;
            }

            self.running += non_negative(interval.minutes_spent);
            if self.running >= FOCUS_SESSION_MINUTES {
                let minutes = self.running;
                self.running = 0.0;
                return Some(FocusSession {
                    end_index: index,
                    minutes,
                });
            }
        }
        None
    }
}

pub fn focus_sessions(intervals: &[AppInterval]) -> FocusSessions<'_> {
    FocusSessions {
        intervals: intervals.iter().enumerate(),
        running: 0.0,
    }
}

pub fn count_focus_sessions(intervals: &[AppInterval]) -> u32 {
    focus_sessions(intervals).count() as u32
}

/// Reads one day of device usage from a [`UsageCapability`].
///
/// Usage tracking is optional: when the capability is not granted the
/// provider reports it as unavailable and callers can fall back to
/// [`fetch_today_or_default`](Self::fetch_today_or_default).
pub struct UsageSampleProvider {
    capability: Arc<dyn UsageCapability>,
    categorizer: AppCategorizer,
    user_id: String,
    available: Mutex<Option<bool>>,
}

impl UsageSampleProvider {
    pub fn new(
        capability: Arc<dyn UsageCapability>,
        categorizer: AppCategorizer,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            capability,
            categorizer,
            user_id: user_id.into(),
            available: Mutex::new(None),
        }
    }

    /// Request access. Returns whether usage data can be read.
    pub async fn initialize(&self) -> bool {
        let status = self.capability.request_access().await;
        let available = status == CapabilityStatus::Granted;
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) = Some(available);

        if available {
            tracing::info!(
                capability = self.capability.name(),
                "Usage capability initialized"
            );
        } else {
            tracing::info!(
                capability = self.capability.name(),
                ?status,
                "Usage tracking not available on this platform"
            );
        }
        available
    }

    pub fn is_available(&self) -> bool {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(false)
    }

    pub async fn fetch_today(&self) -> Result<DailyUsageSample> {
        self.fetch_for(Utc::now().date_naive()).await
    }

    pub async fn fetch_for(&self, date: NaiveDate) -> Result<DailyUsageSample> {
        if !self.is_available() {
            return Err(Error::CapabilityUnavailable(format!(
                "{} usage tracking is not available",
                self.capability.name()
            )));
        }

        let cap = self.capability.as_ref();
        cap.prepare(date).await;
        let (apps, pickups, notifications) =
            tokio::join!(cap.app_usage(date), cap.pickups(date), cap.notifications(date));

        let name = cap.name();
        let apps = metric_or_default(name, "app_usage", date, apps)?;
        let pickups = metric_or_default(name, "pickups", date, pickups)?;
        let notifications = metric_or_default(name, "notifications", date, notifications)?;

        let app_intervals: Vec<AppInterval> = apps
            .into_iter()
            .map(|raw| {
                let category = self.categorizer.categorize(&raw.app_id);
                AppInterval::new(raw.app_id, category, non_negative(raw.minutes_spent))
            })
            .collect();

        let minutes_in = |category: AppCategory| -> f64 {
            app_intervals
                .iter()
                .filter(|i| i.category == category)
                .map(|i| i.minutes_spent)
                .sum()
        };

        let sample = DailyUsageSample {
            user_id: self.user_id.clone(),
            timestamp: Utc::now(),
            date,
            total_screen_minutes: app_intervals.iter().map(|i| i.minutes_spent).sum(),
            productive_minutes: minutes_in(AppCategory::Productive),
            entertainment_minutes: minutes_in(AppCategory::Entertainment),
            focus_session_count: count_focus_sessions(&app_intervals),
            pickups,
            notifications,
            app_intervals,
        };

        tracing::debug!(
            %date,
            screen_minutes = sample.total_screen_minutes,
            focus_sessions = sample.focus_session_count,
            "Fetched usage sample"
        );

        Ok(sample)
    }

    /// Today's sample, or a zero-filled one when usage cannot be read.
    pub async fn fetch_today_or_default(&self) -> DailyUsageSample {
        let date = Utc::now().date_naive();
        match self.fetch_for(date).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!(error = %e, "Using zero-filled usage sample");
                DailyUsageSample::zero_filled(self.user_id.clone(), date)
            }
        }
    }
}
