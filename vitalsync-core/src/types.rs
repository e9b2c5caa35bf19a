//! Core domain types for vitalsync
//!
//! These types are the records exchanged between capability providers, the
//! scoring engines, the local state store and the remote dashboard.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Sample** | One calendar day of raw readings from a capability (health or usage) |
//! | **Capability** | A platform data source (health API, screen-time API) behind an opaque grant |
//! | **Focus session** | A run of productive app usage totalling at least 30 minutes |
//! | **Streak** | Consecutive prior days with a productivity score above 70 |
//! | **Aging rate** | Biological age divided by chronological age |
//!
//! All wire records serialize with camelCase field names so they can be
//! posted to the dashboard unchanged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SyncFailure;

/// Replace NaN, infinite and negative readings with zero.
pub(crate) fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

// ============================================
// Capabilities
// ============================================

/// Outcome of asking a platform capability for access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Access granted; reads may proceed
    Granted,
    /// The user refused access
    Denied,
    /// The platform does not offer this capability at all
    Unavailable,
}

impl CapabilityStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, CapabilityStatus::Granted)
    }
}

/// Persisted permission state for one feature, as shown during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    #[default]
    NotRequested,
    Denied,
    Granted,
}

/// Features that require a capability grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Health,
    Usage,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Health => "health",
            Feature::Usage => "usage",
        }
    }
}

// ============================================
// Health samples
// ============================================

/// One day of biometric readings.
///
/// Metrics the capability could not provide are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyHealthSample {
    pub user_id: String,
    /// When the sample was read
    pub timestamp: DateTime<Utc>,
    /// Calendar day key (UTC)
    pub date: NaiveDate,
    pub steps: u32,
    pub steps_goal: u32,
    pub distance_meters: f64,
    pub active_energy_kcal: f64,
    pub heart_rate_bpm: f64,
    pub heart_rate_variability: f64,
    pub sleep_hours: f64,
    pub sleep_goal_hours: f64,
    pub deep_sleep_hours: f64,
    pub rem_sleep_hours: f64,
    pub workout_count: u32,
    pub workout_minutes: f64,
}

impl DailyHealthSample {
    /// An all-zero sample for `date`.
    pub fn empty(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: Utc::now(),
            date,
            steps: 0,
            steps_goal: 0,
            distance_meters: 0.0,
            active_energy_kcal: 0.0,
            heart_rate_bpm: 0.0,
            heart_rate_variability: 0.0,
            sleep_hours: 0.0,
            sleep_goal_hours: 0.0,
            deep_sleep_hours: 0.0,
            rem_sleep_hours: 0.0,
            workout_count: 0,
            workout_minutes: 0.0,
        }
    }

    /// Copy with every float reading made finite and non-negative, and sleep
    /// stages clamped to the total sleep duration.
    pub fn sanitized(&self) -> Self {
        let sleep_hours = non_negative(self.sleep_hours);
        let deep = non_negative(self.deep_sleep_hours).min(sleep_hours);
        let rem = non_negative(self.rem_sleep_hours).min(sleep_hours - deep);
        Self {
            distance_meters: non_negative(self.distance_meters),
            active_energy_kcal: non_negative(self.active_energy_kcal),
            heart_rate_bpm: non_negative(self.heart_rate_bpm),
            heart_rate_variability: non_negative(self.heart_rate_variability),
            sleep_hours,
            sleep_goal_hours: non_negative(self.sleep_goal_hours),
            deep_sleep_hours: deep,
            rem_sleep_hours: rem,
            workout_minutes: non_negative(self.workout_minutes),
            ..self.clone()
        }
    }
}

// ============================================
// Usage samples
// ============================================

/// Category assigned to an app by the configured allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppCategory {
    Productive,
    Entertainment,
    Neutral,
}

/// A single categorized stretch of app usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInterval {
    /// Bundle or package identifier
    pub app_id: String,
    pub category: AppCategory,
    pub minutes_spent: f64,
}

impl AppInterval {
    pub fn new(app_id: impl Into<String>, category: AppCategory, minutes_spent: f64) -> Self {
        Self {
            app_id: app_id.into(),
            category,
            minutes_spent,
        }
    }
}

/// One day of device usage.
///
/// Totals are derived from `app_intervals`, so
/// `productive_minutes + entertainment_minutes <= total_screen_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsageSample {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub total_screen_minutes: f64,
    pub productive_minutes: f64,
    pub entertainment_minutes: f64,
    pub focus_session_count: u32,
    pub pickups: u32,
    pub notifications: u32,
    /// Chronologically ordered
    pub app_intervals: Vec<AppInterval>,
}

impl DailyUsageSample {
    /// Zero-filled sample used when usage tracking is unsupported.
    pub fn zero_filled(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: Utc::now(),
            date,
            total_screen_minutes: 0.0,
            productive_minutes: 0.0,
            entertainment_minutes: 0.0,
            focus_session_count: 0,
            pickups: 0,
            notifications: 0,
            app_intervals: Vec::new(),
        }
    }
}

// ============================================
// Productivity score
// ============================================

/// Per-signal contributions to a productivity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub steps_component: u8,
    pub sleep_component: u8,
    pub focus_component: u8,
    pub workout_component: u8,
}

/// Daily productivity score in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityScore {
    pub user_id: String,
    pub date: NaiveDate,
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub streak_days: u32,
}

/// A persisted score for one past day, as used for streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyScore {
    pub date: NaiveDate,
    pub score: u8,
}

/// Verbal rating of a productivity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLabel {
    Excellent,
    Great,
    Good,
    Fair,
    Average,
    NeedsImprovement,
}

impl ScoreLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => ScoreLabel::Excellent,
            80..=89 => ScoreLabel::Great,
            70..=79 => ScoreLabel::Good,
            60..=69 => ScoreLabel::Fair,
            50..=59 => ScoreLabel::Average,
            _ => ScoreLabel::NeedsImprovement,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ScoreLabel::Excellent => "Excellent",
            ScoreLabel::Great => "Great",
            ScoreLabel::Good => "Good",
            ScoreLabel::Fair => "Fair",
            ScoreLabel::Average => "Average",
            ScoreLabel::NeedsImprovement => "Needs Improvement",
        }
    }
}

/// Color band of a productivity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Green,
    Amber,
    Orange,
    Red,
}

impl ScoreBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => ScoreBand::Green,
            60..=79 => ScoreBand::Amber,
            40..=59 => ScoreBand::Orange,
            _ => ScoreBand::Red,
        }
    }

    /// Hex color for dashboards.
    pub fn hex(&self) -> &'static str {
        match self {
            ScoreBand::Green => "#4CAF50",
            ScoreBand::Amber => "#FFC107",
            ScoreBand::Orange => "#FF9800",
            ScoreBand::Red => "#F44336",
        }
    }
}

// ============================================
// Vitality score
// ============================================

/// Biometric components blended into the vitality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VitalityMetric {
    #[serde(rename = "hrv")]
    Hrv,
    #[serde(rename = "restingHR")]
    RestingHeartRate,
    #[serde(rename = "sleepQuality")]
    SleepQuality,
    #[serde(rename = "vo2maxProxy")]
    Vo2MaxProxy,
    #[serde(rename = "activityLevel")]
    ActivityLevel,
}

impl VitalityMetric {
    pub const ALL: [VitalityMetric; 5] = [
        VitalityMetric::Hrv,
        VitalityMetric::RestingHeartRate,
        VitalityMetric::SleepQuality,
        VitalityMetric::Vo2MaxProxy,
        VitalityMetric::ActivityLevel,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            VitalityMetric::Hrv => "HRV",
            VitalityMetric::RestingHeartRate => "Resting HR",
            VitalityMetric::SleepQuality => "Sleep",
            VitalityMetric::Vo2MaxProxy => "VO2 Max",
            VitalityMetric::ActivityLevel => "Activity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            VitalityMetric::Hrv => "ms",
            VitalityMetric::RestingHeartRate => "bpm",
            VitalityMetric::SleepQuality => "%",
            VitalityMetric::Vo2MaxProxy => "",
            VitalityMetric::ActivityLevel => "kcal",
        }
    }
}

/// Raw window value of a component and its `[0, 100]` sub-score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScore {
    pub value: f64,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Sleep,
    Exercise,
    Recovery,
    Cognitive,
}

/// Ordered so that `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub priority: Priority,
    pub message: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalityScore {
    pub biological_age: f64,
    pub chronological_age: u32,
    /// Always positive
    pub aging_rate: f64,
    pub score: u8,
    pub components: BTreeMap<VitalityMetric, ComponentScore>,
    /// Ranked, high priority first; empty when nothing needs attention
    pub recommendations: Vec<Recommendation>,
}

/// Direction of aging relative to the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingTrend {
    Reversing,
    Slowing,
    Normal,
    Accelerating,
}

impl AgingTrend {
    pub fn from_rate(rate: f64) -> Self {
        if rate < 0.9 {
            AgingTrend::Reversing
        } else if rate < 1.0 {
            AgingTrend::Slowing
        } else if rate < 1.1 {
            AgingTrend::Normal
        } else {
            AgingTrend::Accelerating
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AgingTrend::Reversing => "Reversing aging",
            AgingTrend::Slowing => "Slowing aging",
            AgingTrend::Normal => "Aging normally",
            AgingTrend::Accelerating => "Aging faster",
        }
    }
}

// ============================================
// Sync state
// ============================================

/// Persisted, process-wide sync status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Last fully successful sync
    pub last_sync: Option<DateTime<Utc>>,
    /// True only while one sync is in flight
    pub is_syncing: bool,
    /// Message of the most recent failure; cleared by a successful sync
    pub error: Option<String>,
}

/// A failed sync waiting to be retried. FIFO by enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueEntry {
    pub id: uuid::Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub failure_reason: String,
    pub failure_class: crate::error::FailureClass,
}

impl RetryQueueEntry {
    pub fn new(failure: &SyncFailure, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            enqueued_at,
            failure_reason: failure.message.clone(),
            failure_class: failure.class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DailyHealthSample {
        DailyHealthSample {
            user_id: "user-1".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2025-03-04T07:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            steps: 8421,
            steps_goal: 10000,
            distance_meters: 6120.5,
            active_energy_kcal: 412.0,
            heart_rate_bpm: 61.0,
            heart_rate_variability: 48.5,
            sleep_hours: 7.25,
            sleep_goal_hours: 8.0,
            deep_sleep_hours: 1.45,
            rem_sleep_hours: 1.8,
            workout_count: 1,
            workout_minutes: 42.0,
        }
    }

    #[test]
    fn test_health_sample_wire_round_trip() {
        let original = sample();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: DailyHealthSample = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_health_sample_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["date"], "2025-03-04");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["stepsGoal"], 10000);
        assert_eq!(value["heartRateVariability"], 48.5);
        assert!(value.get("workoutMinutes").is_some());
    }

    #[test]
    fn test_sanitized_clamps_bad_readings() {
        let mut raw = sample();
        raw.sleep_hours = 5.0;
        raw.deep_sleep_hours = 4.0;
        raw.rem_sleep_hours = 3.0;
        raw.distance_meters = -12.0;
        raw.heart_rate_variability = f64::NAN;

        let clean = raw.sanitized();
        assert_eq!(clean.distance_meters, 0.0);
        assert_eq!(clean.heart_rate_variability, 0.0);
        assert_eq!(clean.deep_sleep_hours, 4.0);
        assert_eq!(clean.rem_sleep_hours, 1.0);
        assert!(clean.deep_sleep_hours + clean.rem_sleep_hours <= clean.sleep_hours);
    }

    #[test]
    fn test_score_label_thresholds() {
        assert_eq!(ScoreLabel::from_score(100), ScoreLabel::Excellent);
        assert_eq!(ScoreLabel::from_score(85), ScoreLabel::Great);
        assert_eq!(ScoreLabel::from_score(70), ScoreLabel::Good);
        assert_eq!(ScoreLabel::from_score(69), ScoreLabel::Fair);
        assert_eq!(ScoreLabel::from_score(50), ScoreLabel::Average);
        assert_eq!(ScoreLabel::from_score(0), ScoreLabel::NeedsImprovement);
        assert_eq!(ScoreBand::from_score(80), ScoreBand::Green);
        assert_eq!(ScoreBand::from_score(39).hex(), "#F44336");
    }

    #[test]
    fn test_aging_trend() {
        assert_eq!(AgingTrend::from_rate(0.85), AgingTrend::Reversing);
        assert_eq!(AgingTrend::from_rate(0.95), AgingTrend::Slowing);
        assert_eq!(AgingTrend::from_rate(1.0), AgingTrend::Normal);
        assert_eq!(AgingTrend::from_rate(1.25), AgingTrend::Accelerating);
    }

    #[test]
    fn test_vitality_components_serialize_by_metric_name() {
        let mut components = BTreeMap::new();
        components.insert(
            VitalityMetric::RestingHeartRate,
            ComponentScore {
                value: 58.0,
                score: 85,
            },
        );
        let json = serde_json::to_value(&components).unwrap();
        assert_eq!(json["restingHR"]["score"], 85);
    }

    #[test]
    fn test_priority_orders_high_first() {
        let mut priorities = vec![Priority::Medium, Priority::Low, Priority::High];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }
}
