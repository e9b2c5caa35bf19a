//! Vitality score and biological-age estimate
//!
//! Five components are averaged over a rolling window of health samples,
//! mapped to `[0, 100]` sub-scores through a tier table, then blended by
//! weight. The blend shifts chronological age up or down to give the
//! biological-age estimate.
//!
//! Every threshold lives in [`VitalityPolicy`], which can be overridden from
//! the `[vitality]` section of the config file.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{
    ComponentScore, DailyHealthSample, Priority, Recommendation, RecommendationType,
    VitalityMetric, VitalityScore,
};

/// Sleep goal assumed for samples that carry none.
const FALLBACK_SLEEP_GOAL_HOURS: f64 = 8.0;
const VO2_PROXY_BASE: f64 = 25.0;
const VO2_PROXY_CAP: f64 = 70.0;
/// Years of biological age per point of score away from the neutral 50.
const YEARS_PER_POINT: f64 = 0.2;

/// Whether larger readings are better (HRV) or worse (resting heart rate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// One row of a tier table: readings at or past `threshold` earn `score`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Tier {
    pub threshold: f64,
    pub score: u8,
}

/// Thresholds, weight and advice for one vitality component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricPolicy {
    pub direction: TierDirection,
    /// Checked in order; the first matching tier wins
    pub tiers: Vec<Tier>,
    /// Sub-score when no tier matches. This is the bottom tier.
    pub floor_score: u8,
    pub weight: f64,
    pub recommendation_type: RecommendationType,
    pub message: String,
    pub action: String,
}

impl MetricPolicy {
    fn new(
        direction: TierDirection,
        tiers: &[(f64, u8)],
        weight: f64,
        recommendation_type: RecommendationType,
        message: &str,
        action: &str,
    ) -> Self {
        Self {
            direction,
            tiers: tiers
                .iter()
                .map(|&(threshold, score)| Tier { threshold, score })
                .collect(),
            floor_score: 30,
            weight,
            recommendation_type,
            message: message.to_string(),
            action: action.to_string(),
        }
    }

    /// Map a reading to its sub-score.
    pub fn sub_score(&self, value: f64) -> u8 {
        self.tiers
            .iter()
            .find(|tier| match self.direction {
                TierDirection::HigherIsBetter => value >= tier.threshold,
                TierDirection::LowerIsBetter => value <= tier.threshold,
            })
            .map(|tier| tier.score)
            .unwrap_or(self.floor_score)
            .min(100)
    }
}

/// Policy table for the vitality engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VitalityPolicy {
    /// Sub-scores below this produce a recommendation
    pub attention_threshold: u8,
    /// Sub-score given to a component with no readings in the window
    pub neutral_score: u8,
    pub hrv: MetricPolicy,
    pub resting_heart_rate: MetricPolicy,
    pub sleep_quality: MetricPolicy,
    pub vo2max_proxy: MetricPolicy,
    pub activity_level: MetricPolicy,
}

impl Default for VitalityPolicy {
    fn default() -> Self {
        use RecommendationType::*;
        use TierDirection::*;

        Self {
            attention_threshold: 70,
            neutral_score: 50,
            hrv: MetricPolicy::new(
                HigherIsBetter,
                &[(70.0, 100), (55.0, 85), (40.0, 70), (25.0, 50)],
                0.25,
                Recovery,
                "Heart rate variability is below a healthy range",
                "Prioritize recovery: slow breathing sessions and an earlier bedtime",
            ),
            resting_heart_rate: MetricPolicy::new(
                LowerIsBetter,
                &[(55.0, 100), (62.0, 85), (70.0, 70), (80.0, 50)],
                0.20,
                Exercise,
                "Resting heart rate is elevated",
                "Add three 30-minute zone 2 cardio sessions this week",
            ),
            sleep_quality: MetricPolicy::new(
                HigherIsBetter,
                &[(95.0, 100), (85.0, 85), (75.0, 70), (60.0, 50)],
                0.25,
                Sleep,
                "You are not reaching your sleep goal",
                "Keep a consistent bedtime and protect a full night of sleep",
            ),
            vo2max_proxy: MetricPolicy::new(
                HigherIsBetter,
                &[(50.0, 100), (42.0, 85), (36.0, 70), (30.0, 50)],
                0.15,
                Exercise,
                "Estimated cardio fitness is low",
                "Add interval training twice a week",
            ),
            activity_level: MetricPolicy::new(
                HigherIsBetter,
                &[(600.0, 100), (450.0, 85), (300.0, 70), (150.0, 50)],
                0.15,
                Exercise,
                "Daily active energy is low",
                "Take a brisk 20-minute walk after meals",
            ),
        }
    }
}

impl VitalityPolicy {
    pub fn metric(&self, metric: VitalityMetric) -> &MetricPolicy {
        match metric {
            VitalityMetric::Hrv => &self.hrv,
            VitalityMetric::RestingHeartRate => &self.resting_heart_rate,
            VitalityMetric::SleepQuality => &self.sleep_quality,
            VitalityMetric::Vo2MaxProxy => &self.vo2max_proxy,
            VitalityMetric::ActivityLevel => &self.activity_level,
        }
    }
}

/// Compute the vitality score for someone born in `birth_year`, as of `as_of`.
///
/// `window` is only read. Components without readings get the neutral
/// sub-score and never produce a recommendation.
pub fn compute_vitality_score(
    birth_year: i32,
    window: &[DailyHealthSample],
    as_of: NaiveDate,
    policy: &VitalityPolicy,
) -> Result<VitalityScore> {
    let chronological_age = as_of.year() - birth_year;
    if chronological_age < 1 {
        return Err(Error::InvalidInput(format!(
            "birth year {} gives a chronological age of {} on {}",
            birth_year, chronological_age, as_of
        )));
    }
    let chronological_age = chronological_age as u32;

    let samples: Vec<DailyHealthSample> = window.iter().map(|s| s.sanitized()).collect();

    let mut components = BTreeMap::new();
    let mut flagged: Vec<(Priority, u8, &MetricPolicy)> = Vec::new();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for metric in VitalityMetric::ALL {
        let metric_policy = policy.metric(metric);
        let value = component_value(metric, &samples);

        let score = match value {
            Some(v) => metric_policy.sub_score(v),
            None => policy.neutral_score.min(100),
        };

        if value.is_some() && score < policy.attention_threshold {
            let priority = if score <= metric_policy.floor_score {
                Priority::High
            } else {
                Priority::Medium
            };
            flagged.push((priority, score, metric_policy));
        }

        let weight = metric_policy.weight.max(0.0);
        weighted_sum += f64::from(score) * weight;
        total_weight += weight;

        components.insert(
            metric,
            ComponentScore {
                value: round_to(value.unwrap_or(0.0), 1),
                score,
            },
        );
    }

    let score = if total_weight > 0.0 {
        (weighted_sum / total_weight).round().clamp(0.0, 100.0) as u8
    } else {
        policy.neutral_score.min(100)
    };

    let biological_age = round_to(
        (f64::from(chronological_age) + (50.0 - f64::from(score)) * YEARS_PER_POINT).max(1.0),
        1,
    );
    let aging_rate = round_to(biological_age / f64::from(chronological_age), 2);

    // Stable sort keeps metric order among equal (priority, score) pairs.
    flagged.sort_by_key(|(priority, score, _)| (*priority, *score));
    let recommendations = flagged
        .into_iter()
        .map(|(priority, _, metric_policy)| Recommendation {
            kind: metric_policy.recommendation_type,
            priority,
            message: metric_policy.message.clone(),
            action: metric_policy.action.clone(),
        })
        .collect();

    Ok(VitalityScore {
        biological_age,
        chronological_age,
        aging_rate,
        score,
        components,
        recommendations,
    })
}

/// Window value of one component, or `None` when no sample reports it.
fn component_value(metric: VitalityMetric, samples: &[DailyHealthSample]) -> Option<f64> {
    match metric {
        VitalityMetric::Hrv => mean_positive(samples.iter().map(|s| s.heart_rate_variability)),
        VitalityMetric::RestingHeartRate => {
            mean_positive(samples.iter().map(|s| s.heart_rate_bpm))
        }
        VitalityMetric::SleepQuality => mean_positive(samples.iter().map(|s| {
            let goal = if s.sleep_goal_hours > 0.0 {
                s.sleep_goal_hours
            } else {
                FALLBACK_SLEEP_GOAL_HOURS
            };
            (s.sleep_hours / goal).min(1.0) * 100.0
        })),
        VitalityMetric::Vo2MaxProxy => {
            let active: Vec<&DailyHealthSample> = samples
                .iter()
                .filter(|s| s.steps > 0 || s.workout_minutes > 0.0)
                .collect();
            if active.is_empty() {
                return None;
            }
            let n = active.len() as f64;
            let steps = active.iter().map(|s| f64::from(s.steps)).sum::<f64>() / n;
            let minutes = active.iter().map(|s| s.workout_minutes).sum::<f64>() / n;
            Some((VO2_PROXY_BASE + 1.2 * (steps / 1000.0) + 0.1 * minutes).min(VO2_PROXY_CAP))
        }
        VitalityMetric::ActivityLevel => {
            mean_positive(samples.iter().map(|s| s.active_energy_kcal))
        }
    }
}

/// Mean of the positive readings; zero readings mean "not measured".
fn mean_positive(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|v| *v > 0.0)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    fn day(
        offset: i64,
        hrv: f64,
        resting_hr: f64,
        sleep_hours: f64,
        steps: u32,
        workout_minutes: f64,
        kcal: f64,
    ) -> DailyHealthSample {
        let mut sample =
            DailyHealthSample::empty("user-1", as_of() - chrono::Duration::days(offset));
        sample.heart_rate_variability = hrv;
        sample.heart_rate_bpm = resting_hr;
        sample.sleep_hours = sleep_hours;
        sample.sleep_goal_hours = 8.0;
        sample.steps = steps;
        sample.workout_count = u32::from(workout_minutes > 0.0);
        sample.workout_minutes = workout_minutes;
        sample.active_energy_kcal = kcal;
        sample
    }

    #[test]
    fn test_healthy_window() {
        let window: Vec<_> = (0..7)
            .map(|i| day(i, 75.0, 52.0, 8.0, 12_000, 45.0, 650.0))
            .collect();

        let vitality =
            compute_vitality_score(1995, &window, as_of(), &VitalityPolicy::default()).unwrap();

        assert_eq!(vitality.chronological_age, 30);
        assert_eq!(vitality.components[&VitalityMetric::Hrv].score, 100);
        assert_eq!(vitality.components[&VitalityMetric::Vo2MaxProxy].value, 43.9);
        assert_eq!(vitality.components[&VitalityMetric::Vo2MaxProxy].score, 85);
        assert_eq!(vitality.score, 98);
        assert!((vitality.biological_age - 20.4).abs() < 1e-9);
        assert!((vitality.aging_rate - 0.68).abs() < 1e-9);
        assert!(vitality.recommendations.is_empty());
    }

    #[test]
    fn test_poor_window_ranks_recommendations() {
        let window: Vec<_> = (0..5)
            .map(|i| day(i, 20.0, 85.0, 5.0, 3_000, 0.0, 200.0))
            .collect();

        let vitality =
            compute_vitality_score(1995, &window, as_of(), &VitalityPolicy::default()).unwrap();

        assert_eq!(vitality.score, 38);
        assert!((vitality.biological_age - 32.4).abs() < 1e-9);
        assert!((vitality.aging_rate - 1.08).abs() < 1e-9);

        let ranked: Vec<_> = vitality
            .recommendations
            .iter()
            .map(|r| (r.kind, r.priority))
            .collect();
        assert_eq!(
            ranked,
            vec![
                (RecommendationType::Recovery, Priority::High),
                (RecommendationType::Exercise, Priority::High),
                (RecommendationType::Exercise, Priority::High),
                (RecommendationType::Sleep, Priority::Medium),
                (RecommendationType::Exercise, Priority::Medium),
            ]
        );
    }

    #[test]
    fn test_empty_window_is_neutral() {
        let vitality =
            compute_vitality_score(1980, &[], as_of(), &VitalityPolicy::default()).unwrap();

        assert_eq!(vitality.score, 50);
        assert_eq!(vitality.chronological_age, 45);
        assert_eq!(vitality.biological_age, 45.0);
        assert_eq!(vitality.aging_rate, 1.0);
        assert_eq!(vitality.components.len(), 5);
        assert!(vitality.recommendations.is_empty());
    }

    #[test]
    fn test_missing_hrv_does_not_recommend() {
        let window = vec![day(0, 0.0, 58.0, 8.0, 10_000, 30.0, 500.0)];
        let vitality =
            compute_vitality_score(1990, &window, as_of(), &VitalityPolicy::default()).unwrap();

        assert_eq!(vitality.components[&VitalityMetric::Hrv].score, 50);
        assert!(vitality
            .recommendations
            .iter()
            .all(|r| r.kind != RecommendationType::Recovery));
    }

    #[test]
    fn test_window_is_not_mutated() {
        let window = vec![day(0, -5.0, f64::NAN, 9.0, 4_000, 0.0, 100.0)];
        let before = format!("{:?}", window);
        let _ = compute_vitality_score(1990, &window, as_of(), &VitalityPolicy::default());
        assert_eq!(format!("{:?}", window), before);
    }

    #[test]
    fn test_rejects_future_birth_year() {
        let result = compute_vitality_score(2025, &[], as_of(), &VitalityPolicy::default());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        let result = compute_vitality_score(2031, &[], as_of(), &VitalityPolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_aging_rate_positive_for_very_young_and_poor() {
        let window = vec![day(0, 10.0, 100.0, 2.0, 100, 0.0, 50.0)];
        let vitality =
            compute_vitality_score(2024, &window, as_of(), &VitalityPolicy::default()).unwrap();
        assert!(vitality.aging_rate > 0.0);
        assert!(vitality.biological_age >= 1.0);
    }

    #[test]
    fn test_policy_overrides_from_toml() {
        let toml = r#"
attention_threshold = 90

[hrv]
direction = "higher_is_better"
tiers = [{ threshold = 100.0, score = 100 }]
floor_score = 10
weight = 1.0
recommendation_type = "recovery"
message = "Low HRV"
action = "Rest"
"#;
        let policy: VitalityPolicy = toml::from_str(toml).unwrap();
        assert_eq!(policy.attention_threshold, 90);
        assert_eq!(policy.hrv.sub_score(60.0), 10);
        assert_eq!(policy.sleep_quality, VitalityPolicy::default().sleep_quality);
    }

    #[test]
    fn test_lower_is_better_tiers() {
        let policy = VitalityPolicy::default();
        assert_eq!(policy.resting_heart_rate.sub_score(50.0), 100);
        assert_eq!(policy.resting_heart_rate.sub_score(62.0), 85);
        assert_eq!(policy.resting_heart_rate.sub_score(75.0), 50);
        assert_eq!(policy.resting_heart_rate.sub_score(95.0), 30);
    }
}
