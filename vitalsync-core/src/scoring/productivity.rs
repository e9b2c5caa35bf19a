//! Daily productivity score
//!
//! Starts at a base of 50, adds one component per signal (steps, sleep,
//! focus sessions, workouts), subtracts penalties for missed minimums and
//! clamps to `[0, 100]`.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::types::{
    non_negative, DailyHealthSample, DailyScore, DailyUsageSample, ProductivityScore,
    ScoreBreakdown,
};

const BASE_SCORE: i32 = 50;

/// A past day counts towards the streak when its score is strictly above this.
pub const STREAK_THRESHOLD: u8 = 70;

const MIN_STEPS: u32 = 5_000;
const MIN_SLEEP_HOURS: f64 = 6.0;
const WORKOUT_COMPONENT_CAP: u8 = 20;

/// Steps bonus: 20 / 15 / 10 / 0.
pub fn steps_component(steps: u32) -> u8 {
    match steps {
        10_000.. => 20,
        7_500..=9_999 => 15,
        5_000..=7_499 => 10,
        _ => 0,
    }
}

/// Sleep bonus: 15 / 10 / 5 / 0.
pub fn sleep_component(sleep_hours: f64) -> u8 {
    let hours = non_negative(sleep_hours);
    if hours >= 8.0 {
        15
    } else if hours >= 7.0 {
        10
    } else if hours >= 6.0 {
        5
    } else {
        0
    }
}

/// Focus bonus: 15 / 10 / 5 / 0.
pub fn focus_component(focus_sessions: u32) -> u8 {
    match focus_sessions {
        4.. => 15,
        2..=3 => 10,
        1 => 5,
        _ => 0,
    }
}

/// Workout bonus: 10 for any workout, +5 at an hour or +3 at half an hour.
pub fn workout_component(workout_count: u32, workout_minutes: f64) -> u8 {
    if workout_count == 0 {
        return 0;
    }

    let minutes = non_negative(workout_minutes);
    let bonus = if minutes >= 60.0 {
        5
    } else if minutes >= 30.0 {
        3
    } else {
        0
    };

    (10 + bonus).min(WORKOUT_COMPONENT_CAP)
}

/// Compute the productivity score for the day of `health`.
///
/// `usage` is optional; without it the focus component is 0. `history` holds
/// persisted scores of other days and is only used for the streak.
pub fn compute_productivity_score(
    health: &DailyHealthSample,
    usage: Option<&DailyUsageSample>,
    history: &[DailyScore],
) -> ProductivityScore {
    let sleep_hours = non_negative(health.sleep_hours);
    let focus_sessions = usage.map(|u| u.focus_session_count).unwrap_or(0);

    let breakdown = ScoreBreakdown {
        steps_component: steps_component(health.steps),
        sleep_component: sleep_component(sleep_hours),
        focus_component: focus_component(focus_sessions),
        workout_component: workout_component(health.workout_count, health.workout_minutes),
    };

    let mut total = BASE_SCORE
        + i32::from(breakdown.steps_component)
        + i32::from(breakdown.sleep_component)
        + i32::from(breakdown.focus_component)
        + i32::from(breakdown.workout_component);

    if health.steps < MIN_STEPS {
        total -= 10;
    }
    if sleep_hours < MIN_SLEEP_HOURS {
        total -= 10;
    }
    if health.workout_count == 0 {
        total -= 5;
    }

    ProductivityScore {
        user_id: health.user_id.clone(),
        date: health.date,
        score: total.clamp(0, 100) as u8,
        breakdown,
        streak_days: streak_days(health.date, history),
    }
}

/// Count consecutive days before `date` whose persisted score is above
/// [`STREAK_THRESHOLD`]. Stops at the first missing or sub-threshold day.
pub fn streak_days(date: NaiveDate, history: &[DailyScore]) -> u32 {
    let by_date: BTreeMap<NaiveDate, u8> = history.iter().map(|s| (s.date, s.score)).collect();

    let mut streak = 0;
    let mut day = date.pred_opt();
    while let Some(d) = day {
        match by_date.get(&d) {
            Some(score) if *score > STREAK_THRESHOLD => {
                streak += 1;
                day = d.pred_opt();
            }
            _ => break,
        }
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyUsageSample;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn health(steps: u32, sleep_hours: f64, workouts: u32, minutes: f64) -> DailyHealthSample {
        let mut sample = DailyHealthSample::empty("user-1", date(2025, 3, 10));
        sample.steps = steps;
        sample.steps_goal = 10_000;
        sample.sleep_hours = sleep_hours;
        sample.sleep_goal_hours = 8.0;
        sample.workout_count = workouts;
        sample.workout_minutes = minutes;
        sample
    }

    fn usage(focus_sessions: u32) -> DailyUsageSample {
        let mut sample = DailyUsageSample::zero_filled("user-1", date(2025, 3, 10));
        sample.focus_session_count = focus_sessions;
        sample
    }

    #[test]
    fn test_best_day_clamps_to_100() {
        let score = compute_productivity_score(&health(10_000, 8.0, 1, 45.0), Some(&usage(4)), &[]);

        assert_eq!(score.breakdown.steps_component, 20);
        assert_eq!(score.breakdown.sleep_component, 15);
        assert_eq!(score.breakdown.focus_component, 15);
        assert_eq!(score.breakdown.workout_component, 13);
        assert_eq!(score.score, 100);
        assert_eq!(score.streak_days, 0);
    }

    #[test]
    fn test_all_penalties_apply() {
        let score = compute_productivity_score(&health(3_000, 5.0, 0, 0.0), None, &[]);

        assert_eq!(score.breakdown, ScoreBreakdown::default());
        assert_eq!(score.score, 25);
    }

    #[test]
    fn test_steps_component_is_monotonic() {
        let mut previous = 0;
        for steps in (0..=20_000).step_by(250) {
            let component = steps_component(steps);
            assert!([0, 10, 15, 20].contains(&component));
            assert!(component >= previous, "dropped at {} steps", steps);
            previous = component;
        }
        assert_eq!(steps_component(u32::MAX), 20);
    }

    #[test]
    fn test_workout_component_tiers() {
        assert_eq!(workout_component(0, 120.0), 0);
        assert_eq!(workout_component(1, 10.0), 10);
        assert_eq!(workout_component(2, 30.0), 13);
        assert_eq!(workout_component(3, 90.0), 15);
        assert_eq!(workout_component(1, f64::NAN), 10);
    }

    #[test]
    fn test_score_stays_in_bounds_for_adversarial_input() {
        let cases = [
            health(0, -40.0, 0, -5.0),
            health(u32::MAX, f64::MAX, u32::MAX, f64::INFINITY),
            health(0, f64::NAN, 0, f64::NAN),
        ];
        for case in &cases {
            for focus in [0, 1, u32::MAX] {
                let score = compute_productivity_score(case, Some(&usage(focus)), &[]);
                assert!(score.score <= 100);
            }
        }

        let nan_sleep = compute_productivity_score(&health(0, f64::NAN, 0, 0.0), None, &[]);
        assert_eq!(nan_sleep.score, 25, "NaN sleep counts as no sleep");
    }

    #[test]
    fn test_identical_inputs_give_identical_output() {
        let h = health(8_200, 7.4, 1, 35.0);
        let u = usage(2);
        let history = [DailyScore {
            date: date(2025, 3, 9),
            score: 82,
        }];

        let first = compute_productivity_score(&h, Some(&u), &history);
        let second = compute_productivity_score(&h, Some(&u), &history);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_streak_counts_back_from_previous_day() {
        let history = [
            DailyScore {
                date: date(2025, 3, 9),
                score: 71,
            },
            DailyScore {
                date: date(2025, 3, 8),
                score: 95,
            },
            DailyScore {
                date: date(2025, 3, 7),
                score: 70,
            },
            DailyScore {
                date: date(2025, 3, 6),
                score: 99,
            },
            // Today's own score never counts
            DailyScore {
                date: date(2025, 3, 10),
                score: 100,
            },
        ];

        assert_eq!(streak_days(date(2025, 3, 10), &history), 2);
    }

    #[test]
    fn test_streak_stops_at_gap() {
        let history = [
            DailyScore {
                date: date(2025, 3, 9),
                score: 90,
            },
            DailyScore {
                date: date(2025, 3, 7),
                score: 90,
            },
        ];

        assert_eq!(streak_days(date(2025, 3, 10), &history), 1);
        assert_eq!(streak_days(date(2025, 3, 10), &[]), 0);
    }

    #[test]
    fn test_streak_flows_into_score() {
        let history = [
            DailyScore {
                date: date(2025, 3, 9),
                score: 88,
            },
            DailyScore {
                date: date(2025, 3, 8),
                score: 76,
            },
        ];
        let score = compute_productivity_score(&health(9_000, 7.0, 1, 20.0), None, &history);
        assert_eq!(score.streak_days, 2);
        // 50 + 15 + 10 + 0 + 10
        assert_eq!(score.score, 85);
    }
}
