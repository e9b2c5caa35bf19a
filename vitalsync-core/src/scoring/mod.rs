//! Scoring engines
//!
//! Both engines are pure: they read samples and return derived records
//! without touching storage, the clock or the network. Anything historical
//! (previous scores, the rolling biometric window, "today") is passed in.
//!
//! - [`productivity`]: daily composite score with an auditable breakdown and streak
//! - [`vitality`]: biological-age estimate from a rolling window of health samples

pub mod productivity;
pub mod vitality;

pub use productivity::{compute_productivity_score, streak_days, STREAK_THRESHOLD};
pub use vitality::{compute_vitality_score, MetricPolicy, Tier, TierDirection, VitalityPolicy};
