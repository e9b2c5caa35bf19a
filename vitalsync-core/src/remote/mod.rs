//! Remote dashboard sink
//!
//! The dashboard is an opaque HTTP sink/source. Pushes must be idempotent on
//! the server side per date key, since a failed sync retries all three
//! pushes even when some of them already landed.

mod http;

pub use http::{HttpSink, HEALTH_LATEST_PATH, HEALTH_SYNC_PATH, SCORE_PATH, SCREENTIME_SYNC_PATH};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DailyHealthSample, DailyUsageSample, ProductivityScore};

/// Where synced records go, and where dashboard reads come from.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push_health(&self, sample: &DailyHealthSample) -> Result<()>;

    async fn push_usage(&self, sample: &DailyUsageSample) -> Result<()>;

    async fn push_score(&self, score: &ProductivityScore) -> Result<()>;

    /// Latest health sample known to the dashboard, `None` if it has none.
    async fn latest_health(&self) -> Result<Option<DailyHealthSample>>;

    /// Latest productivity score known to the dashboard.
    async fn latest_score(&self) -> Result<Option<ProductivityScore>>;
}
