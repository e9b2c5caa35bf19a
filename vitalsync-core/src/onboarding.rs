//! First-run capability grants
//!
//! Health access is required to finish onboarding. Usage tracking is
//! optional and never blocks it.

use crate::db::Database;
use crate::error::Result;
use crate::providers::{HealthSampleProvider, UsageSampleProvider};
use crate::types::{CapabilityStatus, Feature, PermissionStatus};

/// What onboarding found and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingReport {
    pub health: CapabilityStatus,
    pub usage_available: bool,
    pub completed: bool,
}

/// Request both capabilities, persist the grants, and mark onboarding
/// complete when health access was granted.
pub async fn run_onboarding(
    health: &HealthSampleProvider,
    usage: &UsageSampleProvider,
    store: &Database,
) -> Result<OnboardingReport> {
    let health_status = health.initialize().await;
    let usage_available = usage.initialize().await;

    store.set_permission(
        Feature::Health,
        if health_status.is_granted() {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        },
    )?;
    store.set_permission(
        Feature::Usage,
        if usage_available {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        },
    )?;

    let completed = health_status.is_granted();
    if completed {
        store.set_onboarding_completed(true)?;
    }

    tracing::info!(
        health = ?health_status,
        usage_available,
        completed,
        "Onboarding finished"
    );

    Ok(OnboardingReport {
        health: health_status,
        usage_available,
        completed,
    })
}

/// Whether the host can skip straight to the dashboard.
pub fn is_onboarded(store: &Database) -> Result<bool> {
    store.onboarding_completed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryConfig, GoalsConfig};
    use crate::providers::file::{FileHealthCapability, FileUsageCapability};
    use crate::providers::AppCategorizer;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn providers(root: &std::path::Path) -> (HealthSampleProvider, UsageSampleProvider) {
        (
            HealthSampleProvider::new(
                Arc::new(FileHealthCapability::new(root)),
                "user-1",
                GoalsConfig::default(),
            ),
            UsageSampleProvider::new(
                Arc::new(FileUsageCapability::new(root)),
                AppCategorizer::from_config(&CategoryConfig::default()),
                "user-1",
            ),
        )
    }

    fn store() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[tokio::test]
    async fn test_missing_usage_does_not_block_onboarding() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("health")).unwrap();
        let (health, usage) = providers(tmp.path());
        let db = store();

        let report = run_onboarding(&health, &usage, &db).await.unwrap();

        assert_eq!(report.health, CapabilityStatus::Granted);
        assert!(!report.usage_available);
        assert!(report.completed);
        assert!(is_onboarded(&db).unwrap());
        assert_eq!(
            db.permission(Feature::Usage).unwrap(),
            PermissionStatus::Denied
        );
    }

    #[tokio::test]
    async fn test_health_required_to_complete() {
        let tmp = TempDir::new().unwrap();
        let (health, usage) = providers(tmp.path());
        let db = store();

        let report = run_onboarding(&health, &usage, &db).await.unwrap();

        assert!(!report.completed);
        assert!(!is_onboarded(&db).unwrap());
        assert_eq!(
            db.permission(Feature::Health).unwrap(),
            PermissionStatus::Denied
        );
    }
}
