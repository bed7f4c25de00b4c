//! Rollback controller tests

use std::sync::Arc;

use promoter::audit::{AuditLog, HashChainAuditLog};
use promoter::cluster::control::{ClusterControl, ClusterOptions};
use promoter::deploy::rollback::RollbackController;
use promoter::errors::PromoterError;
use promoter::models::deployment::{DeploymentRecord, DeploymentStatus, LogLevel};
use promoter::notify::events;
use promoter::store::{DeploymentLogStore, DeploymentStore, MemoryStore};

use crate::common::{sample_record, FakeCluster, RecordingNotifier};

struct Fixture {
    controller: RollbackController,
    store: Arc<MemoryStore>,
    cluster: Arc<FakeCluster>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<HashChainAuditLog>,
}

async fn fixture(record: DeploymentRecord) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.insert_deployment(record).await.unwrap();

    let cluster = Arc::new(FakeCluster::running(Some("v2")));
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(HashChainAuditLog::new());
    let controller = RollbackController::new(
        store.clone(),
        Arc::new(ClusterControl::new(cluster.clone(), ClusterOptions::default())),
        audit.clone(),
        notifier.clone(),
    );
    Fixture {
        controller,
        store,
        cluster,
        notifier,
        audit,
    }
}

#[tokio::test]
async fn test_rollback_restores_previous_image() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Completed)).await;

    let record = f
        .controller
        .perform_rollback("d-1", "error rate up", "admin")
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::RolledBack);
    assert_eq!(record.rollback_reason.as_deref(), Some("error rate up"));
    assert!(record.rolled_back_at.is_some());

    assert_eq!(f.cluster.image_tag().as_deref(), Some("v1"));
    assert_eq!(f.cluster.set_image_tags(), vec!["v1"]);
    assert_eq!(f.cluster.count(&["rollout", "status"]), 1);
    assert_eq!(f.notifier.events(), vec![events::DEPLOYMENT_ROLLED_BACK]);

    let entries = f.audit.entries().await.unwrap();
    assert_eq!(entries.last().unwrap().action, "deployment.rolled_back");
    assert_eq!(entries.last().unwrap().actor, "admin");
}

#[tokio::test]
async fn test_rollback_without_previous_image_runs_nothing() {
    let mut record = sample_record("d-1", DeploymentStatus::Failed);
    record.previous_image_tag = None;
    let f = fixture(record).await;

    let result = f.controller.perform_rollback("d-1", "broken", "admin").await;
    assert!(matches!(result, Err(PromoterError::PreviousImageNotAvailable(_))));
    assert!(f.cluster.calls().is_empty());

    let stored = f.store.get_deployment("d-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_rollback_rejected_before_execution() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Approved)).await;

    let result = f.controller.perform_rollback("d-1", "oops", "admin").await;
    assert!(matches!(result, Err(PromoterError::InvalidTransition(_))));
    assert!(f.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_waits_for_pipeline_to_release() {
    for status in [DeploymentStatus::InProgress, DeploymentStatus::HealthCheck] {
        let f = fixture(sample_record("d-1", status)).await;
        let result = f.controller.perform_rollback("d-1", "admin call", "admin").await;
        assert!(matches!(result, Err(PromoterError::InvalidTransition(_))));
        assert!(f.cluster.calls().is_empty());
    }

    // A HEALTH_CHECK record the pipeline gave up on
    let mut record = sample_record("d-1", DeploymentStatus::HealthCheck);
    record.error_message = Some("Health checks failed; rollback failed".to_string());
    let f = fixture(record).await;
    let record = f
        .controller
        .perform_rollback("d-1", "manual recovery", "admin")
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::RolledBack);
    assert_eq!(f.cluster.set_image_tags(), vec!["v1"]);
}

#[tokio::test]
async fn test_rollback_twice() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Completed)).await;
    f.controller
        .perform_rollback("d-1", "first", "admin")
        .await
        .unwrap();
    f.cluster.clear_calls();

    let result = f.controller.perform_rollback("d-1", "second", "admin").await;
    assert!(matches!(result, Err(PromoterError::InvalidTransition(_))));
    assert!(f.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_command_failure_keeps_status() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Completed)).await;
    f.cluster.fail_image("v1");

    let result = f.controller.perform_rollback("d-1", "bad release", "admin").await;
    match result {
        Err(PromoterError::RollbackFailed(message)) => {
            assert!(message.contains("unable to update image"))
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let stored = f.store.get_deployment("d-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Completed);
    assert!(f.notifier.events().is_empty());

    let logs = f.store.list_logs("d-1").await.unwrap();
    let last = logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.source, "rollback");
}

#[tokio::test]
async fn test_rollback_rollout_timeout() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Failed)).await;
    f.cluster.set_rollout_ok(false);

    let result = f.controller.perform_rollback("d-1", "unhealthy", "admin").await;
    match result {
        Err(PromoterError::RollbackFailed(message)) => assert!(message.contains("timed out")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_rollback_unknown_deployment() {
    let f = fixture(sample_record("d-1", DeploymentStatus::Completed)).await;
    let result = f.controller.perform_rollback("nope", "x", "admin").await;
    assert!(matches!(result, Err(PromoterError::NotFound(_))));
}
