//! FSM unit tests

use promoter::deploy::fsm::{
    advance, can_transition, patch, pipeline_released, transition, DeploymentEvent,
};
use promoter::errors::PromoterError;
use promoter::models::deployment::DeploymentStatus;
use promoter::store::{DeploymentStore, MemoryStore};

use crate::common::sample_record;

#[test]
fn test_fsm_rollback_sources() {
    for status in [
        DeploymentStatus::HealthCheck,
        DeploymentStatus::Failed,
        DeploymentStatus::Completed,
    ] {
        assert_eq!(
            transition(status, DeploymentEvent::RollBack).unwrap(),
            DeploymentStatus::RolledBack
        );
    }
    for status in [
        DeploymentStatus::PendingApproval,
        DeploymentStatus::Approved,
        DeploymentStatus::InProgress,
        DeploymentStatus::Cancelled,
        DeploymentStatus::RolledBack,
    ] {
        assert!(!can_transition(status, DeploymentEvent::RollBack));
    }

    // Only the owning pipeline aborts a rollout, and only once it has
    // moved past the image update
    for status in [DeploymentStatus::HealthCheck, DeploymentStatus::Failed] {
        assert_eq!(
            transition(status, DeploymentEvent::AbortRollout).unwrap(),
            DeploymentStatus::RolledBack
        );
    }
    assert!(!can_transition(DeploymentStatus::InProgress, DeploymentEvent::AbortRollout));
    assert!(!can_transition(DeploymentStatus::Completed, DeploymentEvent::AbortRollout));
}

#[test]
fn test_fsm_pipeline_release() {
    assert!(!pipeline_released(&sample_record("d-1", DeploymentStatus::InProgress)));
    assert!(!pipeline_released(&sample_record("d-1", DeploymentStatus::HealthCheck)));
    assert!(pipeline_released(&sample_record("d-1", DeploymentStatus::Completed)));
    assert!(pipeline_released(&sample_record("d-1", DeploymentStatus::Failed)));

    let mut stuck = sample_record("d-1", DeploymentStatus::HealthCheck);
    stuck.error_message = Some("rollback failed".to_string());
    assert!(pipeline_released(&stuck));
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let events = [
        DeploymentEvent::Approve,
        DeploymentEvent::Cancel,
        DeploymentEvent::Start,
        DeploymentEvent::BeginHealthCheck,
        DeploymentEvent::Complete,
        DeploymentEvent::Fail,
    ];
    for status in [
        DeploymentStatus::Completed,
        DeploymentStatus::Failed,
        DeploymentStatus::RolledBack,
        DeploymentStatus::Cancelled,
    ] {
        assert!(!status.is_active());
        for event in events {
            assert!(!can_transition(status, event), "{:?} accepted {:?}", status, event);
        }
    }
}

#[tokio::test]
async fn test_fsm_advance_applies_fields() {
    let store = MemoryStore::new();
    store
        .insert_deployment(sample_record("d-1", DeploymentStatus::Approved))
        .await
        .unwrap();

    let record = advance(&store, "d-1", DeploymentEvent::Start, |r| {
        r.executed_by = Some("bob".to_string());
    })
    .await
    .unwrap();
    assert_eq!(record.status, DeploymentStatus::InProgress);
    assert_eq!(record.executed_by.as_deref(), Some("bob"));

    let stored = store.get_deployment("d-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::InProgress);
}

#[tokio::test]
async fn test_fsm_advance_rejects_invalid_event() {
    let store = MemoryStore::new();
    store
        .insert_deployment(sample_record("d-1", DeploymentStatus::PendingApproval))
        .await
        .unwrap();

    let result = advance(&store, "d-1", DeploymentEvent::Complete, |r| {
        r.error_message = Some("should not be written".to_string());
    })
    .await;
    assert!(matches!(result, Err(PromoterError::InvalidTransition(_))));

    let stored = store.get_deployment("d-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::PendingApproval);
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn test_fsm_patch_keeps_status() {
    let store = MemoryStore::new();
    store
        .insert_deployment(sample_record("d-1", DeploymentStatus::HealthCheck))
        .await
        .unwrap();

    let record = patch(&store, "d-1", |r| r.error_message = Some("note".to_string()))
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::HealthCheck);
    assert_eq!(record.error_message.as_deref(), Some("note"));

    let missing = patch(&store, "nope", |_| {}).await;
    assert!(matches!(missing, Err(PromoterError::NotFound(_))));
}
