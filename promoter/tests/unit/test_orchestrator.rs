//! Promotion orchestrator tests

use std::sync::Arc;

use chrono::Duration;

use promoter::app::options::AppOptions;
use promoter::approval::ApprovalSettings;
use promoter::deploy::orchestrator::is_allowed_promotion;
use promoter::errors::PromoterError;
use promoter::models::approval::{ApprovalStatus, Decision, DEPLOYMENT_PROMOTION};
use promoter::models::deployment::DeploymentStatus;

use crate::common::{promotion, FakeCluster, Harness, APPROVER, REQUESTER};

#[test]
fn test_promotion_edges() {
    assert!(is_allowed_promotion("devnet", "testnet"));
    assert!(is_allowed_promotion("testnet", "mainnet"));
    assert!(!is_allowed_promotion("devnet", "mainnet"));
    assert!(!is_allowed_promotion("mainnet", "testnet"));
    assert!(!is_allowed_promotion("testnet", "testnet"));
}

#[tokio::test]
async fn test_create_request_links_approval() {
    let h = Harness::new(FakeCluster::running(Some("2.2.0")));

    let record = h
        .state
        .orchestrator
        .create_request(promotion("svc-identity", "testnet", "mainnet", "2.3.0"))
        .await
        .unwrap();
    assert_eq!(record.status, DeploymentStatus::PendingApproval);
    assert_eq!(record.previous_image_tag.as_deref(), Some("2.2.0"));
    assert_eq!(record.requested_by, REQUESTER);
    assert_eq!(record.git_commit, "unknown");

    let approval_id = record.approval_request_id.clone().unwrap();
    let approval = h.state.approvals.get(&approval_id).await.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(approval.request_type, DEPLOYMENT_PROMOTION);
    assert_eq!(approval.payload["deployment_id"], record.id.as_str());
    assert_eq!(approval.payload["image_tag"], "2.3.0");

    let window = approval.token_expires_at - approval.created_at;
    assert!(window > Duration::minutes(29) && window <= Duration::minutes(30));

    // Creating a request reads the cluster but never changes it
    assert!(h.cluster.set_image_tags().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_create_request_validation() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let orchestrator = &h.state.orchestrator;

    for request in [
        promotion("svc-identity", "devnet", "mainnet", "v2"),
        promotion("svc-identity", "mainnet", "testnet", "v2"),
        promotion("svc-unknown", "testnet", "mainnet", "v2"),
        promotion("svc-identity", "testnet", "mainnet", "  "),
    ] {
        let result = orchestrator.create_request(request).await;
        assert!(matches!(result, Err(PromoterError::InvalidPromotion(_))));
    }
    assert!(h.state.approvals.list_pending().await.unwrap().is_empty());
    assert!(h.cluster.calls().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_one_active_deployment_per_slot() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    h.request("v2").await.unwrap();

    let result = h.request("v3").await;
    assert!(matches!(result, Err(PromoterError::AlreadyInProgress { .. })));
    assert_eq!(h.state.approvals.list_pending().await.unwrap().len(), 1);

    // A different target environment is a different slot
    h.state
        .orchestrator
        .create_request(promotion("svc-identity", "devnet", "testnet", "v3"))
        .await
        .unwrap();
    h.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_claim_slot_once() {
    let h = Arc::new(Harness::new(FakeCluster::running(Some("v1"))));

    let mut handles = Vec::new();
    for tag in ["v2", "v3", "v4"] {
        let h = h.clone();
        handles.push(tokio::spawn(async move { h.request(tag).await }));
    }
    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, PromoterError::AlreadyInProgress { .. })),
        }
    }
    assert_eq!(created, 1);

    // Losing requests withdrew their approvals
    assert_eq!(h.state.approvals.list_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_approval_moves_deployment() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();
    let approval_id = record.approval_request_id.unwrap();

    h.state
        .approvals
        .vote(&approval_id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let approved = h.state.orchestrator.get(&record.id).await.unwrap();
    assert_eq!(approved.status, DeploymentStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some(APPROVER));
    assert!(approved.approved_at.is_some());
    h.stop().await;
}

#[tokio::test]
async fn test_rejection_cancels_deployment() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();
    let approval_id = record.approval_request_id.unwrap();

    h.state
        .approvals
        .vote(&approval_id, APPROVER, Decision::Reject, Some("freeze week"))
        .await
        .unwrap();

    let cancelled = h.state.orchestrator.get(&record.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert!(cancelled.error_message.unwrap().contains("freeze week"));

    // The slot is free again
    h.request("v3").await.unwrap();
    h.stop().await;
}

#[tokio::test]
async fn test_expired_approval_cancels_deployment() {
    let options = AppOptions {
        approvals: ApprovalSettings {
            validity: Duration::zero(),
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_options(FakeCluster::running(Some("v1")), options);
    let record = h.request("v2").await.unwrap();

    assert_eq!(h.state.approvals.expire_stale().await.unwrap(), 1);
    let cancelled = h.state.orchestrator.get(&record.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    h.stop().await;
}

#[tokio::test]
async fn test_self_approval_leaves_deployment_pending() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();
    let approval_id = record.approval_request_id.unwrap();

    let result = h
        .state
        .approvals
        .vote(&approval_id, REQUESTER, Decision::Approve, None)
        .await;
    assert!(matches!(result, Err(PromoterError::SelfApprovalNotAllowed)));
    assert_eq!(
        h.state.orchestrator.get(&record.id).await.unwrap().status,
        DeploymentStatus::PendingApproval
    );
    h.stop().await;
}

#[tokio::test]
async fn test_execute_requires_approval() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();

    let result = h.state.orchestrator.execute(&record.id, APPROVER).await;
    assert!(matches!(result, Err(PromoterError::NotApproved(_))));
    assert!(h.cluster.set_image_tags().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();
    let approval_id = record.approval_request_id.clone().unwrap();
    h.state
        .approvals
        .vote(&approval_id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let cancelled = h.state.orchestrator.cancel(&record.id, "admin").await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);

    // An approved request cannot be executed once its deployment is gone
    let executed = h.state.approvals.execute(&approval_id, APPROVER).await.unwrap();
    assert!(!executed.execution_result.unwrap().success);
    assert!(h.cluster.set_image_tags().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_withdraws_approval() {
    let h = Harness::new(FakeCluster::running(Some("v1")));
    let record = h.request("v2").await.unwrap();
    let approval_id = record.approval_request_id.clone().unwrap();

    h.state.orchestrator.cancel(&record.id, "admin").await.unwrap();
    let approval = h.state.approvals.get(&approval_id).await.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Cancelled);

    let again = h.state.orchestrator.cancel(&record.id, "admin").await;
    assert!(matches!(again, Err(PromoterError::AlreadyExecuted(_))));
    h.stop().await;
}

#[tokio::test]
async fn test_rollback_without_previous_image() {
    let h = Harness::new(FakeCluster::running(None));
    let record = h.request("v2").await.unwrap();
    assert!(record.previous_image_tag.is_none());
    h.cluster.clear_calls();

    let result = h.state.orchestrator.rollback(&record.id, "admin", "undo").await;
    assert!(matches!(result, Err(PromoterError::PreviousImageNotAvailable(_))));
    assert!(h.cluster.calls().is_empty());

    let stored = h.state.store.get_deployment(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::PendingApproval);
    h.stop().await;
}
