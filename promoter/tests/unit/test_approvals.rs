//! Approval request lifecycle tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use secrecy::ExposeSecret;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use promoter::approval::{
    ApprovalExecutor, ApprovalRequestManager, ApprovalSettings, ExecutorRegistry,
    NewApprovalRequest,
};
use promoter::audit::{AuditLog, HashChainAuditLog};
use promoter::errors::PromoterError;
use promoter::models::approval::{ApprovalRequest, ApprovalStatus, Decision};
use promoter::notify::events;
use promoter::store::MemoryStore;
use promoter::workers::expiry;

use crate::common::{RecordingNotifier, APPROVER, REQUESTER};

const ROTATE_KEYS: &str = "ROTATE_KEYS";

/// Handler counting its invocations
#[derive(Default)]
struct CountingExecutor {
    executed: AtomicUsize,
    resolved: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ApprovalExecutor for CountingExecutor {
    async fn execute(
        &self,
        request: &ApprovalRequest,
        executor_id: &str,
    ) -> Result<serde_json::Value, PromoterError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PromoterError::CommandError("key store unreachable".to_string()));
        }
        Ok(json!({ "rotated": request.target_resource, "by": executor_id }))
    }

    async fn on_resolved(&self, _request: &ApprovalRequest) -> Result<(), PromoterError> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    manager: ApprovalRequestManager,
    executor: Arc<CountingExecutor>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<HashChainAuditLog>,
}

fn fixture(settings: ApprovalSettings, executor: CountingExecutor) -> Fixture {
    let executor = Arc::new(executor);
    let registry = Arc::new(ExecutorRegistry::new());
    registry.register(ROTATE_KEYS, executor.clone());

    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(HashChainAuditLog::new());
    let manager = ApprovalRequestManager::new(
        Arc::new(MemoryStore::new()),
        registry,
        audit.clone(),
        notifier.clone(),
        settings,
    );
    Fixture {
        manager,
        executor,
        notifier,
        audit,
    }
}

fn default_fixture() -> Fixture {
    fixture(ApprovalSettings::default(), CountingExecutor::default())
}

fn new_request() -> NewApprovalRequest {
    NewApprovalRequest {
        requester_id: REQUESTER.to_string(),
        request_type: ROTATE_KEYS.to_string(),
        action: "Rotate signing keys".to_string(),
        target_resource: "mainnet/svc-wallet".to_string(),
        payload: json!({ "key_id": "k-1" }),
        reason: "scheduled rotation".to_string(),
    }
}

#[tokio::test]
async fn test_create_opens_pending_request() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    assert_eq!(request.status, ApprovalStatus::Pending);
    assert!(request.token_expires_at > request.created_at);
    let token = request.approval_token.as_ref().unwrap();
    assert_eq!(token.expose_secret().len(), 43);
    assert_eq!(f.notifier.events(), vec![events::APPROVAL_CREATED]);

    let entries = f.audit.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "approval.created");
}

#[tokio::test]
async fn test_tokens_are_unique() {
    let f = default_fixture();
    let a = f.manager.create(new_request()).await.unwrap();
    let b = f.manager.create(new_request()).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(
        a.approval_token.unwrap().expose_secret(),
        b.approval_token.unwrap().expose_secret()
    );
}

#[tokio::test]
async fn test_max_pending_per_requester() {
    let f = fixture(
        ApprovalSettings {
            max_pending_per_requester: 2,
            ..Default::default()
        },
        CountingExecutor::default(),
    );
    let first = assert_ok!(f.manager.create(new_request()).await);
    assert_ok!(f.manager.create(new_request()).await);

    let result = f.manager.create(new_request()).await;
    assert!(matches!(result, Err(PromoterError::MaxPendingExceeded(2))));

    // Another requester is unaffected
    let mut other = new_request();
    other.requester_id = "carol".to_string();
    assert_ok!(f.manager.create(other).await);

    // Deciding one frees a slot
    f.manager
        .vote(&first.id, APPROVER, Decision::Reject, Some("not now"))
        .await
        .unwrap();
    assert_ok!(f.manager.create(new_request()).await);
}

#[tokio::test]
async fn test_approve_clears_token() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    let approved = f
        .manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.approver_id.as_deref(), Some(APPROVER));
    assert!(approved.approved_at.is_some());
    assert!(approved.approval_token.is_none());
    assert_eq!(f.executor.resolved.load(Ordering::SeqCst), 1);
    assert!(f.notifier.events().contains(&events::APPROVAL_APPROVED.to_string()));
}

#[tokio::test]
async fn test_reject_records_reason() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    let rejected = f
        .manager
        .vote(&request.id, APPROVER, Decision::Reject, Some("wrong key"))
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("wrong key"));
    assert!(rejected.rejected_at.is_some());
    assert!(rejected.approved_at.is_none());
}

#[tokio::test]
async fn test_self_approval_not_allowed() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    for decision in [Decision::Approve, Decision::Reject] {
        let result = f.manager.vote(&request.id, REQUESTER, decision, None).await;
        assert!(matches!(result, Err(PromoterError::SelfApprovalNotAllowed)));
    }
    let stored = f.manager.get(&request.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn test_second_vote_is_already_processed() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();
    f.manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let result = f
        .manager
        .vote(&request.id, "carol", Decision::Reject, None)
        .await;
    assert!(matches!(result, Err(PromoterError::AlreadyProcessed(_))));
    assert_eq!(
        f.manager.get(&request.id).await.unwrap().status,
        ApprovalStatus::Approved
    );
}

#[tokio::test]
async fn test_concurrent_votes_commit_once() {
    let f = Arc::new(default_fixture());
    let request = f.manager.create(new_request()).await.unwrap();

    let mut handles = Vec::new();
    for (voter, decision) in [("bob", Decision::Approve), ("carol", Decision::Reject)] {
        let f = f.clone();
        let id = request.id.clone();
        handles.push(tokio::spawn(async move {
            f.manager.vote(&id, voter, decision, None).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(e) => assert!(matches!(e, PromoterError::AlreadyProcessed(_))),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(f.executor.resolved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_vote_after_expiry() {
    let f = fixture(
        ApprovalSettings {
            validity: Duration::zero(),
            ..Default::default()
        },
        CountingExecutor::default(),
    );
    let request = f.manager.create(new_request()).await.unwrap();

    let result = f
        .manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await;
    assert!(matches!(result, Err(PromoterError::Expired(_))));

    let stored = f.manager.get(&request.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Expired);
    assert!(stored.approval_token.is_none());
    assert_eq!(f.executor.resolved.load(Ordering::SeqCst), 1);

    // Terminal now, so a retry is not an expiry any more
    let retry = f
        .manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await;
    assert!(matches!(retry, Err(PromoterError::AlreadyProcessed(_))));
}

#[tokio::test]
async fn test_expire_stale_sweeps_pending() {
    let f = fixture(
        ApprovalSettings {
            validity: Duration::zero(),
            ..Default::default()
        },
        CountingExecutor::default(),
    );
    f.manager.create(new_request()).await.unwrap();
    f.manager.create(new_request()).await.unwrap();

    assert!(f.manager.list_pending().await.unwrap().is_empty());
    assert_eq!(f.manager.expire_stale().await.unwrap(), 2);
    assert_eq!(f.manager.expire_stale().await.unwrap(), 0);
}

#[tokio::test]
async fn test_expired_requests_do_not_count_as_pending() {
    let f = fixture(
        ApprovalSettings {
            validity: Duration::zero(),
            max_pending_per_requester: 1,
        },
        CountingExecutor::default(),
    );
    assert_ok!(f.manager.create(new_request()).await);
    assert_ok!(f.manager.create(new_request()).await);
}

#[tokio::test]
async fn test_cancel_only_by_requester() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    let result = f.manager.cancel(&request.id, APPROVER).await;
    assert!(matches!(result, Err(PromoterError::Unauthorized(_))));

    let cancelled = f.manager.cancel(&request.id, REQUESTER).await.unwrap();
    assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
    assert!(f.notifier.events().contains(&events::APPROVAL_CANCELLED.to_string()));

    assert_err!(f.manager.cancel(&request.id, REQUESTER).await);
}

#[tokio::test]
async fn test_revoke_is_noop_once_decided() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();
    f.manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let revoked = f.manager.revoke(&request.id, "admin").await.unwrap();
    assert!(revoked.is_none());
    assert_eq!(
        f.manager.get(&request.id).await.unwrap().status,
        ApprovalStatus::Approved
    );
}

#[tokio::test]
async fn test_execute_runs_handler_once() {
    let f = default_fixture();
    let request = f.manager.create(new_request()).await.unwrap();

    let result = f.manager.execute(&request.id, APPROVER).await;
    assert!(matches!(result, Err(PromoterError::NotApproved(_))));

    f.manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();
    let executed = f.manager.execute(&request.id, APPROVER).await.unwrap();
    assert!(executed.executed_at.is_some());
    let outcome = executed.execution_result.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.output.unwrap()["rotated"], "mainnet/svc-wallet");

    let again = f.manager.execute(&request.id, APPROVER).await;
    assert!(matches!(again, Err(PromoterError::AlreadyProcessed(_))));
    assert_eq!(f.executor.executed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_decided_without_approval() {
    let f = default_fixture();
    let rejected = f.manager.create(new_request()).await.unwrap();
    f.manager
        .vote(&rejected.id, APPROVER, Decision::Reject, Some("not now"))
        .await
        .unwrap();
    let cancelled = f.manager.create(new_request()).await.unwrap();
    f.manager.cancel(&cancelled.id, REQUESTER).await.unwrap();

    for id in [&rejected.id, &cancelled.id] {
        let result = f.manager.execute(id, APPROVER).await;
        assert!(matches!(result, Err(PromoterError::AlreadyProcessed(_))));
        assert!(f.manager.get(id).await.unwrap().executed_at.is_none());
    }
    assert_eq!(f.executor.executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_execute_stores_handler_failure() {
    let f = fixture(
        ApprovalSettings::default(),
        CountingExecutor {
            fail: true,
            ..Default::default()
        },
    );
    let request = f.manager.create(new_request()).await.unwrap();
    f.manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let executed = f.manager.execute(&request.id, APPROVER).await.unwrap();
    let outcome = executed.execution_result.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("key store unreachable"));

    let payload = &f.notifier.payloads(events::APPROVAL_EXECUTED)[0];
    assert_eq!(payload["success"], false);
}

#[tokio::test]
async fn test_execute_without_handler() {
    let f = default_fixture();
    let mut unknown = new_request();
    unknown.request_type = "WIPE_DATABASE".to_string();
    let request = f.manager.create(unknown).await.unwrap();
    f.manager
        .vote(&request.id, APPROVER, Decision::Approve, None)
        .await
        .unwrap();

    let result = f.manager.execute(&request.id, APPROVER).await;
    assert!(matches!(result, Err(PromoterError::ExecutionFailed(_))));
    assert!(f.manager.get(&request.id).await.unwrap().executed_at.is_none());
}

#[tokio::test]
async fn test_unknown_request_not_found() {
    let f = default_fixture();
    let result = f.manager.vote("missing", APPROVER, Decision::Approve, None).await;
    assert!(matches!(result, Err(PromoterError::NotFound(_))));
}

#[tokio::test]
async fn test_expiry_worker_sweeps_until_shutdown() {
    let f = fixture(
        ApprovalSettings {
            validity: Duration::zero(),
            ..Default::default()
        },
        CountingExecutor::default(),
    );
    let request = f.manager.create(new_request()).await.unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let options = expiry::Options {
        interval: std::time::Duration::from_millis(5),
    };
    let worker = expiry::run(
        &options,
        &f.manager,
        tokio::time::sleep,
        Box::pin(async move {
            let _ = shutdown_rx.await;
        }),
    );
    let driver = async {
        for _ in 0..200 {
            if f.manager.get(&request.id).await.unwrap().status == ApprovalStatus::Expired {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let _ = shutdown_tx.send(());
    };
    tokio::join!(worker, driver);

    assert_eq!(
        f.manager.get(&request.id).await.unwrap().status,
        ApprovalStatus::Expired
    );
    assert_eq!(f.executor.resolved.load(Ordering::SeqCst), 1);
}
