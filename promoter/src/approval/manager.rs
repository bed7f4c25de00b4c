//! Approval request lifecycle: create, vote, cancel, execute, expire.
//!
//! Every PENDING → terminal write is a conditional update on the stored
//! status, so of two concurrent votes at most one is committed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::approval::registry::ExecutorRegistry;
use crate::audit::{self, AuditLog};
use crate::errors::PromoterError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, Decision, ExecutionResult};
use crate::notify::{events, Notifier};
use crate::store::Store;
use crate::utils::{generate_token, generate_uuid};

const RESOURCE_TYPE: &str = "approval_request";
const SYSTEM_ACTOR: &str = "system";

/// Approval settings
#[derive(Debug, Clone)]
pub struct ApprovalSettings {
    /// How long a new request stays open for votes
    pub validity: Duration,

    /// Open requests one requester may hold at once
    pub max_pending_per_requester: usize,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            validity: Duration::minutes(30),
            max_pending_per_requester: 10,
        }
    }
}

/// Parameters of a new approval request
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub requester_id: String,
    pub request_type: String,
    pub action: String,
    pub target_resource: String,
    pub payload: serde_json::Value,
    pub reason: String,
}

pub struct ApprovalRequestManager {
    store: Arc<dyn Store>,
    registry: Arc<ExecutorRegistry>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    settings: ApprovalSettings,
}

impl ApprovalRequestManager {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ExecutorRegistry>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
        settings: ApprovalSettings,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            notifier,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ApprovalSettings {
        &self.settings
    }

    /// Open a PENDING request with a fresh token
    pub async fn create(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, PromoterError> {
        let now = Utc::now();
        let pending = self.store.count_pending_for(&new.requester_id, now).await?;
        if pending >= self.settings.max_pending_per_requester {
            return Err(PromoterError::MaxPendingExceeded(pending));
        }

        let request = ApprovalRequest {
            id: generate_uuid(),
            request_type: new.request_type,
            requester_id: new.requester_id,
            action: new.action,
            target_resource: new.target_resource,
            payload: new.payload,
            reason: new.reason,
            status: ApprovalStatus::Pending,
            approval_token: Some(SecretString::from(generate_token())),
            token_expires_at: now + self.settings.validity,
            approver_id: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            executed_at: None,
            execution_result: None,
            created_at: now,
        };
        self.store.insert_approval(request.clone()).await?;

        info!(
            approval_id = %request.id,
            request_type = %request.request_type,
            requester = %request.requester_id,
            "Approval request created"
        );
        self.record_audit(
            &request.requester_id,
            "approval.created",
            &request.id,
            json!({
                "request_type": request.request_type,
                "action": request.action,
                "target_resource": request.target_resource,
            }),
        )
        .await;
        self.notifier.notify(
            events::APPROVAL_CREATED,
            json!({
                "approval_id": request.id,
                "request_type": request.request_type,
                "requester_id": request.requester_id,
                "action": request.action,
                "target_resource": request.target_resource,
                "reason": request.reason,
                "expires_at": request.token_expires_at,
            }),
        );

        Ok(request)
    }

    /// Approve or reject a PENDING request.
    ///
    /// A vote arriving after the validity window flips the request to
    /// EXPIRED and fails with `Expired`.
    pub async fn vote(
        &self,
        id: &str,
        approver_id: &str,
        decision: Decision,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest, PromoterError> {
        let request = self.get(id).await?;
        if request.status.is_terminal() {
            return Err(PromoterError::AlreadyProcessed(format!(
                "approval request {} is {}",
                id, request.status
            )));
        }

        let now = Utc::now();
        if request.is_expired_at(now) {
            self.expire(id).await?;
            return Err(PromoterError::Expired(id.to_string()));
        }
        if approver_id == request.requester_id {
            return Err(PromoterError::SelfApprovalNotAllowed);
        }

        let approver = approver_id.to_string();
        let rejection_reason = reason.map(str::to_string);
        let updated = self
            .store
            .update_approval(
                id,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status != ApprovalStatus::Pending || r.is_expired_at(now) {
                        return false;
                    }
                    r.approver_id = Some(approver);
                    r.approval_token = None;
                    match decision {
                        Decision::Approve => {
                            r.status = ApprovalStatus::Approved;
                            r.approved_at = Some(now);
                        }
                        Decision::Reject => {
                            r.status = ApprovalStatus::Rejected;
                            r.rejected_at = Some(now);
                            r.rejection_reason = rejection_reason;
                        }
                    }
                    true
                }),
            )
            .await?
            .ok_or_else(|| {
                PromoterError::AlreadyProcessed(format!("approval request {} was decided concurrently", id))
            })?;

        let (action, event) = match decision {
            Decision::Approve => ("approval.approved", events::APPROVAL_APPROVED),
            Decision::Reject => ("approval.rejected", events::APPROVAL_REJECTED),
        };
        info!(approval_id = id, approver = approver_id, "Approval request {}", updated.status);
        self.record_audit(
            approver_id,
            action,
            id,
            json!({ "decision": decision, "reason": reason }),
        )
        .await;
        self.notifier.notify(
            event,
            json!({
                "approval_id": id,
                "request_type": updated.request_type,
                "requester_id": updated.requester_id,
                "approver_id": approver_id,
                "target_resource": updated.target_resource,
                "reason": reason,
            }),
        );
        self.dispatch_resolved(&updated).await;

        Ok(updated)
    }

    /// Withdraw a PENDING request; only its requester may do so
    pub async fn cancel(&self, id: &str, requester_id: &str) -> Result<ApprovalRequest, PromoterError> {
        let request = self.get(id).await?;
        if request.requester_id != requester_id {
            return Err(PromoterError::Unauthorized(format!(
                "only the requester can cancel approval request {}",
                id
            )));
        }
        if request.status != ApprovalStatus::Pending {
            return Err(PromoterError::AlreadyProcessed(format!(
                "approval request {} is {}",
                id, request.status
            )));
        }

        let cancelled = self
            .transition_pending(id, ApprovalStatus::Cancelled)
            .await?
            .ok_or_else(|| {
                PromoterError::AlreadyProcessed(format!("approval request {} was decided concurrently", id))
            })?;
        self.announce_cancelled(&cancelled, requester_id).await;
        self.dispatch_resolved(&cancelled).await;

        Ok(cancelled)
    }

    /// Cancel a request on behalf of the resource it gates. Returns `None`
    /// if it was no longer PENDING.
    pub async fn revoke(&self, id: &str, actor: &str) -> Result<Option<ApprovalRequest>, PromoterError> {
        let revoked = self.transition_pending(id, ApprovalStatus::Cancelled).await?;
        if let Some(request) = &revoked {
            self.announce_cancelled(request, actor).await;
        }
        Ok(revoked)
    }

    /// Run the registered handler of an APPROVED request, once.
    ///
    /// The handler's outcome is always stored on the request; a failing
    /// handler yields `success = false` rather than an error.
    pub async fn execute(&self, id: &str, executor_id: &str) -> Result<ApprovalRequest, PromoterError> {
        let request = self.get(id).await?;
        if request.executed_at.is_some() {
            return Err(PromoterError::AlreadyProcessed(format!(
                "approval request {} was already executed",
                id
            )));
        }
        match request.status {
            ApprovalStatus::Approved => {}
            ApprovalStatus::Pending => {
                return Err(PromoterError::NotApproved(format!(
                    "approval request {} is still pending",
                    id
                )));
            }
            status => {
                return Err(PromoterError::AlreadyProcessed(format!(
                    "approval request {} is {}",
                    id, status
                )));
            }
        }
        let executor = self.registry.get(&request.request_type).ok_or_else(|| {
            PromoterError::ExecutionFailed(format!(
                "no executor registered for {}",
                request.request_type
            ))
        })?;

        // Claim the execution before running anything
        let now = Utc::now();
        let claimed = self
            .store
            .update_approval(
                id,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status != ApprovalStatus::Approved || r.executed_at.is_some() {
                        return false;
                    }
                    r.executed_at = Some(now);
                    true
                }),
            )
            .await?
            .ok_or_else(|| {
                PromoterError::AlreadyProcessed(format!("approval request {} was already executed", id))
            })?;

        let result = match executor.execute(&claimed, executor_id).await {
            Ok(output) => ExecutionResult::ok(output),
            Err(e) => {
                warn!(approval_id = id, "Approval handler failed: {}", e);
                ExecutionResult::failed(e.to_string())
            }
        };

        let stored_result = result.clone();
        let executed = self
            .store
            .update_approval(
                id,
                Box::new(move |r: &mut ApprovalRequest| {
                    r.execution_result = Some(stored_result);
                    true
                }),
            )
            .await?
            .ok_or_else(|| PromoterError::NotFound(format!("Approval request {}", id)))?;

        self.record_audit(
            executor_id,
            "approval.executed",
            id,
            json!({ "success": result.success, "error": result.error }),
        )
        .await;
        self.notifier.notify(
            events::APPROVAL_EXECUTED,
            json!({
                "approval_id": id,
                "request_type": executed.request_type,
                "executor_id": executor_id,
                "success": result.success,
                "error": result.error,
            }),
        );

        Ok(executed)
    }

    /// Flip every PENDING request past its window to EXPIRED
    pub async fn expire_stale(&self) -> Result<usize, PromoterError> {
        let now = Utc::now();
        let mut expired = 0;
        for request in self.store.list_approvals(ApprovalStatus::Pending).await? {
            if !request.is_expired_at(now) {
                continue;
            }
            if self.expire(&request.id).await?.is_some() {
                expired += 1;
            }
        }
        if expired > 0 {
            info!("Expired {} stale approval requests", expired);
        }
        Ok(expired)
    }

    pub async fn get(&self, id: &str) -> Result<ApprovalRequest, PromoterError> {
        self.store
            .get_approval(id)
            .await?
            .ok_or_else(|| PromoterError::NotFound(format!("Approval request {}", id)))
    }

    /// PENDING requests still open for votes, oldest first
    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, PromoterError> {
        let now = Utc::now();
        let pending = self.store.list_approvals(ApprovalStatus::Pending).await?;
        Ok(pending.into_iter().filter(|r| !r.is_expired_at(now)).collect())
    }

    async fn expire(&self, id: &str) -> Result<Option<ApprovalRequest>, PromoterError> {
        let now = Utc::now();
        let expired = self
            .store
            .update_approval(
                id,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status != ApprovalStatus::Pending || !r.is_expired_at(now) {
                        return false;
                    }
                    r.status = ApprovalStatus::Expired;
                    r.approval_token = None;
                    true
                }),
            )
            .await?;

        if let Some(request) = &expired {
            debug!(approval_id = id, "Approval request expired");
            self.record_audit(
                SYSTEM_ACTOR,
                "approval.expired",
                id,
                json!({ "token_expires_at": request.token_expires_at }),
            )
            .await;
            self.dispatch_resolved(request).await;
        }
        Ok(expired)
    }

    async fn transition_pending(
        &self,
        id: &str,
        status: ApprovalStatus,
    ) -> Result<Option<ApprovalRequest>, PromoterError> {
        self.store
            .update_approval(
                id,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status != ApprovalStatus::Pending {
                        return false;
                    }
                    r.status = status;
                    r.approval_token = None;
                    true
                }),
            )
            .await
    }

    async fn announce_cancelled(&self, request: &ApprovalRequest, actor: &str) {
        info!(approval_id = %request.id, actor, "Approval request cancelled");
        self.record_audit(actor, "approval.cancelled", &request.id, json!({}))
            .await;
        self.notifier.notify(
            events::APPROVAL_CANCELLED,
            json!({
                "approval_id": request.id,
                "request_type": request.request_type,
                "requester_id": request.requester_id,
                "cancelled_by": actor,
            }),
        );
    }

    async fn dispatch_resolved(&self, request: &ApprovalRequest) {
        let Some(executor) = self.registry.get(&request.request_type) else {
            return;
        };
        if let Err(e) = executor.on_resolved(request).await {
            warn!(
                approval_id = %request.id,
                status = %request.status,
                "Failed to propagate approval decision: {}", e
            );
        }
    }

    async fn record_audit(&self, actor: &str, action: &str, id: &str, metadata: serde_json::Value) {
        audit::record(self.audit.as_ref(), actor, action, RESOURCE_TYPE, id, metadata).await;
    }
}
