//! Promotion requests: validation, approval gating and hand-off to the
//! execution pipeline.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalExecutor, ApprovalRequestManager, ExecutorRegistry, NewApprovalRequest};
use crate::audit::{self, AuditLog};
use crate::cluster::control::ClusterControl;
use crate::deploy::fsm::{advance, can_transition, DeploymentEvent};
use crate::deploy::git::GitMetadataProvider;
use crate::deploy::journal::Journal;
use crate::deploy::pipeline::PipelineQueue;
use crate::deploy::rollback::RollbackController;
use crate::errors::PromoterError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, DEPLOYMENT_PROMOTION};
use crate::models::deployment::{DeploymentRecord, DeploymentStatus};
use crate::store::Store;
use crate::utils::generate_uuid;

/// Promotion graph edges, lower-trust environment first
pub const PROMOTION_EDGES: &[(&str, &str)] = &[("devnet", "testnet"), ("testnet", "mainnet")];

const RESOURCE_TYPE: &str = "deployment";

pub fn is_allowed_promotion(source_env: &str, target_env: &str) -> bool {
    PROMOTION_EDGES
        .iter()
        .any(|(from, to)| *from == source_env && *to == target_env)
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Services that may be promoted at all
    pub deployable_services: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deployable_services: vec![
                "svc-identity".to_string(),
                "svc-gateway".to_string(),
                "svc-ledger".to_string(),
                "svc-wallet".to_string(),
                "svc-notification".to_string(),
            ],
        }
    }
}

/// Parameters of a promotion request
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    pub requester_id: String,
    pub service: String,
    pub source_env: String,
    pub target_env: String,
    pub image_tag: String,
    pub reason: String,
}

pub struct DeploymentPromotionOrchestrator {
    store: Arc<dyn Store>,
    approvals: Arc<ApprovalRequestManager>,
    cluster: Arc<ClusterControl>,
    git: Arc<dyn GitMetadataProvider>,
    rollback: Arc<RollbackController>,
    queue: Arc<dyn PipelineQueue>,
    audit: Arc<dyn AuditLog>,
    journal: Journal,
    settings: OrchestratorSettings,
}

impl DeploymentPromotionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        approvals: Arc<ApprovalRequestManager>,
        cluster: Arc<ClusterControl>,
        git: Arc<dyn GitMetadataProvider>,
        rollback: Arc<RollbackController>,
        queue: Arc<dyn PipelineQueue>,
        audit: Arc<dyn AuditLog>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        let journal = Journal::new(store.clone(), "orchestrator");
        Arc::new(Self {
            store,
            approvals,
            cluster,
            git,
            rollback,
            queue,
            audit,
            journal,
            settings,
        })
    }

    /// Register the promotion handler with the approval registry
    pub fn install(self: &Arc<Self>, registry: &ExecutorRegistry) {
        registry.register(
            DEPLOYMENT_PROMOTION,
            Arc::new(PromotionExecutor {
                orchestrator: Arc::downgrade(self),
            }),
        );
    }

    /// Validate a promotion and open it for approval.
    ///
    /// Creates a PENDING_APPROVAL record and a linked PENDING approval
    /// request carrying every promotion parameter.
    pub async fn create_request(
        &self,
        request: PromotionRequest,
    ) -> Result<DeploymentRecord, PromoterError> {
        self.validate(&request)?;

        if self
            .store
            .find_active_deployment(&request.service, &request.target_env)
            .await?
            .is_some()
        {
            return Err(PromoterError::AlreadyInProgress {
                service: request.service,
                target_env: request.target_env,
            });
        }

        let previous_image_tag = match self
            .cluster
            .current_image_tag(&request.service, &request.target_env)
            .await
        {
            Ok(tag) => tag,
            Err(e) => {
                warn!(
                    service = %request.service,
                    target_env = %request.target_env,
                    "Could not read current image, rollback will be unavailable: {}", e
                );
                None
            }
        };
        let git = self.git.lookup(&request.service).await;

        let deployment_id = generate_uuid();
        let approval = self
            .approvals
            .create(NewApprovalRequest {
                requester_id: request.requester_id.clone(),
                request_type: DEPLOYMENT_PROMOTION.to_string(),
                action: format!(
                    "Promote {}:{} from {} to {}",
                    request.service, request.image_tag, request.source_env, request.target_env
                ),
                target_resource: format!("{}/{}", request.target_env, request.service),
                payload: json!({
                    "deployment_id": deployment_id,
                    "service": request.service,
                    "source_env": request.source_env,
                    "target_env": request.target_env,
                    "image_tag": request.image_tag,
                    "previous_image_tag": previous_image_tag,
                    "git_commit": git.commit,
                    "git_branch": git.branch,
                }),
                reason: request.reason.clone(),
            })
            .await?;

        let record = DeploymentRecord {
            id: deployment_id,
            service: request.service,
            source_env: request.source_env,
            target_env: request.target_env,
            image_tag: request.image_tag,
            previous_image_tag,
            git_commit: git.commit,
            git_branch: git.branch,
            git_message: git.message,
            status: DeploymentStatus::PendingApproval,
            approval_request_id: Some(approval.id.clone()),
            reason: request.reason,
            requested_by: request.requester_id,
            approved_by: None,
            executed_by: None,
            requested_at: Utc::now(),
            approved_at: None,
            executed_at: None,
            completed_at: None,
            rolled_back_at: None,
            duration_ms: None,
            rollback_reason: None,
            build_artifacts: json!({}),
            pre_deploy_metrics: None,
            post_deploy_metrics: None,
            health_check_results: None,
            error_message: None,
            error_stack: None,
        };

        // The insert is conditional on the slot; a concurrent request that
        // won the race leaves this approval orphaned, so withdraw it.
        if let Err(e) = self.store.insert_deployment(record.clone()).await {
            if let Err(revoke_err) = self.approvals.revoke(&approval.id, &record.requested_by).await {
                warn!(approval_id = %approval.id, "Failed to withdraw approval request: {}", revoke_err);
            }
            return Err(e);
        }

        info!(
            deployment_id = %record.id,
            service = %record.service,
            "Promotion {} -> {} requested", record.source_env, record.target_env
        );
        self.journal
            .info(
                &record.id,
                format!(
                    "Promotion of {}:{} requested by {}, awaiting approval {}",
                    record.service, record.image_tag, record.requested_by, approval.id
                ),
            )
            .await;
        audit::record(
            self.audit.as_ref(),
            &record.requested_by,
            "deployment.requested",
            RESOURCE_TYPE,
            &record.id,
            json!({
                "service": record.service,
                "source_env": record.source_env,
                "target_env": record.target_env,
                "image_tag": record.image_tag,
                "approval_request_id": approval.id,
            }),
        )
        .await;

        Ok(record)
    }

    /// Start an APPROVED deployment. Returns once the pipeline has been
    /// scheduled, not when it finishes.
    pub async fn execute(
        &self,
        deployment_id: &str,
        executor_id: &str,
    ) -> Result<DeploymentRecord, PromoterError> {
        let record = self.get(deployment_id).await?;
        if record.status != DeploymentStatus::Approved {
            return Err(PromoterError::NotApproved(format!(
                "deployment {} is {}",
                deployment_id, record.status
            )));
        }

        let executor = executor_id.to_string();
        let now = Utc::now();
        let started = advance(
            self.store.as_ref(),
            deployment_id,
            DeploymentEvent::Start,
            move |r| {
                r.executed_by = Some(executor);
                r.executed_at = Some(now);
            },
        )
        .await
        .map_err(|e| match e {
            PromoterError::InvalidTransition(msg) => PromoterError::NotApproved(msg),
            other => other,
        })?;

        // No await between the status flip and the hand-off, so a dropped
        // caller cannot leave an IN_PROGRESS record without a pipeline
        let submitted = self.queue.submit(deployment_id.to_string());

        self.journal
            .info(deployment_id, format!("Execution started by {}", executor_id))
            .await;
        audit::record(
            self.audit.as_ref(),
            executor_id,
            "deployment.started",
            RESOURCE_TYPE,
            deployment_id,
            json!({ "image_tag": started.image_tag }),
        )
        .await;

        if let Err(e) = submitted {
            let message = format!("Could not schedule pipeline: {}", e);
            self.journal.error(deployment_id, message.clone()).await;
            advance(
                self.store.as_ref(),
                deployment_id,
                DeploymentEvent::Fail,
                move |r| r.error_message = Some(message),
            )
            .await?;
            return Err(e);
        }

        Ok(started)
    }

    /// Manually restore the image a deployment replaced
    pub async fn rollback(
        &self,
        deployment_id: &str,
        admin_id: &str,
        reason: &str,
    ) -> Result<DeploymentRecord, PromoterError> {
        let record = self.get(deployment_id).await?;
        if record.previous_image_tag.is_none() {
            return Err(PromoterError::PreviousImageNotAvailable(
                deployment_id.to_string(),
            ));
        }
        info!(deployment_id, admin = admin_id, "Manual rollback requested: {}", reason);
        self.rollback.perform_rollback(deployment_id, reason, admin_id).await
    }

    /// Cancel a deployment that has not started executing
    pub async fn cancel(
        &self,
        deployment_id: &str,
        admin_id: &str,
    ) -> Result<DeploymentRecord, PromoterError> {
        let record = self.get(deployment_id).await?;
        if !can_transition(record.status, DeploymentEvent::Cancel) {
            return Err(PromoterError::AlreadyExecuted(format!(
                "deployment {} is {}",
                deployment_id, record.status
            )));
        }

        let cancelled = advance(
            self.store.as_ref(),
            deployment_id,
            DeploymentEvent::Cancel,
            |_| {},
        )
        .await
        .map_err(|e| match e {
            PromoterError::InvalidTransition(msg) => PromoterError::AlreadyExecuted(msg),
            other => other,
        })?;

        if let Some(approval_id) = &cancelled.approval_request_id {
            if let Err(e) = self.approvals.revoke(approval_id, admin_id).await {
                warn!(approval_id = %approval_id, "Failed to withdraw approval request: {}", e);
            }
        }

        self.journal
            .info(deployment_id, format!("Cancelled by {}", admin_id))
            .await;
        audit::record(
            self.audit.as_ref(),
            admin_id,
            "deployment.cancelled",
            RESOURCE_TYPE,
            deployment_id,
            json!({ "previous_status": record.status }),
        )
        .await;

        Ok(cancelled)
    }

    pub async fn get(&self, deployment_id: &str) -> Result<DeploymentRecord, PromoterError> {
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", deployment_id)))
    }

    /// Mirror a decided approval onto its deployment record
    pub async fn on_approval_decided(&self, approval: &ApprovalRequest) -> Result<(), PromoterError> {
        let deployment_id = deployment_id_of(approval)?;

        let (event, actor) = match approval.status {
            ApprovalStatus::Approved => (
                DeploymentEvent::Approve,
                approval.approver_id.clone().unwrap_or_default(),
            ),
            ApprovalStatus::Rejected => (
                DeploymentEvent::Cancel,
                approval.approver_id.clone().unwrap_or_default(),
            ),
            ApprovalStatus::Expired | ApprovalStatus::Cancelled => {
                (DeploymentEvent::Cancel, "system".to_string())
            }
            ApprovalStatus::Pending => return Ok(()),
        };

        let current = self.get(&deployment_id).await?;
        if !can_transition(current.status, event) {
            debug!(
                deployment_id = %deployment_id,
                status = %current.status,
                "Approval {} needs no change to the deployment", approval.status
            );
            return Ok(());
        }

        let approver = approval.approver_id.clone();
        let approved_at = approval.approved_at;
        let note = match approval.status {
            ApprovalStatus::Approved => None,
            ApprovalStatus::Rejected => Some(format!(
                "Approval rejected: {}",
                approval.rejection_reason.as_deref().unwrap_or("no reason given")
            )),
            status => Some(format!("Approval {}", status.as_str().to_lowercase())),
        };
        let stored_note = note.clone();
        let updated = advance(self.store.as_ref(), &deployment_id, event, move |r| {
            if event == DeploymentEvent::Approve {
                r.approved_by = approver;
                r.approved_at = approved_at;
            } else {
                r.error_message = stored_note;
            }
        })
        .await?;

        self.journal
            .info(
                &deployment_id,
                note.unwrap_or_else(|| format!("Approved by {}", actor)),
            )
            .await;
        audit::record(
            self.audit.as_ref(),
            &actor,
            match updated.status {
                DeploymentStatus::Approved => "deployment.approved",
                _ => "deployment.cancelled",
            },
            RESOURCE_TYPE,
            &deployment_id,
            json!({ "approval_request_id": approval.id, "approval_status": approval.status }),
        )
        .await;

        Ok(())
    }

    fn validate(&self, request: &PromotionRequest) -> Result<(), PromoterError> {
        if !self
            .settings
            .deployable_services
            .iter()
            .any(|s| *s == request.service)
        {
            return Err(PromoterError::InvalidPromotion(format!(
                "service {} is not deployable",
                request.service
            )));
        }
        if !is_allowed_promotion(&request.source_env, &request.target_env) {
            return Err(PromoterError::InvalidPromotion(format!(
                "cannot promote from {} to {}",
                request.source_env, request.target_env
            )));
        }
        if request.image_tag.trim().is_empty() {
            return Err(PromoterError::InvalidPromotion(
                "image tag is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn deployment_id_of(approval: &ApprovalRequest) -> Result<String, PromoterError> {
    approval
        .payload
        .get("deployment_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PromoterError::Internal(format!(
                "approval request {} carries no deployment id",
                approval.id
            ))
        })
}

/// Approval handler for `DEPLOYMENT_PROMOTION` requests
pub struct PromotionExecutor {
    orchestrator: Weak<DeploymentPromotionOrchestrator>,
}

impl PromotionExecutor {
    fn orchestrator(&self) -> Result<Arc<DeploymentPromotionOrchestrator>, PromoterError> {
        self.orchestrator
            .upgrade()
            .ok_or_else(|| PromoterError::ShutdownError("orchestrator is gone".to_string()))
    }
}

#[async_trait]
impl ApprovalExecutor for PromotionExecutor {
    async fn execute(
        &self,
        request: &ApprovalRequest,
        executor_id: &str,
    ) -> Result<serde_json::Value, PromoterError> {
        let orchestrator = self.orchestrator()?;
        let deployment_id = deployment_id_of(request)?;
        let record = orchestrator.execute(&deployment_id, executor_id).await?;
        Ok(json!({ "deployment_id": record.id, "status": record.status }))
    }

    async fn on_resolved(&self, request: &ApprovalRequest) -> Result<(), PromoterError> {
        self.orchestrator()?.on_approval_decided(request).await
    }
}
