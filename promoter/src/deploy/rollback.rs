//! Restores the image a deployment replaced

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::audit::{self, AuditLog};
use crate::cluster::control::ClusterControl;
use crate::deploy::fsm::{advance_if, can_transition, pipeline_released, DeploymentEvent};
use crate::deploy::journal::Journal;
use crate::deploy::step_outcome;
use crate::errors::PromoterError;
use crate::models::deployment::DeploymentRecord;
use crate::notify::{events, Notifier};
use crate::store::Store;

pub struct RollbackController {
    store: Arc<dyn Store>,
    cluster: Arc<ClusterControl>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    journal: Journal,
}

impl RollbackController {
    pub fn new(
        store: Arc<dyn Store>,
        cluster: Arc<ClusterControl>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let journal = Journal::new(store.clone(), "rollback");
        Self {
            store,
            cluster,
            audit,
            notifier,
            journal,
        }
    }

    /// Put `previous_image_tag` back on the workload and wait for it to
    /// converge, then mark the record ROLLED_BACK.
    ///
    /// Nothing is sent to the cluster unless a previous image was captured
    /// and no pipeline is still working on the record.
    pub async fn perform_rollback(
        &self,
        deployment_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<DeploymentRecord, PromoterError> {
        self.restore(deployment_id, reason, actor, DeploymentEvent::RollBack)
            .await
    }

    /// Rollback issued by the pipeline that owns the record
    pub(crate) async fn abort_rollout(
        &self,
        deployment_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<DeploymentRecord, PromoterError> {
        self.restore(deployment_id, reason, actor, DeploymentEvent::AbortRollout)
            .await
    }

    async fn restore(
        &self,
        deployment_id: &str,
        reason: &str,
        actor: &str,
        event: DeploymentEvent,
    ) -> Result<DeploymentRecord, PromoterError> {
        let owned = event == DeploymentEvent::AbortRollout;
        let record = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", deployment_id)))?;

        let previous = record
            .previous_image_tag
            .clone()
            .ok_or_else(|| PromoterError::PreviousImageNotAvailable(deployment_id.to_string()))?;

        if !can_transition(record.status, event) {
            return Err(PromoterError::InvalidTransition(format!(
                "deployment {} is {}, cannot roll back",
                deployment_id, record.status
            )));
        }
        if !owned && !pipeline_released(&record) {
            return Err(PromoterError::InvalidTransition(format!(
                "deployment {} is {} and its pipeline is still running",
                deployment_id, record.status
            )));
        }

        self.journal
            .info(
                deployment_id,
                format!(
                    "Rolling back {} in {} from {} to {}: {}",
                    record.service, record.target_env, record.image_tag, previous, reason
                ),
            )
            .await;

        let restored = self
            .cluster
            .set_image(&record.service, &record.target_env, &previous)
            .await;
        if let Err(message) = step_outcome("restore image", restored) {
            return Err(self.fail(deployment_id, message).await);
        }

        let converged = self
            .cluster
            .wait_for_rollout(&record.service, &record.target_env)
            .await;
        if let Err(message) = step_outcome("rollback rollout", converged) {
            return Err(self.fail(deployment_id, message).await);
        }

        let now = Utc::now();
        let rollback_reason = reason.to_string();
        let updated = advance_if(
            self.store.as_ref(),
            deployment_id,
            event,
            move |r| owned || pipeline_released(r),
            move |r| {
                r.rolled_back_at = Some(now);
                r.rollback_reason = Some(rollback_reason);
            },
        )
        .await?;

        info!(
            deployment_id,
            service = %updated.service,
            target_env = %updated.target_env,
            "Rolled back to {}", previous
        );
        self.journal
            .info(deployment_id, format!("Rollback to {} complete", previous))
            .await;

        audit::record(
            self.audit.as_ref(),
            actor,
            "deployment.rolled_back",
            "deployment",
            deployment_id,
            json!({ "previous_image_tag": previous, "reason": reason }),
        )
        .await;
        self.notifier.notify(
            events::DEPLOYMENT_ROLLED_BACK,
            json!({
                "deployment_id": deployment_id,
                "service": updated.service,
                "target_env": updated.target_env,
                "image_tag": updated.image_tag,
                "restored_image_tag": previous,
                "reason": reason,
            }),
        );

        Ok(updated)
    }

    async fn fail(&self, deployment_id: &str, message: String) -> PromoterError {
        self.journal
            .error(deployment_id, format!("Rollback failed: {}", message))
            .await;
        PromoterError::RollbackFailed(message)
    }
}
