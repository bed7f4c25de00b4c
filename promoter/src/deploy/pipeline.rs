//! Execution pipeline: drives one promotion from image update through
//! health verification to COMPLETED, ROLLED_BACK or FAILED.
//!
//! Only the pipeline instance that owns a deployment id writes to that
//! record once it is IN_PROGRESS. Every write still goes through the status
//! machine so a stray writer cannot move the record backwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use crate::audit::{self, AuditLog};
use crate::cluster::control::ClusterControl;
use crate::deploy::fsm::{advance, can_transition, patch, DeploymentEvent};
use crate::deploy::health::HealthCheckEngine;
use crate::deploy::journal::Journal;
use crate::deploy::rollback::RollbackController;
use crate::deploy::step_outcome;
use crate::errors::PromoterError;
use crate::models::deployment::{DeploymentRecord, DeploymentStatus, LogLevel, ReplicaMetrics};
use crate::notify::{events, Notifier};
use crate::store::Store;
use crate::trace;

/// Actor recorded for writes the pipeline makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Source attached to the deployment log entries the pipeline writes
    pub log_source: String,

    /// Reason recorded when health checks trigger a rollback
    pub health_rollback_reason: String,

    /// Settle time between rollout convergence and the first health check
    pub health_check_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            log_source: "pipeline".to_string(),
            health_rollback_reason: "Health checks failed".to_string(),
            health_check_delay: Duration::ZERO,
        }
    }
}

/// Accepts deployment ids for background execution. `submit` never waits:
/// an id that cannot be taken right away is refused.
pub trait PipelineQueue: Send + Sync {
    fn submit(&self, deployment_id: String) -> Result<(), PromoterError>;
}

pub struct ExecutionPipeline {
    store: Arc<dyn Store>,
    cluster: Arc<ClusterControl>,
    health: HealthCheckEngine,
    rollback: Arc<RollbackController>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    journal: Journal,
    settings: PipelineSettings,
}

impl ExecutionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        cluster: Arc<ClusterControl>,
        health: HealthCheckEngine,
        rollback: Arc<RollbackController>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        let journal = Journal::new(store.clone(), settings.log_source.clone());
        Self {
            store,
            cluster,
            health,
            rollback,
            audit,
            notifier,
            journal,
            settings,
        }
    }

    /// Execute an IN_PROGRESS deployment to its end state.
    ///
    /// Step failures are handled here and reflected in the returned record.
    /// Anything unexpected is recorded as FAILED, followed by a best-effort
    /// rollback, and then returned as `ExecutionFailed`.
    pub async fn run(&self, deployment_id: &str) -> Result<DeploymentRecord, PromoterError> {
        let record = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", deployment_id)))?;

        if record.status != DeploymentStatus::InProgress {
            return Err(PromoterError::InvalidTransition(format!(
                "deployment {} is {}, pipeline requires {}",
                deployment_id,
                record.status,
                DeploymentStatus::InProgress
            )));
        }

        match self.drive(record).await {
            Ok(record) => Ok(record),
            Err(e) => {
                let message = format!("Unexpected pipeline error: {}", e);
                self.recover(deployment_id, message.clone(), trace!()).await;
                Err(PromoterError::ExecutionFailed(message))
            }
        }
    }

    /// Record a pipeline that died without reaching an end state
    pub async fn recover_crashed(&self, deployment_id: &str, message: &str) {
        self.recover(
            deployment_id,
            format!("Pipeline crashed: {}", message),
            trace!(),
        )
        .await;
    }

    async fn drive(&self, record: DeploymentRecord) -> Result<DeploymentRecord, PromoterError> {
        let id = record.id.clone();
        let service = record.service.clone();
        let env = record.target_env.clone();

        self.journal
            .info(
                &id,
                format!(
                    "Promoting {}:{} from {} to {}",
                    service, record.image_tag, record.source_env, env
                ),
            )
            .await;

        // 1. Baseline
        let pre = self.collect_metrics(&id, &service, &env, "pre-deployment").await;
        patch(self.store.as_ref(), &id, move |r| r.pre_deploy_metrics = pre).await?;

        // 2. Image update
        self.journal
            .info(&id, format!("Setting image of {} to {}", service, record.image_tag))
            .await;
        let updated = self.cluster.set_image(&service, &env, &record.image_tag).await;
        if let Err(message) = step_outcome("image update", updated) {
            return self.fail_and_roll_back(&id, message, trace!()).await;
        }
        self.journal.info(&id, "Image updated").await;

        // 3. Rollout convergence
        advance(
            self.store.as_ref(),
            &id,
            DeploymentEvent::BeginHealthCheck,
            |_| {},
        )
        .await?;
        self.record_audit("deployment.health_check", &id, json!({ "image_tag": record.image_tag }))
            .await;

        self.journal
            .info(
                &id,
                format!(
                    "Waiting for rollout (timeout {}s)",
                    self.cluster.options().rollout_timeout.as_secs()
                ),
            )
            .await;
        let converged = self.cluster.wait_for_rollout(&service, &env).await;
        if let Err(message) = step_outcome("rollout", converged) {
            return self.fail_and_roll_back(&id, message, trace!()).await;
        }
        self.journal.info(&id, "Rollout converged").await;

        if !self.settings.health_check_delay.is_zero() {
            debug!(deployment_id = %id, "Waiting {:?} before health checks", self.settings.health_check_delay);
            tokio::time::sleep(self.settings.health_check_delay).await;
        }

        // 4. Verification
        let report = self.health.run(&service, &env).await;
        let stored_report = report.clone();
        patch(self.store.as_ref(), &id, move |r| {
            r.health_check_results = Some(stored_report)
        })
        .await?;

        if !report.passed {
            for check in report.failed_checks() {
                self.journal
                    .with_metadata(
                        &id,
                        LogLevel::Warn,
                        format!("Health check {} failed: {}", check.name, check.message),
                        json!({
                            "check": check.name,
                            "duration_ms": check.duration_ms,
                            "details": check.details,
                        }),
                    )
                    .await;
            }
            return self.roll_back_unhealthy(&id).await;
        }
        self.journal
            .info(
                &id,
                format!("Health checks passed in {}ms", report.total_duration_ms),
            )
            .await;

        // 5. Completion
        let post = self.collect_metrics(&id, &service, &env, "post-deployment").await;
        let completed_at = Utc::now();
        let completed = advance(
            self.store.as_ref(),
            &id,
            DeploymentEvent::Complete,
            move |r| {
                r.post_deploy_metrics = post;
                r.completed_at = Some(completed_at);
                r.duration_ms = Some((completed_at - r.requested_at).num_milliseconds());
            },
        )
        .await?;

        info!(
            deployment_id = %id,
            service = %service,
            target_env = %env,
            "Deployment completed"
        );
        self.journal
            .info(
                &id,
                format!(
                    "Deployment completed in {}ms",
                    completed.duration_ms.unwrap_or_default()
                ),
            )
            .await;
        self.record_audit(
            "deployment.completed",
            &id,
            json!({ "image_tag": completed.image_tag, "duration_ms": completed.duration_ms }),
        )
        .await;
        self.notifier
            .notify(events::DEPLOYMENT_COMPLETED, summary(&completed));

        Ok(completed)
    }

    /// Health checks failed: the rollback decides the end state. If it
    /// cannot run, the record is left in HEALTH_CHECK for an operator.
    async fn roll_back_unhealthy(&self, id: &str) -> Result<DeploymentRecord, PromoterError> {
        let reason = self.settings.health_rollback_reason.clone();
        match self.rollback.abort_rollout(id, &reason, SYSTEM_ACTOR).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.journal
                    .error(
                        id,
                        format!(
                            "Health checks failed and rollback did not complete, manual intervention required: {}",
                            e
                        ),
                    )
                    .await;
                let message = format!("{}; rollback failed: {}", reason, e);
                let record = patch(self.store.as_ref(), id, move |r| {
                    r.error_message = Some(message)
                })
                .await?;
                self.notifier.notify(events::DEPLOYMENT_FAILED, summary(&record));
                Ok(record)
            }
        }
    }

    /// Mark the record FAILED, then try to restore the previous image
    async fn fail_and_roll_back(
        &self,
        id: &str,
        message: String,
        stack: String,
    ) -> Result<DeploymentRecord, PromoterError> {
        self.journal.error(id, message.clone()).await;

        let error_message = message.clone();
        let failed = advance(self.store.as_ref(), id, DeploymentEvent::Fail, move |r| {
            r.error_message = Some(error_message);
            r.error_stack = Some(stack);
        })
        .await?;

        self.record_audit("deployment.failed", id, json!({ "error": message }))
            .await;
        self.notifier.notify(events::DEPLOYMENT_FAILED, summary(&failed));

        Ok(self.try_roll_back(failed, &message).await)
    }

    /// Best-effort rollback of a FAILED record; on any failure the FAILED
    /// record is returned unchanged.
    async fn try_roll_back(&self, failed: DeploymentRecord, cause: &str) -> DeploymentRecord {
        let reason = format!("Automatic rollback after failure: {}", cause);
        match self
            .rollback
            .abort_rollout(&failed.id, &reason, SYSTEM_ACTOR)
            .await
        {
            Ok(record) => record,
            Err(PromoterError::PreviousImageNotAvailable(_)) => {
                self.journal
                    .warn(&failed.id, "No previous image captured, skipping rollback")
                    .await;
                failed
            }
            Err(e) => {
                self.journal
                    .error(&failed.id, format!("Automatic rollback failed: {}", e))
                    .await;
                failed
            }
        }
    }

    /// Single catch point for errors that escaped the step handling
    async fn recover(&self, id: &str, message: String, stack: String) {
        error!(deployment_id = id, "{}", message);
        self.journal.error(id, message.clone()).await;

        let current = match self.store.get_deployment(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!(deployment_id = id, "Could not load deployment to record failure: {}", e);
                return;
            }
        };
        if !can_transition(current.status, DeploymentEvent::Fail) {
            debug!(deployment_id = id, status = %current.status, "Not marking FAILED");
            return;
        }

        let error_message = message.clone();
        let failed = match advance(self.store.as_ref(), id, DeploymentEvent::Fail, move |r| {
            r.error_message = Some(error_message);
            r.error_stack = Some(stack);
        })
        .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(deployment_id = id, "Could not mark deployment FAILED: {}", e);
                return;
            }
        };

        self.record_audit("deployment.failed", id, json!({ "error": message }))
            .await;
        self.notifier.notify(events::DEPLOYMENT_FAILED, summary(&failed));
        self.try_roll_back(failed, &message).await;
    }

    async fn collect_metrics(
        &self,
        id: &str,
        service: &str,
        env: &str,
        phase: &str,
    ) -> Option<ReplicaMetrics> {
        match self.cluster.replica_counts(service, env).await {
            Ok(counts) => {
                self.journal
                    .with_metadata(
                        id,
                        LogLevel::Info,
                        format!("Collected {} metrics", phase),
                        json!({ "ready_replicas": counts.ready, "total_replicas": counts.total }),
                    )
                    .await;
                Some(ReplicaMetrics {
                    ready_replicas: counts.ready,
                    total_replicas: counts.total,
                    collected_at: Utc::now(),
                })
            }
            Err(e) => {
                self.journal
                    .warn(id, format!("Could not collect {} metrics: {}", phase, e))
                    .await;
                None
            }
        }
    }

    async fn record_audit(&self, action: &str, id: &str, metadata: serde_json::Value) {
        audit::record(
            self.audit.as_ref(),
            SYSTEM_ACTOR,
            action,
            "deployment",
            id,
            metadata,
        )
        .await;
    }
}

/// Notification payload describing a deployment
pub(crate) fn summary(record: &DeploymentRecord) -> serde_json::Value {
    json!({
        "deployment_id": record.id,
        "service": record.service,
        "source_env": record.source_env,
        "target_env": record.target_env,
        "image_tag": record.image_tag,
        "status": record.status,
        "error_message": record.error_message,
    })
}
