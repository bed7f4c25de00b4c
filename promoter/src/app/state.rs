//! Application state: every engine component, constructed once and injected

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::approval::{ApprovalRequestManager, ExecutorRegistry};
use crate::audit::{AuditLog, HashChainAuditLog};
use crate::cluster::control::ClusterControl;
use crate::cluster::runner::{CommandRunner, ProcessRunner};
use crate::deploy::git::{GitCli, GitMetadataProvider, NoGitMetadata};
use crate::deploy::health::HealthCheckEngine;
use crate::deploy::orchestrator::DeploymentPromotionOrchestrator;
use crate::deploy::pipeline::ExecutionPipeline;
use crate::deploy::rollback::RollbackController;
use crate::errors::PromoterError;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::store::{MemoryStore, Store};
use crate::workers::deployer::DeploymentQueue;

/// External collaborators the engine is built on
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn Notifier>,
    pub git: Arc<dyn GitMetadataProvider>,
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn Notifier>,
    pub cluster: Arc<ClusterControl>,
    pub approvals: Arc<ApprovalRequestManager>,
    pub rollback: Arc<RollbackController>,
    pub pipeline: Arc<ExecutionPipeline>,
    pub orchestrator: Arc<DeploymentPromotionOrchestrator>,
}

impl AppState {
    /// Build the production collaborators from `options`, then the engine
    pub async fn init(
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<String>), PromoterError> {
        info!("Initializing application state...");

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

        let audit: Arc<dyn AuditLog> = match &options.audit_file {
            Some(path) => Arc::new(HashChainAuditLog::open(path.clone()).await?),
            None => {
                warn!("No audit file configured, audit chain is kept in memory only");
                Arc::new(HashChainAuditLog::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &options.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(
                url.clone(),
                options.webhook_secret.clone(),
            )?),
            None => Arc::new(LogNotifier),
        };

        let git: Arc<dyn GitMetadataProvider> = match &options.git_repo_dir {
            Some(dir) => Arc::new(GitCli::new(runner.clone(), dir.clone())),
            None => Arc::new(NoGitMetadata),
        };

        Ok(Self::assemble(
            options,
            Collaborators {
                runner,
                store: Arc::new(MemoryStore::new()),
                audit,
                notifier,
                git,
            },
        ))
    }

    /// Wire the engine on top of `collaborators`. Returns the receiving end
    /// of the pipeline queue, to be handed to the deployer worker.
    pub fn assemble(
        options: &AppOptions,
        collaborators: Collaborators,
    ) -> (Self, mpsc::Receiver<String>) {
        let Collaborators {
            runner,
            store,
            audit,
            notifier,
            git,
        } = collaborators;

        let cluster = Arc::new(ClusterControl::new(runner, options.cluster.clone()));
        let registry = Arc::new(ExecutorRegistry::new());
        let approvals = Arc::new(ApprovalRequestManager::new(
            store.clone(),
            registry.clone(),
            audit.clone(),
            notifier.clone(),
            options.approvals.clone(),
        ));
        let rollback = Arc::new(RollbackController::new(
            store.clone(),
            cluster.clone(),
            audit.clone(),
            notifier.clone(),
        ));
        let pipeline = Arc::new(ExecutionPipeline::new(
            store.clone(),
            cluster.clone(),
            HealthCheckEngine::new(cluster.clone()).with_max_restarts(options.max_restarts),
            rollback.clone(),
            audit.clone(),
            notifier.clone(),
            options.pipeline.clone(),
        ));

        let (queue, queue_rx) = DeploymentQueue::channel(options.deployer.queue_capacity);
        let orchestrator = DeploymentPromotionOrchestrator::new(
            store.clone(),
            approvals.clone(),
            cluster.clone(),
            git,
            rollback.clone(),
            Arc::new(queue),
            audit.clone(),
            options.orchestrator.clone(),
        );
        orchestrator.install(&registry);
        info!("Approval handlers registered: {:?}", registry.request_types());

        let state = Self {
            store,
            audit,
            notifier,
            cluster,
            approvals,
            rollback,
            pipeline,
            orchestrator,
        };
        (state, queue_rx)
    }

    pub async fn shutdown(&self) -> Result<(), PromoterError> {
        info!("Shutting down application state...");
        match self.audit.verify().await {
            Ok(v) if v.valid => info!("Audit chain intact ({} entries)", v.total_entries),
            Ok(v) => warn!(
                "Audit chain broken at entry {:?} ({} entries)",
                v.first_invalid_seq, v.total_entries
            ),
            Err(e) => warn!("Could not verify audit chain: {}", e),
        }
        Ok(())
    }
}
