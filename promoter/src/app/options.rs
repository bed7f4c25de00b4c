//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use secrecy::SecretString;

use crate::approval::ApprovalSettings;
use crate::cluster::control::ClusterOptions;
use crate::deploy::health::DEFAULT_MAX_RESTARTS;
use crate::deploy::orchestrator::OrchestratorSettings;
use crate::deploy::pipeline::PipelineSettings;
use crate::storage::settings::Settings;
use crate::workers::{deployer, expiry};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Enable the status server
    pub enable_status_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Cluster control plane
    pub cluster: ClusterOptions,

    /// Restart total at which health checks report a crash loop
    pub max_restarts: u32,

    pub approvals: ApprovalSettings,
    pub orchestrator: OrchestratorSettings,
    pub pipeline: PipelineSettings,

    /// Deployer worker options
    pub deployer: deployer::Options,

    /// Expiry worker options
    pub expiry: expiry::Options,

    /// Checkout read for git metadata
    pub git_repo_dir: Option<PathBuf>,

    /// Webhook receiving lifecycle events
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<SecretString>,

    /// Audit chain file
    pub audit_file: Option<PathBuf>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            enable_status_server: true,
            server: ServerOptions::default(),
            cluster: ClusterOptions::default(),
            max_restarts: DEFAULT_MAX_RESTARTS,
            approvals: ApprovalSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            pipeline: PipelineSettings::default(),
            deployer: deployer::Options::default(),
            expiry: expiry::Options::default(),
            git_repo_dir: None,
            webhook_url: None,
            webhook_secret: None,
            audit_file: None,
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enable_status_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            cluster: settings.cluster.to_options(),
            max_restarts: settings.cluster.max_restarts,
            approvals: ApprovalSettings {
                validity: ChronoDuration::minutes(i64::from(settings.approvals.validity_minutes)),
                max_pending_per_requester: settings.approvals.max_pending_per_requester,
            },
            orchestrator: OrchestratorSettings {
                deployable_services: settings.deployable_services.clone(),
            },
            pipeline: PipelineSettings {
                health_check_delay: Duration::from_secs(settings.pipeline.health_check_delay_secs),
                ..Default::default()
            },
            deployer: deployer::Options {
                max_concurrent: settings.pipeline.max_concurrent,
                ..Default::default()
            },
            expiry: expiry::Options {
                interval: Duration::from_secs(settings.approvals.expiry_sweep_interval_secs),
            },
            git_repo_dir: settings.git_repo_dir.clone(),
            webhook_url: settings.notifications.webhook_url.clone(),
            webhook_secret: settings
                .notifications
                .webhook_secret
                .clone()
                .map(SecretString::from),
            audit_file: settings.audit_file.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options for the engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including in-flight pipelines
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(600),
        }
    }
}

/// Status server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
