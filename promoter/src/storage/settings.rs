//! Settings file management

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::control::ClusterOptions;
use crate::deploy::orchestrator::OrchestratorSettings;
use crate::errors::PromoterError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Cluster control plane
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Services that may be promoted
    #[serde(default = "default_deployable_services")]
    pub deployable_services: Vec<String>,

    /// Approval workflow
    #[serde(default)]
    pub approvals: ApprovalSettings,

    /// Pipeline execution
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Checkout read for git metadata; lookups report "unknown" when absent
    #[serde(default)]
    pub git_repo_dir: Option<PathBuf>,

    /// Notification delivery
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// JSON-lines file backing the audit chain; memory only when absent
    #[serde(default)]
    pub audit_file: Option<PathBuf>,

    /// Status server
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_deployable_services() -> Vec<String> {
    OrchestratorSettings::default().deployable_services
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            cluster: ClusterSettings::default(),
            deployable_services: default_deployable_services(),
            approvals: ApprovalSettings::default(),
            pipeline: PipelineSettings::default(),
            git_repo_dir: None,
            notifications: NotificationSettings::default(),
            audit_file: None,
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, PromoterError> {
        let settings = if file.exists().await {
            file.read_json::<Settings>().await.map_err(|e| {
                PromoterError::ConfigError(format!(
                    "unable to read {}: {}",
                    file.path().display(),
                    e
                ))
            })?
        } else {
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would only fail later, at first use
    pub fn validate(&self) -> Result<(), PromoterError> {
        if self.deployable_services.is_empty() {
            return Err(PromoterError::ConfigError(
                "deployable_services must not be empty".to_string(),
            ));
        }
        if self.approvals.validity_minutes == 0 {
            return Err(PromoterError::ConfigError(
                "approvals.validity_minutes must be positive".to_string(),
            ));
        }
        if self.cluster.rollout_timeout_secs == 0 || self.cluster.command_timeout_secs == 0 {
            return Err(PromoterError::ConfigError(
                "cluster timeouts must be positive".to_string(),
            ));
        }
        if let Some(webhook) = &self.notifications.webhook_url {
            url::Url::parse(webhook).map_err(|e| {
                PromoterError::ConfigError(format!("invalid webhook url {}: {}", webhook, e))
            })?;
        }
        Ok(())
    }
}

/// Cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_kubectl_bin")]
    pub kubectl_bin: String,

    /// Image registry prefix
    #[serde(default)]
    pub registry: String,

    /// Environment -> namespace
    #[serde(default = "default_namespaces")]
    pub namespaces: HashMap<String, String>,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Restart total at which health checks report a crash loop
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_kubectl_bin() -> String {
    "kubectl".to_string()
}

fn default_namespaces() -> HashMap<String, String> {
    ["devnet", "testnet", "mainnet"]
        .into_iter()
        .map(|env| (env.to_string(), env.to_string()))
        .collect()
}

fn default_health_port() -> u16 {
    3000
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_rollout_timeout() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_max_restarts() -> u32 {
    3
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl_bin: default_kubectl_bin(),
            registry: String::new(),
            namespaces: default_namespaces(),
            health_port: default_health_port(),
            health_path: default_health_path(),
            command_timeout_secs: default_command_timeout(),
            rollout_timeout_secs: default_rollout_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl ClusterSettings {
    pub fn to_options(&self) -> ClusterOptions {
        ClusterOptions {
            kubectl_bin: self.kubectl_bin.clone(),
            registry: self.registry.clone(),
            namespaces: self.namespaces.clone(),
            health_port: self.health_port,
            health_path: self.health_path.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            rollout_timeout: Duration::from_secs(self.rollout_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

/// Approval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSettings {
    #[serde(default = "default_validity_minutes")]
    pub validity_minutes: u32,

    #[serde(default = "default_max_pending")]
    pub max_pending_per_requester: usize,

    /// Interval of the expiry sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_secs: u64,
}

fn default_validity_minutes() -> u32 {
    30
}

fn default_max_pending() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            validity_minutes: default_validity_minutes(),
            max_pending_per_requester: default_max_pending(),
            expiry_sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Pipelines run at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Seconds between rollout convergence and health checks
    #[serde(default)]
    pub health_check_delay_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            health_check_delay_secs: 0,
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Webhook receiving lifecycle events; events are only logged when absent
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// HMAC key signing webhook bodies
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
