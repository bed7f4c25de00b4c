//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::health::HealthReport;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    PendingApproval,
    Approved,
    InProgress,
    HealthCheck,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::PendingApproval => "PENDING_APPROVAL",
            DeploymentStatus::Approved => "APPROVED",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::HealthCheck => "HEALTH_CHECK",
            DeploymentStatus::Completed => "COMPLETED",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::RolledBack => "ROLLED_BACK",
            DeploymentStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses that hold the (service, target env) slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::PendingApproval
                | DeploymentStatus::Approved
                | DeploymentStatus::InProgress
                | DeploymentStatus::HealthCheck
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replica snapshot taken before and after a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMetrics {
    pub ready_replicas: u32,
    pub total_replicas: u32,
    pub collected_at: DateTime<Utc>,
}

/// A promotion of one service image from one environment to the next
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub service: String,
    pub source_env: String,
    pub target_env: String,
    pub image_tag: String,

    /// Image running in the target before this promotion, used for rollback
    pub previous_image_tag: Option<String>,

    pub git_commit: String,
    pub git_branch: String,
    pub git_message: String,
    pub status: DeploymentStatus,
    pub approval_request_id: Option<String>,
    pub reason: String,

    pub requested_by: String,
    pub approved_by: Option<String>,
    pub executed_by: Option<String>,

    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub rollback_reason: Option<String>,

    #[serde(default)]
    pub build_artifacts: serde_json::Value,
    pub pre_deploy_metrics: Option<ReplicaMetrics>,
    pub post_deploy_metrics: Option<ReplicaMetrics>,
    pub health_check_results: Option<HealthReport>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

/// Deployment log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Append-only narrative entry attached to a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub id: String,
    pub deployment_id: String,
    pub level: LogLevel,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    pub source: String,
    pub timestamp: DateTime<Utc>,
}
