//! Status API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deployment record as served to pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub service: String,
    pub source_env: String,
    pub target_env: String,
    pub image_tag: String,
    pub previous_image_tag: Option<String>,
    pub status: String,
    pub approval_request_id: Option<String>,
    pub git_commit: String,
    pub git_branch: String,
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
    pub error_message: Option<String>,

    /// Health report, as stored
    pub health_check_results: Option<serde_json::Value>,
}

/// One deployment log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogResponse {
    pub level: String,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Deployment log list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogListResponse {
    pub deployment_id: String,
    pub logs: Vec<DeploymentLogResponse>,
    pub total: usize,
}

/// Pending approval summary; never carries the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub id: String,
    pub request_type: String,
    pub requester_id: String,
    pub action: String,
    pub target_resource: String,
    pub reason: String,
    pub status: String,
    pub token_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Pending approval list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalListResponse {
    pub approvals: Vec<ApprovalSummary>,
    pub total: usize,
}

/// Audit chain verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerificationResponse {
    pub valid: bool,
    pub total_entries: usize,
    pub first_invalid_seq: Option<u64>,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
