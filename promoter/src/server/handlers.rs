//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use promoter_api::models::{
    ApprovalListResponse, ApprovalSummary, AuditVerificationResponse, DeploymentLogListResponse,
    DeploymentLogResponse, DeploymentResponse, ErrorResponse, HealthResponse, VersionResponse,
};
use tracing::error;

use crate::errors::PromoterError;
use crate::models::approval::ApprovalRequest;
use crate::models::deployment::{DeploymentLog, DeploymentRecord};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error wrapper mapping engine errors to status codes
pub struct ApiError(pub PromoterError);

impl From<PromoterError> for ApiError {
    fn from(err: PromoterError) -> Self {
        ApiError(err)
    }
}

pub fn status_code(err: &PromoterError) -> StatusCode {
    match err {
        PromoterError::NotFound(_) => StatusCode::NOT_FOUND,
        PromoterError::Unauthorized(_) | PromoterError::SelfApprovalNotAllowed => {
            StatusCode::FORBIDDEN
        }
        PromoterError::AlreadyInProgress { .. }
        | PromoterError::AlreadyProcessed(_)
        | PromoterError::AlreadyExecuted(_) => StatusCode::CONFLICT,
        PromoterError::Expired(_) => StatusCode::GONE,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!("Status API error: {}", self.0);
        }
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "promoter".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deployment status, for pollers following a detached pipeline
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let record = state
        .store
        .get_deployment(&id)
        .await?
        .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", id)))?;
    Ok(Json(to_deployment_response(record)))
}

pub async fn deployment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentLogListResponse>, ApiError> {
    if state.store.get_deployment(&id).await?.is_none() {
        return Err(PromoterError::NotFound(format!("Deployment {}", id)).into());
    }
    let logs: Vec<DeploymentLogResponse> = state
        .store
        .list_logs(&id)
        .await?
        .into_iter()
        .map(to_log_response)
        .collect();
    Ok(Json(DeploymentLogListResponse {
        deployment_id: id,
        total: logs.len(),
        logs,
    }))
}

/// Approvals still open for votes
pub async fn pending_approvals_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ApprovalListResponse>, ApiError> {
    let approvals: Vec<ApprovalSummary> = state
        .approvals
        .list_pending()
        .await?
        .into_iter()
        .map(to_approval_summary)
        .collect();
    Ok(Json(ApprovalListResponse {
        total: approvals.len(),
        approvals,
    }))
}

pub async fn audit_verify_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<AuditVerificationResponse>, ApiError> {
    let verification = state.audit.verify().await?;
    Ok(Json(AuditVerificationResponse {
        valid: verification.valid,
        total_entries: verification.total_entries,
        first_invalid_seq: verification.first_invalid_seq,
    }))
}

fn to_deployment_response(record: DeploymentRecord) -> DeploymentResponse {
    DeploymentResponse {
        status: record.status.to_string(),
        health_check_results: record
            .health_check_results
            .as_ref()
            .and_then(|r| serde_json::to_value(r).ok()),
        id: record.id,
        service: record.service,
        source_env: record.source_env,
        target_env: record.target_env,
        image_tag: record.image_tag,
        previous_image_tag: record.previous_image_tag,
        approval_request_id: record.approval_request_id,
        git_commit: record.git_commit,
        git_branch: record.git_branch,
        requested_by: record.requested_by,
        approved_by: record.approved_by,
        executed_by: record.executed_by,
        requested_at: record.requested_at,
        approved_at: record.approved_at,
        executed_at: record.executed_at,
        completed_at: record.completed_at,
        rolled_back_at: record.rolled_back_at,
        duration_ms: record.duration_ms,
        rollback_reason: record.rollback_reason,
        error_message: record.error_message,
    }
}

fn to_log_response(log: DeploymentLog) -> DeploymentLogResponse {
    DeploymentLogResponse {
        level: log.level.as_str().to_string(),
        message: log.message,
        source: log.source,
        timestamp: log.timestamp,
        metadata: log.metadata,
    }
}

fn to_approval_summary(request: ApprovalRequest) -> ApprovalSummary {
    ApprovalSummary {
        status: request.status.to_string(),
        id: request.id,
        request_type: request.request_type,
        requester_id: request.requester_id,
        action: request.action,
        target_resource: request.target_resource,
        reason: request.reason,
        token_expires_at: request.token_expires_at,
        created_at: request.created_at,
    }
}
