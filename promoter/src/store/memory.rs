//! In-memory store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PromoterError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::deployment::{DeploymentLog, DeploymentRecord, DeploymentStatus};
use crate::store::{
    ApprovalMutation, ApprovalStore, DeploymentLogStore, DeploymentMutation, DeploymentStore,
};

/// Store backed by process memory, one lock per table
#[derive(Default)]
pub struct MemoryStore {
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    logs: RwLock<Vec<DeploymentLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert_approval(&self, request: ApprovalRequest) -> Result<(), PromoterError> {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        if approvals.contains_key(&request.id) {
            return Err(PromoterError::StorageError(format!(
                "Duplicate approval id {}",
                request.id
            )));
        }
        approvals.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRequest>, PromoterError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        Ok(approvals.get(id).cloned())
    }

    async fn count_pending_for(
        &self,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, PromoterError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        Ok(approvals
            .values()
            .filter(|a| {
                a.requester_id == requester_id
                    && a.status == ApprovalStatus::Pending
                    && !a.is_expired_at(now)
            })
            .count())
    }

    async fn list_approvals(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, PromoterError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }

    async fn update_approval(
        &self,
        id: &str,
        mutate: ApprovalMutation,
    ) -> Result<Option<ApprovalRequest>, PromoterError> {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        let current = approvals
            .get(id)
            .ok_or_else(|| PromoterError::NotFound(format!("Approval request {}", id)))?;

        let mut next = current.clone();
        if !mutate(&mut next) {
            return Ok(None);
        }
        approvals.insert(id.to_string(), next.clone());
        Ok(Some(next))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_deployment(&self, record: DeploymentRecord) -> Result<(), PromoterError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());

        let slot_taken = deployments.values().any(|d| {
            d.service == record.service && d.target_env == record.target_env && d.status.is_active()
        });
        if slot_taken {
            return Err(PromoterError::AlreadyInProgress {
                service: record.service,
                target_env: record.target_env,
            });
        }
        if deployments.contains_key(&record.id) {
            return Err(PromoterError::StorageError(format!(
                "Duplicate deployment id {}",
                record.id
            )));
        }

        deployments.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<DeploymentRecord>, PromoterError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(deployments.get(id).cloned())
    }

    async fn find_active_deployment(
        &self,
        service: &str,
        target_env: &str,
    ) -> Result<Option<DeploymentRecord>, PromoterError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(deployments
            .values()
            .find(|d| d.service == service && d.target_env == target_env && d.status.is_active())
            .cloned())
    }

    async fn list_deployments(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, PromoterError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<DeploymentRecord> = deployments
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.requested_at);
        Ok(rows)
    }

    async fn update_deployment(
        &self,
        id: &str,
        mutate: DeploymentMutation,
    ) -> Result<Option<DeploymentRecord>, PromoterError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());
        let current = deployments
            .get(id)
            .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", id)))?;

        let mut next = current.clone();
        if !mutate(&mut next) {
            return Ok(None);
        }

        // A mutation may not move a second record into an occupied slot
        if next.status.is_active() && !current.status.is_active() {
            let slot_taken = deployments.values().any(|d| {
                d.id != next.id
                    && d.service == next.service
                    && d.target_env == next.target_env
                    && d.status.is_active()
            });
            if slot_taken {
                return Err(PromoterError::AlreadyInProgress {
                    service: next.service,
                    target_env: next.target_env,
                });
            }
        }

        deployments.insert(id.to_string(), next.clone());
        Ok(Some(next))
    }
}

#[async_trait]
impl DeploymentLogStore for MemoryStore {
    async fn append_log(&self, entry: DeploymentLog) -> Result<(), PromoterError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        logs.push(entry);
        Ok(())
    }

    async fn list_logs(&self, deployment_id: &str) -> Result<Vec<DeploymentLog>, PromoterError> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<DeploymentLog> = logs
            .iter()
            .filter(|l| l.deployment_id == deployment_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        entries.sort_by_key(|l| l.timestamp);
        Ok(entries)
    }
}
