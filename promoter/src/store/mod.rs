//! Persistent store interfaces
//!
//! Every post-creation write goes through a conditional update: the mutation
//! is applied to a copy of the row and committed only if it returns `true`,
//! atomically with respect to other writers of the same row.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PromoterError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::deployment::{DeploymentLog, DeploymentRecord, DeploymentStatus};

pub use memory::MemoryStore;

/// Conditional mutation of an approval row; return `false` to abort
pub type ApprovalMutation = Box<dyn FnOnce(&mut ApprovalRequest) -> bool + Send>;

/// Conditional mutation of a deployment row; return `false` to abort
pub type DeploymentMutation = Box<dyn FnOnce(&mut DeploymentRecord) -> bool + Send>;

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_approval(&self, request: ApprovalRequest) -> Result<(), PromoterError>;

    async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRequest>, PromoterError>;

    /// Pending requests of `requester_id` still inside their validity window at `now`
    async fn count_pending_for(
        &self,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, PromoterError>;

    async fn list_approvals(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<ApprovalRequest>, PromoterError>;

    /// Returns the committed row, `None` if the mutation declined.
    /// Fails with `NotFound` if the row does not exist.
    async fn update_approval(
        &self,
        id: &str,
        mutate: ApprovalMutation,
    ) -> Result<Option<ApprovalRequest>, PromoterError>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Inserts the record unless another active record holds the same
    /// (service, target env) slot, in which case `AlreadyInProgress`.
    async fn insert_deployment(&self, record: DeploymentRecord) -> Result<(), PromoterError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<DeploymentRecord>, PromoterError>;

    async fn find_active_deployment(
        &self,
        service: &str,
        target_env: &str,
    ) -> Result<Option<DeploymentRecord>, PromoterError>;

    async fn list_deployments(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, PromoterError>;

    /// Same contract as [`ApprovalStore::update_approval`]
    async fn update_deployment(
        &self,
        id: &str,
        mutate: DeploymentMutation,
    ) -> Result<Option<DeploymentRecord>, PromoterError>;
}

#[async_trait]
pub trait DeploymentLogStore: Send + Sync {
    async fn append_log(&self, entry: DeploymentLog) -> Result<(), PromoterError>;

    /// Entries for one deployment, oldest first
    async fn list_logs(&self, deployment_id: &str) -> Result<Vec<DeploymentLog>, PromoterError>;
}

/// Everything the engine needs from persistence
pub trait Store: ApprovalStore + DeploymentStore + DeploymentLogStore {}

impl<T> Store for T where T: ApprovalStore + DeploymentStore + DeploymentLogStore {}
