//! Server state

use std::sync::Arc;

use crate::approval::ApprovalRequestManager;
use crate::audit::AuditLog;
use crate::store::Store;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub approvals: Arc<ApprovalRequestManager>,
    pub audit: Arc<dyn AuditLog>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn Store>,
        approvals: Arc<ApprovalRequestManager>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            approvals,
            audit,
        }
    }
}
