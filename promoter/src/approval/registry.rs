//! Handlers for approved requests, keyed by request type

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::errors::PromoterError;
use crate::models::approval::ApprovalRequest;

/// Carries out the action an approval request gates
#[async_trait]
pub trait ApprovalExecutor: Send + Sync {
    /// Run the approved action; the returned value is stored as the
    /// request's execution output.
    async fn execute(
        &self,
        request: &ApprovalRequest,
        executor_id: &str,
    ) -> Result<serde_json::Value, PromoterError>;

    /// Called once the request reached a terminal status other than by
    /// execution (approved, rejected, expired, cancelled).
    async fn on_resolved(&self, _request: &ApprovalRequest) -> Result<(), PromoterError> {
        Ok(())
    }
}

/// Request type → executor
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn ApprovalExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `request_type`, replacing any previous one
    pub fn register(&self, request_type: impl Into<String>, executor: Arc<dyn ApprovalExecutor>) {
        let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
        executors.insert(request_type.into(), executor);
    }

    pub fn get(&self, request_type: &str) -> Option<Arc<dyn ApprovalExecutor>> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.get(request_type).cloned()
    }

    pub fn request_types(&self) -> Vec<String> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<String> = executors.keys().cloned().collect();
        types.sort();
        types
    }
}
