//! Deployment narrative: DeploymentLog rows mirrored to tracing

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::models::deployment::{DeploymentLog, LogLevel};
use crate::store::Store;
use crate::utils::generate_uuid;

/// Appends log entries for deployments on behalf of one component
#[derive(Clone)]
pub struct Journal {
    store: Arc<dyn Store>,
    source: String,
}

impl Journal {
    pub fn new(store: Arc<dyn Store>, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
        }
    }

    pub async fn info(&self, deployment_id: &str, message: impl Into<String>) {
        self.append(deployment_id, LogLevel::Info, message.into(), None).await;
    }

    pub async fn warn(&self, deployment_id: &str, message: impl Into<String>) {
        self.append(deployment_id, LogLevel::Warn, message.into(), None).await;
    }

    pub async fn error(&self, deployment_id: &str, message: impl Into<String>) {
        self.append(deployment_id, LogLevel::Error, message.into(), None).await;
    }

    pub async fn with_metadata(
        &self,
        deployment_id: &str,
        level: LogLevel,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        self.append(deployment_id, level, message.into(), Some(metadata))
            .await;
    }

    async fn append(
        &self,
        deployment_id: &str,
        level: LogLevel,
        message: String,
        metadata: Option<serde_json::Value>,
    ) {
        match level {
            LogLevel::Debug => debug!(deployment_id, source = %self.source, "{}", message),
            LogLevel::Info => info!(deployment_id, source = %self.source, "{}", message),
            LogLevel::Warn => warn!(deployment_id, source = %self.source, "{}", message),
            LogLevel::Error => error!(deployment_id, source = %self.source, "{}", message),
        }

        let entry = DeploymentLog {
            id: generate_uuid(),
            deployment_id: deployment_id.to_string(),
            level,
            message,
            metadata,
            source: self.source.clone(),
            timestamp: Utc::now(),
        };
        // The narrative never interrupts the operation it describes
        if let Err(e) = self.store.append_log(entry).await {
            error!(deployment_id, "Failed to append deployment log: {}", e);
        }
    }
}
