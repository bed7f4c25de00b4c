//! Health check result models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one post-rollout check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Aggregate of every check that was attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub passed: bool,
    pub checks: Vec<HealthCheckResult>,
    pub total_duration_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn check(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
