//! Post-rollout health verification

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::cluster::control::ClusterControl;
use crate::models::health::{HealthCheckResult, HealthReport};

pub const POD_READINESS: &str = "pod_readiness";
pub const HEALTH_ENDPOINT: &str = "health_endpoint";
pub const RESTART_LOOP: &str = "restart_loop";

/// Restart total at which a workload counts as crash looping
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Runs readiness, endpoint and restart checks and ANDs them
pub struct HealthCheckEngine {
    cluster: Arc<ClusterControl>,
    max_restarts: u32,
}

impl HealthCheckEngine {
    pub fn new(cluster: Arc<ClusterControl>) -> Self {
        Self {
            cluster,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Run every check for `service` in `env`.
    ///
    /// The endpoint probe only runs once pods are ready; when skipped it is
    /// left out of the report rather than recorded as a failure.
    pub async fn run(&self, service: &str, env: &str) -> HealthReport {
        let started = Instant::now();
        let mut checks = Vec::with_capacity(3);

        let readiness = self.check_pod_readiness(service, env).await;
        let ready = readiness.passed;
        checks.push(readiness);

        if ready {
            checks.push(self.check_health_endpoint(service, env).await);
        } else {
            debug!("Skipping health endpoint probe for {}: pods not ready", service);
        }

        checks.push(self.check_restart_loop(service, env).await);

        HealthReport {
            passed: checks.iter().all(|c| c.passed),
            checks,
            total_duration_ms: started.elapsed().as_millis() as u64,
            checked_at: Utc::now(),
        }
    }

    async fn check_pod_readiness(&self, service: &str, env: &str) -> HealthCheckResult {
        let started = Instant::now();
        let (passed, message, details) = match self.cluster.replica_counts(service, env).await {
            Ok(counts) => {
                let passed = counts.ready > 0 && counts.ready == counts.total;
                let message = format!("{}/{} replicas ready", counts.ready, counts.total);
                (
                    passed,
                    message,
                    Some(json!({ "ready": counts.ready, "total": counts.total })),
                )
            }
            Err(e) => (false, format!("Could not read replica counts: {}", e), None),
        };

        HealthCheckResult {
            name: POD_READINESS.to_string(),
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            details,
        }
    }

    async fn check_health_endpoint(&self, service: &str, env: &str) -> HealthCheckResult {
        let started = Instant::now();
        let path = self.cluster.options().health_path.clone();
        let (passed, message) = match self.cluster.probe_health(service, env).await {
            Ok(output) if output.success => (true, format!("{} responded", path)),
            Ok(output) => (false, format!("{} probe failed: {}", path, output.error_text())),
            Err(e) => (false, format!("{} probe could not run: {}", path, e)),
        };

        HealthCheckResult {
            name: HEALTH_ENDPOINT.to_string(),
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            details: Some(json!({ "path": path })),
        }
    }

    async fn check_restart_loop(&self, service: &str, env: &str) -> HealthCheckResult {
        let started = Instant::now();
        let (passed, message, details) = match self.cluster.restart_counts(service, env).await {
            Ok(counts) => {
                let total = counts.iter().fold(0u32, |acc, n| acc.saturating_add(*n));
                let passed = total < self.max_restarts;
                let message = if passed {
                    format!("{} restarts across {} containers", total, counts.len())
                } else {
                    format!(
                        "{} restarts across {} containers, likely crash loop",
                        total,
                        counts.len()
                    )
                };
                (
                    passed,
                    message,
                    Some(json!({ "total_restarts": total, "per_container": counts })),
                )
            }
            Err(e) => (false, format!("Could not read restart counts: {}", e), None),
        };

        HealthCheckResult {
            name: RESTART_LOOP.to_string(),
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            details,
        }
    }
}
