//! Typed control-plane operations on top of a [`CommandRunner`]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cluster::runner::{CommandOutput, CommandRunner, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
use crate::errors::PromoterError;

/// Cluster settings
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Control-plane CLI binary
    pub kubectl_bin: String,

    /// Image registry prefix, e.g. `ghcr.io/acme`
    pub registry: String,

    /// Environment name -> namespace; unmapped environments use their own name
    pub namespaces: HashMap<String, String>,

    /// In-cluster port and path probed by the health endpoint check
    pub health_port: u16,
    pub health_path: String,

    /// Bound for ordinary commands
    pub command_timeout: Duration,

    /// Bound for rollout convergence
    pub rollout_timeout: Duration,

    /// Bound for the health endpoint probe
    pub probe_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            kubectl_bin: "kubectl".to_string(),
            registry: String::new(),
            namespaces: HashMap::new(),
            health_port: 3000,
            health_path: "/health".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            rollout_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Ready vs desired replicas of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub ready: u32,
    pub total: u32,
}

/// Extra time granted to the runner beyond the CLI's own rollout timeout,
/// so the CLI reports its timeout before the process is killed
const ROLLOUT_GRACE: Duration = Duration::from_secs(10);

/// Control-plane client for service workloads
pub struct ClusterControl {
    runner: Arc<dyn CommandRunner>,
    options: ClusterOptions,
}

impl ClusterControl {
    pub fn new(runner: Arc<dyn CommandRunner>, options: ClusterOptions) -> Self {
        Self { runner, options }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Namespace hosting an environment
    pub fn namespace(&self, env: &str) -> String {
        self.options
            .namespaces
            .get(env)
            .cloned()
            .unwrap_or_else(|| env.to_string())
    }

    /// Fully-qualified image reference for a service tag
    pub fn image_ref(&self, service: &str, tag: &str) -> String {
        let registry = self.options.registry.trim_end_matches('/');
        if registry.is_empty() {
            format!("{}:{}", service, tag)
        } else {
            format!("{}/{}:{}", registry, service, tag)
        }
    }

    fn kubectl<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.options.kubectl_bin.clone(), args)
            .with_timeout(self.options.command_timeout)
    }

    /// Tag of the image currently deployed, `None` if it cannot be determined
    pub async fn current_image_tag(
        &self,
        service: &str,
        env: &str,
    ) -> Result<Option<String>, PromoterError> {
        let spec = self.kubectl([
            "get".to_string(),
            "deployment".to_string(),
            service.to_string(),
            "-n".to_string(),
            self.namespace(env),
            "-o".to_string(),
            "jsonpath={.spec.template.spec.containers[0].image}".to_string(),
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success {
            debug!("Could not read current image of {} in {}: {}", service, env, output.error_text());
            return Ok(None);
        }
        Ok(parse_image_tag(&output.stdout))
    }

    /// Point the workload at a new image tag
    pub async fn set_image(
        &self,
        service: &str,
        env: &str,
        tag: &str,
    ) -> Result<CommandOutput, PromoterError> {
        let spec = self.kubectl([
            "set".to_string(),
            "image".to_string(),
            format!("deployment/{}", service),
            format!("{}={}", service, self.image_ref(service, tag)),
            "-n".to_string(),
            self.namespace(env),
        ]);
        self.runner.run(&spec).await
    }

    /// Block until the rollout converges or the rollout timeout passes
    pub async fn wait_for_rollout(
        &self,
        service: &str,
        env: &str,
    ) -> Result<CommandOutput, PromoterError> {
        let timeout = self.options.rollout_timeout;
        let spec = self
            .kubectl([
                "rollout".to_string(),
                "status".to_string(),
                format!("deployment/{}", service),
                "-n".to_string(),
                self.namespace(env),
                format!("--timeout={}s", timeout.as_secs()),
            ])
            .with_timeout(timeout + ROLLOUT_GRACE);
        self.runner.run(&spec).await
    }

    /// Ready and desired replica counts
    pub async fn replica_counts(
        &self,
        service: &str,
        env: &str,
    ) -> Result<ReplicaCounts, PromoterError> {
        let spec = self.kubectl([
            "get".to_string(),
            "deployment".to_string(),
            service.to_string(),
            "-n".to_string(),
            self.namespace(env),
            "-o".to_string(),
            "jsonpath={.status.readyReplicas}/{.status.replicas}".to_string(),
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success {
            return Err(PromoterError::CommandError(format!(
                "Failed to read replicas of {}: {}",
                service,
                output.error_text()
            )));
        }
        parse_replica_counts(&output.stdout)
    }

    /// Container restart counts across every pod of the workload
    pub async fn restart_counts(
        &self,
        service: &str,
        env: &str,
    ) -> Result<Vec<u32>, PromoterError> {
        let spec = self.kubectl([
            "get".to_string(),
            "pods".to_string(),
            "-n".to_string(),
            self.namespace(env),
            "-l".to_string(),
            format!("app={}", service),
            "-o".to_string(),
            "jsonpath={.items[*].status.containerStatuses[*].restartCount}".to_string(),
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success {
            return Err(PromoterError::CommandError(format!(
                "Failed to read restart counts of {}: {}",
                service,
                output.error_text()
            )));
        }
        parse_restart_counts(&output.stdout)
    }

    /// Request the service's health path from inside one of its pods
    pub async fn probe_health(
        &self,
        service: &str,
        env: &str,
    ) -> Result<CommandOutput, PromoterError> {
        let timeout = self.options.probe_timeout;
        let url = format!(
            "http://localhost:{}{}",
            self.options.health_port, self.options.health_path
        );
        let spec = self
            .kubectl([
                "exec".to_string(),
                format!("deployment/{}", service),
                "-n".to_string(),
                self.namespace(env),
                "--".to_string(),
                "wget".to_string(),
                "-q".to_string(),
                "-O-".to_string(),
                format!("-T{}", timeout.as_secs()),
                url,
            ])
            .with_timeout(timeout);
        self.runner.run(&spec).await
    }
}

/// Extract the tag from `registry/name:tag`; a port in the registry host is
/// not mistaken for a tag
pub fn parse_image_tag(image: &str) -> Option<String> {
    let image = image.trim();
    let name = image.rsplit('/').next()?;
    let (_, tag) = name.split_once(':')?;
    let tag = tag.split('@').next().unwrap_or(tag);
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

/// Parse `ready/total`; an absent ready count means zero
pub fn parse_replica_counts(raw: &str) -> Result<ReplicaCounts, PromoterError> {
    let raw = raw.trim();
    let (ready, total) = raw
        .split_once('/')
        .ok_or_else(|| PromoterError::CommandError(format!("Unexpected replica output: {:?}", raw)))?;

    let parse = |value: &str| -> Result<u32, PromoterError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(0);
        }
        value
            .parse::<u32>()
            .map_err(|e| PromoterError::CommandError(format!("Bad replica count {:?}: {}", value, e)))
    };

    Ok(ReplicaCounts {
        ready: parse(ready)?,
        total: parse(total)?,
    })
}

/// Parse whitespace-separated restart counts
pub fn parse_restart_counts(raw: &str) -> Result<Vec<u32>, PromoterError> {
    raw.split_whitespace()
        .map(|v| {
            v.parse::<u32>()
                .map_err(|e| PromoterError::CommandError(format!("Bad restart count {:?}: {}", v, e)))
        })
        .collect()
}
