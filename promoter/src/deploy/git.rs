//! Git metadata lookup for promotion requests

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::runner::{CommandRunner, CommandSpec};

const UNKNOWN: &str = "unknown";

/// Commit the promoted build was made from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    pub commit: String,
    pub branch: String,
    pub message: String,
}

impl GitMetadata {
    pub fn unknown() -> Self {
        Self {
            commit: UNKNOWN.to_string(),
            branch: UNKNOWN.to_string(),
            message: UNKNOWN.to_string(),
        }
    }
}

/// Source of git metadata; lookups never fail, they fall back to "unknown"
#[async_trait]
pub trait GitMetadataProvider: Send + Sync {
    async fn lookup(&self, service: &str) -> GitMetadata;
}

/// Reads HEAD of a local checkout through the `git` CLI
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            repo_dir: repo_dir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Option<String> {
        let mut full = vec!["-C".to_string(), self.repo_dir.display().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        let spec = CommandSpec::new("git", full);

        match self.runner.run(&spec).await {
            Ok(output) if output.success => {
                let value = output.stdout.trim().to_string();
                (!value.is_empty()).then_some(value)
            }
            Ok(output) => {
                debug!("git {:?} failed: {}", args, output.error_text());
                None
            }
            Err(e) => {
                debug!("git {:?} could not run: {}", args, e);
                None
            }
        }
    }
}

#[async_trait]
impl GitMetadataProvider for GitCli {
    async fn lookup(&self, _service: &str) -> GitMetadata {
        let unknown = || UNKNOWN.to_string();
        GitMetadata {
            commit: self.git(&["rev-parse", "HEAD"]).await.unwrap_or_else(unknown),
            branch: self
                .git(&["rev-parse", "--abbrev-ref", "HEAD"])
                .await
                .unwrap_or_else(unknown),
            message: self
                .git(&["log", "-1", "--pretty=%s"])
                .await
                .unwrap_or_else(unknown),
        }
    }
}

/// Provider for deployments without a local checkout
#[derive(Debug, Default, Clone)]
pub struct NoGitMetadata;

#[async_trait]
impl GitMetadataProvider for NoGitMetadata {
    async fn lookup(&self, _service: &str) -> GitMetadata {
        GitMetadata::unknown()
    }
}
