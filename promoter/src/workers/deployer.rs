//! Deployment supervisor: runs queued pipelines as supervised tasks

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::deploy::pipeline::{ExecutionPipeline, PipelineQueue};
use crate::errors::PromoterError;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pipelines allowed to run at the same time
    pub max_concurrent: usize,

    /// Submissions buffered while every pipeline slot is busy; further
    /// submissions are refused
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_capacity: 64,
        }
    }
}

/// Sending half handed to the orchestrator
#[derive(Clone)]
pub struct DeploymentQueue {
    tx: mpsc::Sender<String>,
}

impl DeploymentQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl PipelineQueue for DeploymentQueue {
    fn submit(&self, deployment_id: String) -> Result<(), PromoterError> {
        self.tx.try_send(deployment_id).map_err(|e| match e {
            TrySendError::Full(id) => PromoterError::ExecutionFailed(format!(
                "deployment queue is full, {} was not scheduled",
                id
            )),
            TrySendError::Closed(id) => {
                PromoterError::ShutdownError(format!("deployment queue closed, dropped {}", id))
            }
        })
    }
}

/// Run the deployer worker until shutdown, then wait for in-flight
/// pipelines to finish.
pub async fn run(
    options: &Options,
    pipeline: Arc<ExecutionPipeline>,
    mut queue: mpsc::Receiver<String>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting...");
    let mut tasks: JoinSet<()> = JoinSet::new();
    let max_concurrent = options.max_concurrent.max(1);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            Some(deployment_id) = queue.recv(), if tasks.len() < max_concurrent => {
                info!(deployment_id = %deployment_id, "Starting pipeline");
                tasks.spawn(supervise(pipeline.clone(), deployment_id));
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Pipeline task aborted: {}", e);
                }
            }
        }
    }

    queue.close();
    let mut abandoned = 0;
    while queue.try_recv().is_ok() {
        abandoned += 1;
    }
    if abandoned > 0 {
        warn!("{} queued deployments were not started before shutdown", abandoned);
    }

    if !tasks.is_empty() {
        info!("Waiting for {} in-flight pipelines...", tasks.len());
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Pipeline task aborted: {}", e);
        }
    }
}

/// Run one pipeline; a panic is recorded on the deployment instead of
/// disappearing with the task.
async fn supervise(pipeline: Arc<ExecutionPipeline>, deployment_id: String) {
    let outcome = AssertUnwindSafe(pipeline.run(&deployment_id))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(record)) => {
            info!(deployment_id = %deployment_id, status = %record.status, "Pipeline finished");
        }
        Ok(Err(e)) => {
            error!(deployment_id = %deployment_id, "Pipeline failed: {}", e);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(deployment_id = %deployment_id, "Pipeline panicked: {}", message);
            pipeline.recover_crashed(&deployment_id, &message).await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
