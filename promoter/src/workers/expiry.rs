//! Periodic sweep of approval requests past their validity window

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::approval::ApprovalRequestManager;

/// Expiry worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the expiry worker
pub async fn run<S, F>(
    options: &Options,
    approvals: &ApprovalRequestManager,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Expiry worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Expiry worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match approvals.expire_stale().await {
            Ok(0) => debug!("No stale approval requests"),
            Ok(n) => debug!("Swept {} stale approval requests", n),
            Err(e) => error!("Approval expiry sweep failed: {}", e),
        }
    }
}
