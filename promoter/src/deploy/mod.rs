//! Deployment module

pub mod fsm;
pub mod git;
pub mod health;
pub mod journal;
pub mod orchestrator;
pub mod pipeline;
pub mod rollback;

use crate::cluster::runner::CommandOutput;
use crate::errors::PromoterError;

/// Collapse the result of one cluster step into `Err(message)` when it did
/// not succeed, whether the command could not run or exited badly.
pub(crate) fn step_outcome(
    step: &str,
    result: Result<CommandOutput, PromoterError>,
) -> Result<CommandOutput, String> {
    match result {
        Ok(output) if output.success => Ok(output),
        Ok(output) => Err(format!("{} failed: {}", step, output.error_text())),
        Err(e) => Err(format!("{} could not run: {}", step, e)),
    }
}
