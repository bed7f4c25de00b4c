//! Finite State Machine for deployment records

use crate::errors::PromoterError;
use crate::models::deployment::{DeploymentRecord, DeploymentStatus};
use crate::store::Store;

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Second-party approval granted
    Approve,

    /// Withdrawn before execution, or approval rejected
    Cancel,

    /// Pipeline picked up the deployment
    Start,

    /// Image updated, waiting on verification
    BeginHealthCheck,

    /// Verification passed
    Complete,

    /// Unrecoverable error during execution
    Fail,

    /// Previous image restored once the pipeline is done with the record
    RollBack,

    /// Previous image restored by the pipeline that owns the record
    AbortRollout,
}

/// Resolve the status reached from `from` on `event`
pub fn transition(
    from: DeploymentStatus,
    event: DeploymentEvent,
) -> Result<DeploymentStatus, PromoterError> {
    use DeploymentEvent as E;
    use DeploymentStatus as S;

    let to = match (from, event) {
        // Before execution
        (S::PendingApproval, E::Approve) => S::Approved,
        (S::PendingApproval, E::Cancel) => S::Cancelled,
        (S::Approved, E::Cancel) => S::Cancelled,
        (S::Approved, E::Start) => S::InProgress,

        // Execution
        (S::InProgress, E::BeginHealthCheck) => S::HealthCheck,
        (S::InProgress, E::Fail) => S::Failed,
        (S::HealthCheck, E::Complete) => S::Completed,
        (S::HealthCheck, E::Fail) => S::Failed,

        // Rollback by the pipeline, from a rollout it gave up on
        (S::HealthCheck, E::AbortRollout) | (S::Failed, E::AbortRollout) => S::RolledBack,

        // Rollback after the fact. HEALTH_CHECK is only reachable here once
        // the pipeline has left the record for an operator, see
        // `pipeline_released`.
        (S::HealthCheck, E::RollBack)
        | (S::Failed, E::RollBack)
        | (S::Completed, E::RollBack) => S::RolledBack,

        // Invalid transitions
        (state, event) => {
            return Err(PromoterError::InvalidTransition(format!(
                "{:?} -> {:?}",
                state, event
            )));
        }
    };

    Ok(to)
}

/// Whether `event` is accepted in `from`
pub fn can_transition(from: DeploymentStatus, event: DeploymentEvent) -> bool {
    transition(from, event).is_ok()
}

/// Whether no pipeline writes to `record` any more.
///
/// A HEALTH_CHECK record is still owned by its pipeline until the pipeline
/// gives up on it, which it marks by setting `error_message`.
pub fn pipeline_released(record: &DeploymentRecord) -> bool {
    match record.status {
        DeploymentStatus::InProgress => false,
        DeploymentStatus::HealthCheck => record.error_message.is_some(),
        _ => true,
    }
}

/// Move a stored record along `event`, applying `apply` in the same
/// conditional update. Fails with `InvalidTransition` if the stored status
/// does not accept the event at commit time.
pub async fn advance<F>(
    store: &dyn Store,
    id: &str,
    event: DeploymentEvent,
    apply: F,
) -> Result<DeploymentRecord, PromoterError>
where
    F: FnOnce(&mut DeploymentRecord) + Send + 'static,
{
    advance_if(store, id, event, |_| true, apply).await
}

/// Like [`advance`], but the stored record must also satisfy `guard` at
/// commit time.
pub async fn advance_if<G, F>(
    store: &dyn Store,
    id: &str,
    event: DeploymentEvent,
    guard: G,
    apply: F,
) -> Result<DeploymentRecord, PromoterError>
where
    G: FnOnce(&DeploymentRecord) -> bool + Send + 'static,
    F: FnOnce(&mut DeploymentRecord) + Send + 'static,
{
    let updated = store
        .update_deployment(
            id,
            Box::new(move |record: &mut DeploymentRecord| {
                if !guard(&*record) {
                    return false;
                }
                match transition(record.status, event) {
                    Ok(next) => {
                        record.status = next;
                        apply(record);
                        true
                    }
                    Err(_) => false,
                }
            }),
        )
        .await?;

    match updated {
        Some(record) => Ok(record),
        None => {
            let current = store
                .get_deployment(id)
                .await?
                .map(|r| r.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            Err(PromoterError::InvalidTransition(format!(
                "deployment {} is {}, cannot apply {:?}",
                id, current, event
            )))
        }
    }
}

/// Update fields of a stored record without changing its status
pub async fn patch<F>(store: &dyn Store, id: &str, apply: F) -> Result<DeploymentRecord, PromoterError>
where
    F: FnOnce(&mut DeploymentRecord) + Send + 'static,
{
    store
        .update_deployment(
            id,
            Box::new(move |record: &mut DeploymentRecord| {
                apply(record);
                true
            }),
        )
        .await?
        .ok_or_else(|| PromoterError::NotFound(format!("Deployment {}", id)))
}
