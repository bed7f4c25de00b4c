//! Error types for the promotion engine

use thiserror::Error;

/// Main error type for the promotion engine
#[derive(Error, Debug)]
pub enum PromoterError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid promotion: {0}")]
    InvalidPromotion(String),

    #[error("Deployment already in progress for {service} in {target_env}")]
    AlreadyInProgress { service: String, target_env: String },

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Already executed: {0}")]
    AlreadyExecuted(String),

    #[error("Approval request expired: {0}")]
    Expired(String),

    #[error("Requester cannot approve their own request")]
    SelfApprovalNotAllowed,

    #[error("Requester already has {0} pending approval requests")]
    MaxPendingExceeded(usize),

    #[error("Not approved: {0}")]
    NotApproved(String),

    #[error("No previous image available for rollback of deployment {0}")]
    PreviousImageNotAvailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PromoterError {
    fn from(err: anyhow::Error) -> Self {
        PromoterError::Internal(err.to_string())
    }
}

impl PromoterError {
    /// True for errors raised by request validation, before any mutation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PromoterError::NotFound(_)
                | PromoterError::InvalidPromotion(_)
                | PromoterError::AlreadyInProgress { .. }
                | PromoterError::AlreadyProcessed(_)
                | PromoterError::AlreadyExecuted(_)
                | PromoterError::Expired(_)
                | PromoterError::SelfApprovalNotAllowed
                | PromoterError::MaxPendingExceeded(_)
                | PromoterError::NotApproved(_)
                | PromoterError::PreviousImageNotAvailable(_)
                | PromoterError::Unauthorized(_)
        )
    }
}
