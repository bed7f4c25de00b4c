//! Approval workflow gating privileged actions

pub mod manager;
pub mod registry;

pub use manager::{ApprovalRequestManager, ApprovalSettings, NewApprovalRequest};
pub use registry::{ApprovalExecutor, ExecutorRegistry};
