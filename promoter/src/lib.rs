//! Promoter Library
//!
//! Approval-gated promotion of service images across environments, with
//! automated health verification and rollback.

pub mod app;
pub mod approval;
pub mod audit;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;

/// Macro for creating trace information
#[macro_export]
macro_rules! trace {
    () => {
        format!("{}:{}", file!(), line!())
    };
}
