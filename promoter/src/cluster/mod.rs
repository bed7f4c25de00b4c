//! Cluster control plane access

pub mod control;
pub mod runner;
