//! Domain models

pub mod approval;
pub mod deployment;
pub mod health;
