//! Background workers

pub mod deployer;
pub mod expiry;
