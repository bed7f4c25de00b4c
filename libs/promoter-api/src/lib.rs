//! Status API models for the promotion engine

pub mod models;
