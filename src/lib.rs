//! `cama-engine` library crate.
//!
//! The binary (`cama`) is a thin wrapper around this library so that:
//!
//! - the valuation and audit engine is testable without spawning processes
//! - an embedding service can own the registry and reference data directly
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod audit;
pub mod cli;
pub mod config;
pub mod cost;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod logging;
pub mod math;
pub mod models;
pub mod reconcile;
pub mod report;
