//! Otterlens - concurrent pull request analysis.
//!
//! Fans a pull request out to several remote analysis producers (title,
//! reviewers, priority, summary, naming conventions), substitutes a
//! canonical default for any producer that fails or times out, and caches
//! aggregates that are entirely genuine.
//!
//! The entry point is [`analysis::AggregationEngine`].

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod permission;
pub mod producer;
pub mod repo;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::{AggregationEngine, EngineConfig};
pub use error::{AnalysisError, Result};
