//! Batch fraud scoring.
//!
//! Trains a decision tree on labeled transactions, or scores unlabeled ones
//! with a previously persisted pipeline. Account identifiers are masked with
//! SHA-256 as soon as records are loaded and never leave the process.

pub mod config;
pub mod encoder;
pub mod error;
pub mod masking;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod transaction;

//test module
#[cfg(test)]
mod tests;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use model::FraudPipeline;
pub use pipeline::{run, RunMode, RunSummary};
pub use transaction::{EncodedRecord, PredictionResult, TransactionRecord, TransactionSet};
