//! Error type for the grouping and reconciliation operations.
//!
//! Data problems (missing fields, unparseable numbers) never surface here; they
//! degrade to empty strings, zeros or passthrough. Only caller configuration
//! mistakes and explicitly rejected data are reported.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("similarity threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("join key '{key}' is not present on any {side} item")]
    UnknownJoinKey { side: &'static str, key: String },
    #[error("negative weight {weight} on item with join key '{join_value}'")]
    NegativeWeight { join_value: String, weight: f64 },
}

pub type Result<T> = std::result::Result<T, MergeError>;
