//! Shipment Merge - invoice grouping and document-fragment reconciliation for
//! customs declaration pipelines.
//!
//! Pure, synchronous transformations over extracted records. The HTTP service
//! in `main.rs` is a thin shell around these modules.

pub mod address;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fragments;
pub mod grouping;
pub mod normalize;
pub mod reconcile;
pub mod record;
pub mod sheet_parser;
pub mod similarity;

pub use error::{MergeError, Result};
pub use grouping::{group_and_merge, EmptyAddressPolicy, GroupingRules};
pub use reconcile::{reconcile, JoinKey, ReconcileSpec, WeightPolicy};
pub use record::Record;
pub use similarity::{ScorerKind, SimilarityScorer};
