//! Consolidates periodic sensor snapshot files into one deduplicated,
//! time-ordered dataset and enforces a retention policy over the snapshots.
//!
//! The pieces compose leaves first: [`recency::TimestampProvider`] resolves
//! how recent a snapshot is, [`catalog::SnapshotCatalog`] ranks the
//! snapshots, [`retention::RetentionPolicy`] partitions them, and
//! [`merge::Merger`] builds the canonical dataset. [`pipeline::Pipeline`]
//! runs them in order.

pub mod catalog;
pub mod config;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod recency;
pub mod retention;
pub mod table;
pub mod timestamp;
pub mod vcs;

pub use config::PipelineConfig;
pub use error::{Error, Result, Warning};
pub use pipeline::{Pipeline, PipelineState, RunReport};
pub use retention::RetentionPolicy;
