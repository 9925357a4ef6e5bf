//! Enriched output.
//!
//! Serializes merged batches to Parquet and uploads them into their
//! business-date partition.

pub mod writer;

pub use writer::{PartitionedWriter, WrittenFile};
