//! chatlake: a batch lake for chat-bot updates.
//!
//! Raw updates payloads land in an object store partitioned by business date.
//! A daily ETL normalizes one partition into a single Parquet file in the
//! enriched store, and a remote SQL engine is used to register the enriched
//! table and run analytical queries over it.
//!
//! # Example
//!
//! ```ignore
//! use chatlake::{Config, EtlPipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let run = EtlPipeline::from_config(&config).await?.run().await?;
//!     println!("{}: {:?}", run.partition, run.outcome);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod sink;
pub mod source;
pub mod storage;

pub use config::Config;
pub use pipeline::signal::{shutdown_token, until_shutdown};
pub use pipeline::{EtlOutcome, EtlPipeline, EtlRun, EtlStats, IngestOutcome, RawLanding};
pub use query::{
    QueryClient, QueryEngine, QueryOutcome, QueryRunner, TableDefinition, TableManager,
    TableStatus,
};
pub use storage::{StorageProvider, StorageProviderRef};
