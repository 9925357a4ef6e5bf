//! Batch ETL over one business-date partition.
//!
//! Lists the raw updates files of the target partition, normalizes and
//! merges them one at a time, and writes a single Parquet file into the
//! same partition of the enriched store.
//!
//! Failures are isolated at file granularity: a file that cannot be decoded
//! or converted is logged and skipped. Store failures and schema mismatches
//! abort the run.

mod ingest;
pub(crate) mod signal;

pub use ingest::{IngestOutcome, RawLanding};

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchMerger, Merged, records_to_batch};
use crate::config::Config;
use crate::emit;
use crate::error::{BatchSnafu, PipelineError, PipelineStorageSnafu, SinkSnafu};
use crate::metrics::events::{
    BytesRead, EtlRunCompleted, FileDownloadCompleted, FileProcessed, FileStatus,
};
use crate::sink::{PartitionedWriter, WrittenFile};
use crate::source::{RecordNormalizer, UpdatesFile};
use crate::storage::{Partition, PartitionScheme, StorageProvider, StorageProviderRef};

/// Statistics about one ETL run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtlStats {
    /// Raw files found under the partition prefix.
    pub files_listed: usize,
    /// Files that contributed records.
    pub files_processed: usize,
    /// Files that could not be decoded or converted.
    pub files_skipped: usize,
    /// Files that decoded but held no message envelopes.
    pub files_empty: usize,
    pub records_written: usize,
    /// Malformed envelopes dropped by the normalizer.
    pub records_skipped: usize,
}

/// How an ETL run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtlOutcome {
    /// The partition held no raw files.
    NoInput,
    /// Raw files existed but none produced a record.
    NoData,
    /// One enriched file was written.
    Written(WrittenFile),
}

impl EtlOutcome {
    fn label(&self) -> &'static str {
        match self {
            EtlOutcome::NoInput => "no_input",
            EtlOutcome::NoData => "no_data",
            EtlOutcome::Written(_) => "written",
        }
    }
}

/// Summary of one ETL run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlRun {
    pub partition: Partition,
    pub outcome: EtlOutcome,
    pub stats: EtlStats,
}

/// The raw-to-enriched batch job.
#[derive(Debug)]
pub struct EtlPipeline {
    raw: StorageProviderRef,
    writer: PartitionedWriter,
    scheme: PartitionScheme,
}

impl EtlPipeline {
    pub fn new(raw: StorageProviderRef, writer: PartitionedWriter, scheme: PartitionScheme) -> Self {
        Self {
            raw,
            writer,
            scheme,
        }
    }

    /// Build the pipeline and its store clients from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let raw = Arc::new(
            StorageProvider::for_url_with_options(
                &config.storage.raw.url,
                config.storage.raw.storage_options.clone(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        let enriched = Arc::new(
            StorageProvider::for_url_with_options(
                &config.storage.enriched.url,
                config.storage.enriched.storage_options.clone(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        let writer = PartitionedWriter::new(enriched, &config.writer);
        let scheme = PartitionScheme::from_config(&config.partition);

        Ok(Self::new(raw, writer, scheme))
    }

    /// Run over the partition that is due now.
    pub async fn run(&self) -> Result<EtlRun, PipelineError> {
        self.run_at(Utc::now()).await
    }

    /// Run as if the current time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<EtlRun, PipelineError> {
        let start = Instant::now();
        let partition = self.scheme.etl_partition(now);
        let prefix = partition.prefix();
        info!(partition = %prefix, source = self.raw.canonical_url(), "Starting ETL run");

        let keys = self
            .raw
            .list_keys(&prefix)
            .await
            .context(PipelineStorageSnafu)?;

        let mut stats = EtlStats {
            files_listed: keys.len(),
            ..Default::default()
        };

        if keys.is_empty() {
            info!(partition = %prefix, "No raw files found to process");
            return Ok(self.finish(partition, EtlOutcome::NoInput, stats, start));
        }

        let normalizer = RecordNormalizer::new(now);
        let mut merger = BatchMerger::new();

        for key in &keys {
            self.process_file(key, &normalizer, &mut merger, &mut stats)
                .await?;
        }

        let outcome = match merger.finish().context(BatchSnafu)? {
            Merged::Batch(batch) if batch.num_rows() > 0 => {
                let written = self
                    .writer
                    .write_at(&batch, &partition, now)
                    .await
                    .context(SinkSnafu)?;
                stats.records_written = written.record_count;
                EtlOutcome::Written(written)
            }
            Merged::Batch(_) | Merged::NoData => {
                warn!(partition = %prefix, "No data was produced by this run");
                EtlOutcome::NoData
            }
        };

        Ok(self.finish(partition, outcome, stats, start))
    }

    /// Download, decode, normalize and merge one raw file.
    ///
    /// Only store failures and fatal merge errors are returned; everything
    /// else skips the file.
    async fn process_file(
        &self,
        key: &str,
        normalizer: &RecordNormalizer,
        merger: &mut BatchMerger,
        stats: &mut EtlStats,
    ) -> Result<(), PipelineError> {
        let download_start = Instant::now();
        let body = self.raw.get(key).await.context(PipelineStorageSnafu)?;
        emit!(BytesRead {
            bytes: body.len() as u64
        });
        emit!(FileDownloadCompleted {
            duration: download_start.elapsed()
        });

        let updates = match UpdatesFile::decode(key, &body) {
            Ok(updates) => updates,
            Err(e) => {
                error!(key, "Skipping file: {}", e);
                stats.files_skipped += 1;
                emit!(FileProcessed {
                    status: FileStatus::Skipped
                });
                return Ok(());
            }
        };

        info!(key, envelopes = updates.result.len(), "Processing file");
        let normalized = normalizer.normalize(&updates.result);
        stats.records_skipped += normalized.skipped;

        if normalized.records.is_empty() {
            warn!(key, "No valid messages found in file");
            stats.files_empty += 1;
            emit!(FileProcessed {
                status: FileStatus::Empty
            });
            return Ok(());
        }

        let merged = records_to_batch(&normalized.records).and_then(|batch| {
            debug!(key, rows = batch.num_rows(), "Merging batch");
            merger.push(batch)
        });
        if let Err(e) = merged {
            if e.is_fatal() {
                return Err(e).context(BatchSnafu);
            }
            error!(key, "Skipping file: {}", e);
            stats.files_skipped += 1;
            emit!(FileProcessed {
                status: FileStatus::Skipped
            });
            return Ok(());
        }

        stats.files_processed += 1;
        emit!(FileProcessed {
            status: FileStatus::Success
        });
        Ok(())
    }

    fn finish(
        &self,
        partition: Partition,
        outcome: EtlOutcome,
        stats: EtlStats,
        start: Instant,
    ) -> EtlRun {
        emit!(EtlRunCompleted {
            outcome: outcome.label(),
            duration: start.elapsed(),
        });
        info!(
            partition = %partition,
            outcome = outcome.label(),
            files_listed = stats.files_listed,
            files_processed = stats.files_processed,
            files_skipped = stats.files_skipped,
            files_empty = stats.files_empty,
            records_written = stats.records_written,
            records_skipped = stats.records_skipped,
            "ETL run finished"
        );
        EtlRun {
            partition,
            outcome,
            stats,
        }
    }
}
