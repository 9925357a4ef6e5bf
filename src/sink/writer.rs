//! Partitioned Parquet writer.
//!
//! Encodes one batch into a local staging file, then uploads it to the
//! enriched store under `<partition>/<stamp>.parquet`.

use arrow::array::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::{ParquetCompression, WriterConfig};
use crate::emit;
use crate::error::{
    EncodeTaskSnafu, ParquetWriteSnafu, ParquetWriterCreateSnafu, SinkError, StagingFileSnafu,
    StagingReadSnafu, UploadSnafu,
};
use crate::metrics::events::ParquetFileWritten;
use crate::storage::{Partition, StampClock, StorageProviderRef};

/// A file that has been uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Key relative to the enriched store.
    pub key: String,
    pub record_count: usize,
    /// Encoded size in bytes.
    pub size: usize,
}

/// Writes batches as uniquely named Parquet files.
#[derive(Debug)]
pub struct PartitionedWriter {
    storage: StorageProviderRef,
    compression: ParquetCompression,
    staging_dir: Option<PathBuf>,
    stamps: StampClock,
}

impl PartitionedWriter {
    pub fn new(storage: StorageProviderRef, config: &WriterConfig) -> Self {
        Self {
            storage,
            compression: config.compression,
            staging_dir: config.staging_dir.clone(),
            stamps: StampClock::new(),
        }
    }

    /// Write `batch` into `partition`, named by the current time.
    pub async fn write(
        &self,
        batch: &RecordBatch,
        partition: &Partition,
    ) -> Result<WrittenFile, SinkError> {
        self.write_at(batch, partition, Utc::now()).await
    }

    /// Write `batch` into `partition`, named by a stamp at or after `now`.
    ///
    /// The staging file is removed when this returns, whatever the outcome,
    /// and also if the future is dropped mid-write.
    pub async fn write_at(
        &self,
        batch: &RecordBatch,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> Result<WrittenFile, SinkError> {
        let start = Instant::now();
        let staging = self.staging_file()?;
        let file = staging.reopen().context(StagingFileSnafu)?;

        let properties = writer_properties(self.compression);
        let encoded = batch.clone();
        tokio::task::spawn_blocking(move || encode(file, &encoded, properties))
            .await
            .context(EncodeTaskSnafu)??;

        let bytes = tokio::fs::read(staging.path())
            .await
            .context(StagingReadSnafu)?;
        let size = bytes.len();
        debug!(
            path = %staging.path().display(),
            size,
            "Staged parquet file"
        );

        let key = partition.object_key(self.stamps.next(now), "parquet");
        self.storage
            .put(key.as_str(), bytes)
            .await
            .context(UploadSnafu { key: key.clone() })?;

        let record_count = batch.num_rows();
        emit!(ParquetFileWritten {
            records: record_count as u64,
            bytes: size as u64,
            duration: start.elapsed(),
        });
        info!(
            key = %key,
            records = record_count,
            bytes = size,
            "Uploaded parquet file"
        );

        Ok(WrittenFile {
            key,
            record_count,
            size,
        })
    }

    fn staging_file(&self) -> Result<NamedTempFile, SinkError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chatlake-").suffix(".parquet");
        match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context(StagingFileSnafu)
    }
}

fn encode(file: File, batch: &RecordBatch, properties: WriterProperties) -> Result<(), SinkError> {
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(properties))
        .context(ParquetWriterCreateSnafu)?;
    writer.write(batch).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;
    Ok(())
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    let codec = match compression {
        ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
    };

    WriterProperties::builder().set_compression(codec).build()
}
