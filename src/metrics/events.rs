//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::query::TerminalState;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Normalization & ETL events
// ============================================================================

/// Event emitted when envelopes are turned into structured records.
pub struct RecordsNormalized {
    pub count: u64,
}

impl InternalEvent for RecordsNormalized {
    fn emit(self) {
        trace!(count = self.count, "Records normalized");
        counter!("chatlake_records_normalized_total").increment(self.count);
    }
}

/// Event emitted when a malformed envelope is skipped.
pub struct RecordSkipped;

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!("Record skipped");
        counter!("chatlake_records_skipped_total").increment(1);
    }
}

/// Event emitted when bytes are read from the raw store.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("chatlake_bytes_read_total").increment(self.bytes);
    }
}

/// Outcome of one raw input file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    /// Contributed at least one record.
    Success,
    /// Decoded but held no message envelopes.
    Empty,
    /// Could not be decoded or converted.
    Skipped,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Empty => "empty",
            FileStatus::Skipped => "skipped",
        }
    }
}

/// Event emitted when an input file is processed.
pub struct FileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("chatlake_files_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when a file download completes.
pub struct FileDownloadCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileDownloadCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "File download completed"
        );
        histogram!("chatlake_file_download_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when an enriched Parquet file has been uploaded.
pub struct ParquetFileWritten {
    pub records: u64,
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for ParquetFileWritten {
    fn emit(self) {
        trace!(
            records = self.records,
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Parquet file written"
        );
        counter!("chatlake_parquet_files_written_total").increment(1);
        counter!("chatlake_records_written_total").increment(self.records);
        counter!("chatlake_bytes_written_total").increment(self.bytes);
        histogram!("chatlake_parquet_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when an ETL run finishes.
pub struct EtlRunCompleted {
    pub outcome: &'static str,
    pub duration: Duration,
}

impl InternalEvent for EtlRunCompleted {
    fn emit(self) {
        trace!(
            outcome = self.outcome,
            duration_ms = self.duration.as_millis(),
            "ETL run completed"
        );
        counter!("chatlake_etl_runs_total", "outcome" => self.outcome).increment(1);
        gauge!("chatlake_etl_last_run_duration_seconds").set(self.duration.as_secs_f64());
    }
}

/// Event emitted when a raw payload lands in the raw store.
pub struct PayloadLanded {
    pub bytes: u64,
}

impl InternalEvent for PayloadLanded {
    fn emit(self) {
        trace!(bytes = self.bytes, "Payload landed");
        counter!("chatlake_payloads_landed_total").increment(1);
        counter!("chatlake_payload_bytes_total").increment(self.bytes);
    }
}

// ============================================================================
// Query engine events
// ============================================================================

/// Event emitted for every execution status check.
pub struct QueryPolled;

impl InternalEvent for QueryPolled {
    fn emit(self) {
        trace!("Query polled");
        counter!("chatlake_query_polls_total").increment(1);
    }
}

/// Event emitted when an execution reaches a terminal state.
pub struct QueryCompleted {
    pub state: TerminalState,
    pub duration: Duration,
}

impl InternalEvent for QueryCompleted {
    fn emit(self) {
        let state = self.state.as_str();
        trace!(
            state,
            duration_ms = self.duration.as_millis(),
            "Query completed"
        );
        counter!("chatlake_queries_total", "state" => state).increment(1);
        histogram!("chatlake_query_duration_seconds", "state" => state)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "chatlake_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "chatlake_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
