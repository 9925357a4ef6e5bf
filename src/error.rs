//! Error types for chatlake using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;
use std::time::Duration;

use crate::query::TerminalState;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Raw store URL is empty.
    #[snafu(display("Raw storage URL cannot be empty"))]
    EmptyRawUrl,

    /// Enriched store URL is empty.
    #[snafu(display("Enriched storage URL cannot be empty"))]
    EmptyEnrichedUrl,

    /// Query engine endpoint is empty.
    #[snafu(display("Query engine endpoint cannot be empty"))]
    EmptyEndpoint,

    /// Query engine database is empty.
    #[snafu(display("Query engine database cannot be empty"))]
    EmptyDatabase,

    /// Query results output location is empty.
    #[snafu(display("Query output location cannot be empty"))]
    EmptyOutputLocation,

    /// Table name is empty.
    #[snafu(display("Table name cannot be empty"))]
    EmptyTableName,

    /// Poll policy values are inconsistent.
    #[snafu(display("Invalid poll policy: {message}"))]
    InvalidPollPolicy { message: String },

    /// Business-day offset is outside the valid range.
    #[snafu(display("UTC offset of {hours}h is out of range (-23..=23)"))]
    InvalidUtcOffset { hours: i32 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Normalizer Errors ============

/// Errors extracting a structured record from one envelope.
///
/// These never escape the normalizer: the envelope is logged and skipped.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    /// Envelope is not a JSON object.
    #[snafu(display("Envelope is a JSON {kind}, expected an object"))]
    EnvelopeNotObject { kind: &'static str },

    /// The message payload has fields of the wrong type.
    #[snafu(display("Malformed message payload: {source}"))]
    MalformedMessage { source: serde_json::Error },
}

// ============ Decode Errors ============

/// Errors decoding one raw updates file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// File is not valid JSON or lacks the `result` list.
    #[snafu(display("Failed to decode updates file {key}: {source}"))]
    InvalidJson {
        key: String,
        source: serde_json::Error,
    },
}

// ============ Batch Errors ============

/// Errors building or merging columnar batches.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BatchError {
    /// Failed to assemble records into a batch.
    #[snafu(display("Failed to build record batch: {source}"))]
    BatchBuild { source: arrow::error::ArrowError },

    /// Two batches in one merge disagree on schema.
    #[snafu(display("Schema mismatch while merging: expected [{expected}], found [{found}]"))]
    SchemaMismatch { expected: String, found: String },

    /// Concatenation of compatible batches failed.
    #[snafu(display("Failed to concatenate batches: {source}"))]
    BatchConcat { source: arrow::error::ArrowError },
}

impl BatchError {
    /// Whether this error must abort the run rather than skip one file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BatchError::BatchBuild { .. })
    }
}

// ============ Sink Errors ============

/// Errors that can occur while staging and uploading Parquet files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to create the local staging file.
    #[snafu(display("Failed to create staging file: {source}"))]
    StagingFile { source: std::io::Error },

    /// Failed to create Parquet writer.
    #[snafu(display("Failed to create Parquet writer: {source}"))]
    ParquetWriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Parquet write error.
    #[snafu(display("Parquet write error: {source}"))]
    ParquetWrite {
        source: parquet::errors::ParquetError,
    },

    /// Failed to read the staging file back for upload.
    #[snafu(display("Failed to read staging file: {source}"))]
    StagingRead { source: std::io::Error },

    /// Failed to upload the finished file.
    #[snafu(display("Failed to upload {key}: {source}"))]
    Upload { key: String, source: StorageError },

    /// Encoding task panicked or was aborted.
    #[snafu(display("Parquet encoding task failed: {source}"))]
    EncodeTask { source: tokio::task::JoinError },
}

// ============ Query Errors ============

/// Errors talking to the remote query engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueryError {
    /// Endpoint URL could not be parsed.
    #[snafu(display("Invalid query engine endpoint: {source}"))]
    InvalidEndpoint { source: url::ParseError },

    /// HTTP client could not be constructed.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    HttpClient { source: reqwest::Error },

    /// The request never produced a response.
    #[snafu(display("{operation} request failed: {source}"))]
    Request {
        operation: &'static str,
        source: reqwest::Error,
    },

    /// The engine answered with an error status.
    #[snafu(display("{operation} rejected [{status}] {error_type}: {message}"))]
    Api {
        operation: &'static str,
        status: u16,
        error_type: String,
        message: String,
    },

    /// The response body was not the expected shape.
    #[snafu(display("Failed to decode {operation} response: {source}"))]
    ResponseDecode {
        operation: &'static str,
        source: reqwest::Error,
    },

    /// Execution finished in a non-successful terminal state.
    #[snafu(display("Query {execution_id} finished as {state}: {reason}"))]
    QueryFailed {
        execution_id: String,
        state: TerminalState,
        /// Engine-supplied explanation, empty when none was given.
        reason: String,
    },

    /// Execution did not reach a terminal state before the deadline.
    #[snafu(display("Query {execution_id} still running after {waited:?}"))]
    PollDeadline {
        execution_id: String,
        waited: Duration,
    },

    /// The caller cancelled the wait.
    #[snafu(display("Wait for query {execution_id} was cancelled"))]
    PollCancelled { execution_id: String },
}

impl QueryError {
    /// Whether the engine itself could not be reached or refused the call.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            QueryError::Request { .. } | QueryError::Api { .. } | QueryError::ResponseDecode { .. }
        )
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Batch merge error.
    #[snafu(display("Batch error: {source}"))]
    Batch { source: BatchError },

    /// Parquet sink error.
    #[snafu(display("Sink error: {source}"))]
    Sink { source: SinkError },

    /// Query engine error.
    #[snafu(display("Query error: {source}"))]
    Query { source: QueryError },

    /// Updates payload was rejected by the upstream API.
    #[snafu(display("Invalid updates payload: {message}"))]
    InvalidPayload { message: String },

    /// Failed to read an updates payload from disk.
    #[snafu(display("Failed to read updates payload: {source}"))]
    PayloadRead { source: std::io::Error },

    /// Failed to (de)serialize an updates payload.
    #[snafu(display("Failed to encode updates payload: {source}"))]
    PayloadJson { source: serde_json::Error },

    /// Some analytical queries did not succeed.
    #[snafu(display("{failed} of {total} queries failed"))]
    QueriesFailed { failed: usize, total: usize },

    /// A shutdown signal arrived before the command finished.
    #[snafu(display("Interrupted during {stage}"))]
    Interrupted { stage: &'static str },

    /// Address parsing error.
    #[snafu(display("Failed to parse address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}
