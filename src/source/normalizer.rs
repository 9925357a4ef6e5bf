//! Envelope to structured record extraction.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use snafu::prelude::*;
use tracing::error;

use super::envelope::Message;
use crate::emit;
use crate::error::{EnvelopeNotObjectSnafu, MalformedMessageSnafu, NormalizeError};
use crate::metrics::events::{RecordSkipped, RecordsNormalized};

/// Format of the `ingestion_timestamp` column.
const INGESTION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the enriched table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredRecord {
    pub message_id: Option<i64>,
    pub user_id: Option<i64>,
    pub user_first_name: Option<String>,
    pub user_is_bot: Option<bool>,
    pub chat_id: Option<i64>,
    pub chat_type: Option<String>,
    pub text: Option<String>,
    pub ingestion_timestamp: String,
    /// Message time, unix seconds.
    pub date: Option<i64>,
}

impl StructuredRecord {
    fn from_message(message: Message, ingestion_timestamp: &str) -> Self {
        let (user_id, user_first_name, user_is_bot) = match message.from {
            Some(user) => (user.id, user.first_name, user.is_bot),
            None => (None, None, None),
        };
        let (chat_id, chat_type) = match message.chat {
            Some(chat) => (chat.id, chat.kind),
            None => (None, None),
        };

        Self {
            message_id: message.message_id,
            user_id,
            user_first_name,
            user_is_bot,
            chat_id,
            chat_type,
            text: message.text,
            ingestion_timestamp: ingestion_timestamp.to_string(),
            date: message.date,
        }
    }
}

/// Records extracted from one file, plus how many envelopes were rejected.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<StructuredRecord>,
    pub skipped: usize,
}

/// Turns update envelopes into [`StructuredRecord`]s.
///
/// Every record produced by one normalizer shares the same ingestion
/// timestamp, fixed at construction.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    ingestion_timestamp: String,
}

impl RecordNormalizer {
    pub fn new(ingested_at: DateTime<Utc>) -> Self {
        Self {
            ingestion_timestamp: ingested_at.format(INGESTION_TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Normalize a list of envelopes, preserving order.
    ///
    /// Envelopes without a message (absent or null) are dropped silently.
    /// Malformed envelopes are logged and counted in `skipped`.
    pub fn normalize(&self, envelopes: &[Value]) -> Normalized {
        let mut normalized = Normalized {
            records: Vec::with_capacity(envelopes.len()),
            skipped: 0,
        };

        for envelope in envelopes {
            match self.extract(envelope) {
                Ok(Some(record)) => normalized.records.push(record),
                Ok(None) => {}
                Err(e) => {
                    error!(envelope = %envelope, "Skipping malformed envelope: {}", e);
                    emit!(RecordSkipped);
                    normalized.skipped += 1;
                }
            }
        }

        emit!(RecordsNormalized {
            count: normalized.records.len() as u64,
        });
        normalized
    }

    /// Extract the record from one envelope; `Ok(None)` when it carries no
    /// message.
    pub fn extract(&self, envelope: &Value) -> Result<Option<StructuredRecord>, NormalizeError> {
        let Value::Object(fields) = envelope else {
            return EnvelopeNotObjectSnafu {
                kind: json_kind(envelope),
            }
            .fail();
        };

        let message = match fields.get("message") {
            None | Some(Value::Null) => return Ok(None),
            Some(message) => Message::deserialize(message).context(MalformedMessageSnafu)?,
        };

        Ok(Some(StructuredRecord::from_message(
            message,
            &self.ingestion_timestamp,
        )))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
