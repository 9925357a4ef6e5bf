//! Columnar representation of structured records.
//!
//! Every batch produced here carries the enriched table schema. Column
//! order matches [`StructuredRecord`] and is fixed for the lifetime of
//! the table.

mod merge;

pub use merge::{BatchMerger, Merged, merge_batches};

use arrow::array::{ArrayRef, BooleanArray, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use snafu::prelude::*;
use std::sync::{Arc, LazyLock};

use crate::error::{BatchBuildSnafu, BatchError};
use crate::source::StructuredRecord;

static CHAT_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("message_id", DataType::Int64, true),
        Field::new("user_id", DataType::Int64, true),
        Field::new("user_first_name", DataType::Utf8, true),
        Field::new("user_is_bot", DataType::Boolean, true),
        Field::new("chat_id", DataType::Int64, true),
        Field::new("chat_type", DataType::Utf8, true),
        Field::new("text", DataType::Utf8, true),
        Field::new("ingestion_timestamp", DataType::Utf8, false),
        Field::new("date", DataType::Int64, true),
    ]))
});

/// Schema of the enriched chat table.
pub fn chat_schema() -> SchemaRef {
    CHAT_SCHEMA.clone()
}

/// Build one batch from records, preserving their order.
pub fn records_to_batch(records: &[StructuredRecord]) -> Result<RecordBatch, BatchError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(records.iter().map(|r| r.message_id).collect::<Int64Array>()),
        Arc::new(records.iter().map(|r| r.user_id).collect::<Int64Array>()),
        Arc::new(
            records
                .iter()
                .map(|r| r.user_first_name.as_deref())
                .collect::<StringArray>(),
        ),
        Arc::new(records.iter().map(|r| r.user_is_bot).collect::<BooleanArray>()),
        Arc::new(records.iter().map(|r| r.chat_id).collect::<Int64Array>()),
        Arc::new(
            records
                .iter()
                .map(|r| r.chat_type.as_deref())
                .collect::<StringArray>(),
        ),
        Arc::new(records.iter().map(|r| r.text.as_deref()).collect::<StringArray>()),
        Arc::new(
            records
                .iter()
                .map(|r| Some(r.ingestion_timestamp.as_str()))
                .collect::<StringArray>(),
        ),
        Arc::new(records.iter().map(|r| r.date).collect::<Int64Array>()),
    ];

    RecordBatch::try_new(chat_schema(), columns).context(BatchBuildSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn record(id: i64, text: Option<&str>) -> StructuredRecord {
        StructuredRecord {
            message_id: Some(id),
            user_id: Some(42),
            user_first_name: Some("Ana".to_string()),
            user_is_bot: Some(false),
            chat_id: Some(-100),
            chat_type: Some("private".to_string()),
            text: text.map(str::to_string),
            ingestion_timestamp: "2024-03-10 04:05:06".to_string(),
            date: Some(1710043506),
        }
    }

    #[test]
    fn test_schema_column_order() {
        let names: Vec<_> = chat_schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "message_id",
                "user_id",
                "user_first_name",
                "user_is_bot",
                "chat_id",
                "chat_type",
                "text",
                "ingestion_timestamp",
                "date",
            ]
        );
    }

    #[test]
    fn test_records_to_batch() {
        let batch = records_to_batch(&[record(1, Some("hi")), record(2, None)]).unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), chat_schema());

        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.value(0), 1);
        assert_eq!(ids.value(1), 2);

        let texts = batch
            .column(6)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(texts.value(0), "hi");
        assert!(texts.is_null(1));
    }

    #[test]
    fn test_all_null_record() {
        let batch = records_to_batch(&[StructuredRecord {
            ingestion_timestamp: "2024-03-10 04:05:06".to_string(),
            ..Default::default()
        }])
        .unwrap();

        assert_eq!(batch.num_rows(), 1);
        for idx in [0, 1, 2, 3, 4, 5, 6, 8] {
            assert!(batch.column(idx).is_null(0), "column {idx} should be null");
        }
        assert!(!batch.column(7).is_null(0));
    }
}
