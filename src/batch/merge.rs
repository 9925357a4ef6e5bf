//! Merging per-file batches into one output batch.

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use snafu::prelude::*;

use crate::error::{BatchConcatSnafu, BatchError, SchemaMismatchSnafu};

/// Result of a merge.
#[derive(Debug)]
pub enum Merged {
    /// At least one batch was merged (it may still hold zero rows).
    Batch(RecordBatch),
    /// Nothing was pushed.
    NoData,
}

impl Merged {
    pub fn num_rows(&self) -> usize {
        match self {
            Merged::Batch(batch) => batch.num_rows(),
            Merged::NoData => 0,
        }
    }
}

/// Accumulates batches sharing one schema.
///
/// The first pushed batch fixes the schema. A batch with a different schema
/// is rejected before it is retained, so a failed push leaves the merger as
/// it was.
#[derive(Debug, Default)]
pub struct BatchMerger {
    schema: Option<SchemaRef>,
    batches: Vec<RecordBatch>,
    rows: usize,
}

impl BatchMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch.
    pub fn push(&mut self, batch: RecordBatch) -> Result<(), BatchError> {
        let expected = self.schema.get_or_insert_with(|| batch.schema());
        ensure!(
            expected.fields() == batch.schema().fields(),
            SchemaMismatchSnafu {
                expected: describe(expected),
                found: describe(&batch.schema()),
            }
        );

        self.rows += batch.num_rows();
        self.batches.push(batch);
        Ok(())
    }

    /// Rows accumulated so far.
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    /// Concatenate everything pushed, in push order.
    pub fn finish(self) -> Result<Merged, BatchError> {
        let Some(schema) = self.schema else {
            return Ok(Merged::NoData);
        };

        let merged = concat_batches(&schema, &self.batches).context(BatchConcatSnafu)?;
        Ok(Merged::Batch(merged))
    }
}

/// Merge a slice of batches in one call.
pub fn merge_batches(batches: &[RecordBatch]) -> Result<Merged, BatchError> {
    let mut merger = BatchMerger::new();
    for batch in batches {
        merger.push(batch.clone())?;
    }
    merger.finish()
}

fn describe(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}:{}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}
