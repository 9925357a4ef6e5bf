//! Idempotent creation of the analytical table.
//!
//! Existence is always checked against the engine catalog first; only an
//! absent table gets the CREATE statement, followed by a partition repair
//! so partitions written before the table existed become queryable.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{QueryClient, Row};
use crate::error::QueryError;

const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";
const PARQUET_INPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";
const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";

/// Name, columns, partition key and location of an external table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<(String, String)>,
    pub partition_key: (String, String),
    pub location: String,
}

impl TableDefinition {
    /// The enriched chat table, partitioned by `context_date`.
    pub fn chat(name: impl Into<String>, location: impl Into<String>) -> Self {
        let column = |name: &str, kind: &str| (name.to_string(), kind.to_string());
        Self {
            name: name.into(),
            columns: vec![
                column("message_id", "bigint"),
                column("user_id", "bigint"),
                column("user_is_bot", "boolean"),
                column("user_first_name", "string"),
                column("chat_id", "bigint"),
                column("chat_type", "string"),
                column("text", "string"),
                column("date", "bigint"),
            ],
            partition_key: column("context_date", "date"),
            location: location.into(),
        }
    }

    /// Catalog lookup for this table.
    pub fn existence_query(&self) -> String {
        format!("SHOW TABLES LIKE '{}'", self.name)
    }

    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, kind)| format!("  `{name}` {kind}"))
            .collect::<Vec<_>>()
            .join(",\n");
        let (partition_name, partition_kind) = &self.partition_key;

        format!(
            "CREATE EXTERNAL TABLE IF NOT EXISTS `{name}`(\n{columns})\n\
             PARTITIONED BY (\n  `{partition_name}` {partition_kind})\n\
             ROW FORMAT SERDE\n  '{PARQUET_SERDE}'\n\
             STORED AS INPUTFORMAT\n  '{PARQUET_INPUT_FORMAT}'\n\
             OUTPUTFORMAT\n  '{PARQUET_OUTPUT_FORMAT}'\n\
             LOCATION\n  '{location}'",
            name = self.name,
            location = self.location,
        )
    }

    /// Registers partitions already present at the table location.
    pub fn repair_statement(&self) -> String {
        format!("MSCK REPAIR TABLE `{}`", self.name)
    }

    /// Whether an existence query result shows the table.
    ///
    /// Some engines return a header row before the matches and some do not,
    /// so any second row counts, as does a row naming the table.
    pub fn shows_table(&self, rows: &[Row]) -> bool {
        rows.len() > 1
            || rows.iter().any(|row| {
                row.first()
                    .is_some_and(|cell| cell.eq_ignore_ascii_case(&self.name))
            })
    }
}

/// Outcome of [`TableManager::ensure_table_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    Exists,
}

/// Creates the analytical table when the catalog lacks it.
#[derive(Debug, Clone)]
pub struct TableManager {
    client: QueryClient,
    definition: TableDefinition,
}

impl TableManager {
    pub fn new(client: QueryClient, definition: TableDefinition) -> Self {
        Self { client, definition }
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// Check the catalog and create the table if it is absent.
    ///
    /// An existence check, create or repair that does not succeed is returned as an
    /// error; nothing is retried.
    pub async fn ensure_table_exists(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TableStatus, QueryError> {
        let table = &self.definition.name;

        let rows = self
            .client
            .execute(&self.definition.existence_query(), cancel)
            .await?;
        if self.definition.shows_table(&rows) {
            info!(table = %table, "Table already exists");
            return Ok(TableStatus::Exists);
        }

        info!(table = %table, location = %self.definition.location, "Table not found, creating");
        self.client
            .execute_statement(&self.definition.create_statement(), cancel)
            .await?;
        info!(table = %table, "Table created");

        self.client
            .execute_statement(&self.definition.repair_statement(), cancel)
            .await?;
        info!(table = %table, "Partitions repaired");

        Ok(TableStatus::Created)
    }
}
