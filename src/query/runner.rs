//! Sequential execution of a list of analytical queries.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{QueryClient, Row};

/// What happened to one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Finished as SUCCEEDED; `rows` includes the header row when the
    /// engine returns one.
    Succeeded { query: String, rows: Vec<Row> },
    Failed { query: String, reason: String },
}

impl QueryOutcome {
    pub fn query(&self) -> &str {
        match self {
            QueryOutcome::Succeeded { query, .. } | QueryOutcome::Failed { query, .. } => query,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Succeeded { .. })
    }
}

/// Runs queries one after another, isolating failures per query.
#[derive(Debug, Clone)]
pub struct QueryRunner {
    client: QueryClient,
}

impl QueryRunner {
    pub fn new(client: QueryClient) -> Self {
        Self { client }
    }

    /// Run every query in order and return one outcome per query.
    ///
    /// A failed query is recorded and the next one still runs. Once `cancel`
    /// fires, the remaining queries are reported as failed without being
    /// submitted.
    pub async fn run_queries(
        &self,
        queries: &[String],
        cancel: &CancellationToken,
    ) -> Vec<QueryOutcome> {
        let mut outcomes = Vec::with_capacity(queries.len());

        for (index, query) in queries.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(index, "Shutdown requested, not submitting query");
                outcomes.push(QueryOutcome::Failed {
                    query: query.clone(),
                    reason: "cancelled before submission".to_string(),
                });
                continue;
            }

            let outcome = match self.client.execute(query, cancel).await {
                Ok(rows) => {
                    info!(index, rows = rows.len(), "Query succeeded");
                    QueryOutcome::Succeeded {
                        query: query.clone(),
                        rows,
                    }
                }
                Err(e) => {
                    error!(index, query = %query.trim(), "Query failed: {}", e);
                    QueryOutcome::Failed {
                        query: query.clone(),
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(total = outcomes.len(), failed, "Finished running queries");
        outcomes
    }
}
