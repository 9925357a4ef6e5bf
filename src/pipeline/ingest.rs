//! Landing fetched updates payloads in the raw store.

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tracing::{info, warn};

use crate::emit;
use crate::error::{InvalidPayloadSnafu, PayloadJsonSnafu, PipelineError, PipelineStorageSnafu};
use crate::metrics::events::PayloadLanded;
use crate::source::UpdatesFile;
use crate::storage::{PartitionScheme, StampClock, StorageProviderRef};

/// Result of landing one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Written { key: String },
    /// The payload held no updates; nothing was stored.
    NoData,
}

/// Writes updates payloads under the current business day's partition.
#[derive(Debug)]
pub struct RawLanding {
    raw: StorageProviderRef,
    scheme: PartitionScheme,
    stamps: StampClock,
}

impl RawLanding {
    pub fn new(raw: StorageProviderRef, scheme: PartitionScheme) -> Self {
        Self {
            raw,
            scheme,
            stamps: StampClock::new(),
        }
    }

    pub async fn ingest(&self, payload: &UpdatesFile) -> Result<IngestOutcome, PipelineError> {
        self.ingest_at(payload, Utc::now()).await
    }

    /// Store `payload` as `<root>/context_date=<today>/<stamp>.json`.
    ///
    /// A payload the upstream API did not mark `ok` is rejected.
    pub async fn ingest_at(
        &self,
        payload: &UpdatesFile,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        ensure!(
            payload.ok == Some(true),
            InvalidPayloadSnafu {
                message: format!("upstream reported ok={:?}", payload.ok),
            }
        );

        if payload.result.is_empty() {
            warn!("Updates payload is empty, nothing to land");
            return Ok(IngestOutcome::NoData);
        }

        let body = serde_json::to_vec_pretty(payload).context(PayloadJsonSnafu)?;
        let bytes = body.len();
        let partition = self.scheme.landing_partition(now);
        let key = partition.object_key(self.stamps.next(now), "json");

        self.raw
            .put(key.as_str(), body)
            .await
            .context(PipelineStorageSnafu)?;

        emit!(PayloadLanded {
            bytes: bytes as u64
        });
        info!(key = %key, updates = payload.result.len(), "Landed updates payload");
        Ok(IngestOutcome::Written { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn landing(dir: &TempDir) -> RawLanding {
        let raw = StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        RawLanding::new(Arc::new(raw), PartitionScheme::new("telegram", -3, 1).unwrap())
    }

    fn payload(ok: Option<bool>, count: i64) -> UpdatesFile {
        UpdatesFile {
            ok,
            result: (0..count)
                .map(|i| json!({"update_id": i, "message": {"message_id": i}}))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_lands_under_business_day() {
        let dir = TempDir::new().unwrap();
        let landing = landing(&dir).await;
        // 02:00 UTC on the 10th is the 9th at -3.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();

        let outcome = landing.ingest_at(&payload(Some(true), 2), now).await.unwrap();

        let IngestOutcome::Written { key } = outcome else {
            panic!("expected a write");
        };
        assert_eq!(
            key,
            "telegram/context_date=2024-03-09/20240310020000000000.json"
        );
        let stored: UpdatesFile =
            serde_json::from_slice(&std::fs::read(dir.path().join(&key)).unwrap()).unwrap();
        assert_eq!(stored.result.len(), 2);
    }

    #[tokio::test]
    async fn test_not_ok_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let landing = landing(&dir).await;

        for ok in [Some(false), None] {
            let err = landing.ingest(&payload(ok, 1)).await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidPayload { .. }));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_payload_is_no_data() {
        let dir = TempDir::new().unwrap();
        let landing = landing(&dir).await;

        let outcome = landing.ingest(&payload(Some(true), 0)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::NoData);
    }
}
