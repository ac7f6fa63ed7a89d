//! Reconcile the source feed into the record store.
//!
//! Every candidate is diffed against the stored record with the same id and only what
//! changed is written, flagging the record for the publisher. Candidates are processed one at
//! a time, in feed order, so each diff sees a stable stored value.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use product_common::diff::{reconcile, Reconciliation};
use product_common::feed::SourceFeed;
use product_common::product::CandidateRecord;
use product_common::store::RecordStore;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Later occurrences of an id already seen in the same batch.
    pub duplicates: usize,
    pub failed: usize,
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
    Failed,
}

impl Outcome {
    fn as_label(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Failed => "failed",
        }
    }
}

pub struct IngestStage {
    feed: Arc<dyn SourceFeed + Send + Sync>,
    store: Arc<dyn RecordStore + Send + Sync>,
}

impl IngestStage {
    pub fn new(
        feed: Arc<dyn SourceFeed + Send + Sync>,
        store: Arc<dyn RecordStore + Send + Sync>,
    ) -> Self {
        Self { feed, store }
    }

    /// Run one reconciliation pass over the whole feed.
    ///
    /// Only a feed failure aborts the run. Records already written before it stay written.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<IngestSummary, IngestError> {
        let start = Instant::now();
        let candidates = self.feed.fetch_all().await.map_err(|e| {
            counter!("product_ingest_runs_total", "outcome" => "source_unavailable").increment(1);
            error!("failed to fetch source feed: {}", e);
            e
        })?;
        info!(count = candidates.len(), "fetched source feed");

        let mut summary = IngestSummary::default();
        let mut seen = HashSet::with_capacity(candidates.len());

        for candidate in candidates {
            if !seen.insert(candidate.product_id.clone()) {
                debug!(product_id = %candidate.product_id, "skipping duplicate in batch");
                summary.duplicates += 1;
                counter!("product_ingest_records_total", "outcome" => "duplicate").increment(1);
                continue;
            }

            let outcome = self.process(candidate).await;
            match outcome {
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Failed => summary.failed += 1,
            }
            counter!("product_ingest_records_total", "outcome" => outcome.as_label()).increment(1);
        }

        histogram!("product_ingest_run_duration_seconds").record(start.elapsed().as_secs_f64());
        counter!("product_ingest_runs_total", "outcome" => "completed").increment(1);
        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "ingest run completed"
        );

        Ok(summary)
    }

    async fn process(&self, candidate: CandidateRecord) -> Outcome {
        let id = candidate.product_id.clone();

        let existing = match self.store.get(&id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(product_id = %id, "failed to look up product: {}", e);
                return Outcome::Failed;
            }
        };

        let (record, outcome) = match reconcile(existing.as_ref(), candidate) {
            Reconciliation::Unchanged => {
                debug!(product_id = %id, "no change");
                return Outcome::Unchanged;
            }
            Reconciliation::Create(record) => (record, Outcome::Created),
            Reconciliation::Update { record, changed } => {
                debug!(product_id = %id, ?changed, "fields changed");
                (record, Outcome::Updated)
            }
        };

        match self.store.upsert(&record).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(product_id = %id, "failed to store product: {}", e);
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use product_common::feed::StaticSourceFeed;
    use product_common::product::{ProductRecord, ProductStatus};
    use product_common::store::MemoryRecordStore;
    use serde_json::{json, Map, Value};

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn stage(feed: Value, store: Arc<MemoryRecordStore>) -> IngestStage {
        IngestStage::new(Arc::new(StaticSourceFeed::new(feed)), store)
    }

    #[tokio::test]
    async fn test_first_sighting_is_new() {
        let store = Arc::new(MemoryRecordStore::new());
        let summary = stage(json!([{"productId": "1", "name": "Widget"}]), store.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 0);
        let record = store.snapshot("1").unwrap();
        assert_eq!(record.status, Some(ProductStatus::New));
        assert_eq!(record.fields.get("name"), Some(&json!("Widget")));
        assert_eq!(record.fields.get("productId"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_changed_field_marks_updated() {
        let store = Arc::new(MemoryRecordStore::with_records([ProductRecord::new(
            "1",
            fields(json!({"productId": "1", "name": "Widget", "weight": 3})),
            Some(ProductStatus::Sent),
        )]));

        let summary = stage(json!([{"productId": "1", "name": "Gadget"}]), store.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        let record = store.snapshot("1").unwrap();
        assert_eq!(record.status, Some(ProductStatus::Updated));
        assert_eq!(record.fields.get("name"), Some(&json!("Gadget")));
        assert_eq!(record.fields.get("weight"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = Arc::new(MemoryRecordStore::new());
        let feed = json!([
            {"productId": "1", "name": "Widget"},
            {"productId": "2", "name": "Gadget", "weight": 3},
        ]);
        let stage = stage(feed, store.clone());

        let first = stage.run().await.unwrap();
        assert_eq!(first.created, 2);
        let after_first = (store.snapshot("1"), store.snapshot("2"));
        let upserts = store.upsert_count();

        let second = stage.run().await.unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.created + second.updated, 0);
        assert_eq!(store.upsert_count(), upserts);
        assert_eq!((store.snapshot("1"), store.snapshot("2")), after_first);
    }

    #[tokio::test]
    async fn test_first_occurrence_wins() {
        let store = Arc::new(MemoryRecordStore::new());
        let summary = stage(
            json!([
                {"productId": "1", "name": "Widget"},
                {"productId": "1", "name": "Gadget"},
            ]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.upsert_count(), 1);
        assert_eq!(
            store.snapshot("1").unwrap().fields.get("name"),
            Some(&json!("Widget"))
        );
    }

    #[tokio::test]
    async fn test_pending_status_stays_pending() {
        let store = Arc::new(MemoryRecordStore::with_records([
            ProductRecord::new(
                "1",
                fields(json!({"name": "Widget"})),
                Some(ProductStatus::New),
            ),
            ProductRecord::new("2", fields(json!({"name": "Gizmo"})), None),
        ]));

        stage(
            json!([
                {"productId": "1", "name": "Gadget"},
                {"productId": "2", "name": "Gizmo"},
            ]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(
            store.snapshot("1").unwrap().status,
            Some(ProductStatus::Updated)
        );
        // Untouched: no forced re-write of externally created records
        assert_eq!(store.snapshot("2").unwrap().status, None);
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated() {
        let store = Arc::new(MemoryRecordStore::new());
        store.fail_upserts_for("2");

        let summary = stage(
            json!([
                {"productId": "1", "name": "Widget"},
                {"productId": "2", "name": "Gadget"},
                {"productId": "3", "name": "Gizmo"},
            ]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        assert!(store.snapshot("1").is_some());
        assert!(store.snapshot("2").is_none());
        assert!(store.snapshot("3").is_some());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_isolated() {
        let store = Arc::new(MemoryRecordStore::new());
        store.fail_gets_for("2");

        let summary = stage(
            json!([
                {"productId": "1", "name": "Widget"},
                {"productId": "2", "name": "Gadget"},
                {"productId": "3", "name": "Gizmo"},
            ]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        assert!(store.snapshot("1").is_some());
        assert!(store.snapshot("2").is_none());
        assert!(store.snapshot("3").is_some());
    }

    #[tokio::test]
    async fn test_status_attribute_is_tracked() {
        let store = Arc::new(MemoryRecordStore::new());

        stage(
            json!([{"productId": "1", "name": "Widget", "status": "discontinued"}]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();
        let record = store.snapshot("1").unwrap();
        assert_eq!(record.fields.get("status"), Some(&json!("discontinued")));
        assert_eq!(record.status, Some(ProductStatus::New));

        let summary = stage(
            json!([{"productId": "1", "name": "Widget", "status": "active"}]),
            store.clone(),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(summary.updated, 1);
        let record = store.snapshot("1").unwrap();
        assert_eq!(record.fields.get("status"), Some(&json!("active")));
        assert_eq!(record.status, Some(ProductStatus::Updated));
    }

    #[tokio::test]
    async fn test_feed_failure_aborts_the_run() {
        let store = Arc::new(MemoryRecordStore::new());
        let unreachable = IngestStage::new(
            Arc::new(StaticSourceFeed::failing("connection refused")),
            store.clone(),
        );

        assert!(matches!(
            unreachable.run().await,
            Err(IngestError::SourceUnavailable(_))
        ));
        assert_eq!(store.upsert_count(), 0);

        let malformed = stage(json!([{"name": "no id"}]), store.clone());
        assert!(matches!(
            malformed.run().await,
            Err(IngestError::SourceUnavailable(_))
        ));
        assert_eq!(store.upsert_count(), 0);
    }
}
