//! Price corrections applied directly to stored products, outside of the feed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::diff::normalize;
use crate::product::{
    is_storable_price, PriceUpdateRequest, ProductRecord, ProductStatus, PRODUCT_PRICE_FIELD,
};
use crate::store::RecordStore;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FieldUpdateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// What a price correction does to the outbox marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceStatusPolicy {
    /// Leave `status` as it was. Corrections are then only published along with the next
    /// feed change.
    Preserve,
    /// Mark the record `Updated` when the price actually changed, so Publish forwards it.
    #[default]
    MarkUpdated,
}

impl PriceStatusPolicy {
    pub fn from_marks_updated(marks_updated: bool) -> Self {
        match marks_updated {
            true => PriceStatusPolicy::MarkUpdated,
            false => PriceStatusPolicy::Preserve,
        }
    }
}

/// Per-id outcome of one batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceUpdateReport {
    pub updated: Vec<String>,
    pub not_found: Vec<String>,
    pub failed: Vec<String>,
}

pub struct PriceUpdater {
    store: Arc<dyn RecordStore + Send + Sync>,
    policy: PriceStatusPolicy,
}

impl PriceUpdater {
    pub fn new(store: Arc<dyn RecordStore + Send + Sync>, policy: PriceStatusPolicy) -> Self {
        Self { store, policy }
    }

    /// Apply every correction in sequence. A missing or failing record never stops the batch.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        requests: Option<Vec<PriceUpdateRequest>>,
    ) -> Result<PriceUpdateReport, FieldUpdateError> {
        let requests = match requests {
            Some(requests) if !requests.is_empty() => requests,
            _ => {
                return Err(FieldUpdateError::InvalidRequest(
                    "provide a non-empty list of products to update".to_owned(),
                ))
            }
        };
        if let Some(request) = requests
            .iter()
            .find(|request| !is_storable_price(request.product_price))
        {
            return Err(FieldUpdateError::InvalidRequest(format!(
                "price {} of product {} has more precision than can be stored",
                request.product_price, request.product_id
            )));
        }

        let start = Instant::now();
        info!(count = requests.len(), "starting price update");
        let mut report = PriceUpdateReport::default();

        for request in requests {
            let id = request.product_id.clone();
            let outcome = match self.store.get(&id).await {
                Ok(Some(record)) => {
                    let record = self.apply(record, &request);
                    match self.store.upsert(&record).await {
                        Ok(()) => {
                            info!(product_id = %id, status = ?record.status, "updated price");
                            report.updated.push(id);
                            "updated"
                        }
                        Err(e) => {
                            error!(product_id = %id, "failed to store price update: {}", e);
                            report.failed.push(id);
                            "failed"
                        }
                    }
                }
                Ok(None) => {
                    warn!(product_id = %id, "product not found, skipping price update");
                    report.not_found.push(id);
                    "not_found"
                }
                Err(e) => {
                    error!(product_id = %id, "failed to look up product: {}", e);
                    report.failed.push(id);
                    "failed"
                }
            };
            counter!("product_price_updates_total", "outcome" => outcome).increment(1);
        }

        histogram!("product_price_update_duration_seconds").record(start.elapsed().as_secs_f64());
        info!(
            updated = report.updated.len(),
            not_found = report.not_found.len(),
            failed = report.failed.len(),
            "price update completed"
        );

        Ok(report)
    }

    fn apply(&self, mut record: ProductRecord, request: &PriceUpdateRequest) -> ProductRecord {
        let previous = record.fields.get(PRODUCT_PRICE_FIELD).map(normalize);
        record.set_price(request.product_price);

        let changed = match previous {
            // Compare numerically so that "12.50" and 12.5 are the same price
            Some(previous) => rust_decimal::Decimal::from_str(&previous)
                .map(|previous| previous != request.product_price)
                .unwrap_or(true),
            None => true,
        };

        if changed && self.policy == PriceStatusPolicy::MarkUpdated {
            record.status = Some(
                record
                    .status
                    .unwrap_or(ProductStatus::Sent)
                    .after_change(),
            );
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use rust_decimal::Decimal;
    use serde_json::{json, Map, Value};

    fn stored(id: &str, price: Value, status: Option<ProductStatus>) -> ProductRecord {
        let mut fields = Map::new();
        fields.insert("productId".to_owned(), json!(id));
        fields.insert("name".to_owned(), json!("Widget"));
        fields.insert(PRODUCT_PRICE_FIELD.to_owned(), price);
        ProductRecord::new(id, fields, status)
    }

    fn request(id: &str, price: Decimal) -> PriceUpdateRequest {
        PriceUpdateRequest {
            product_id: id.to_owned(),
            product_price: price,
        }
    }

    #[tokio::test]
    async fn test_empty_request_is_invalid() {
        let store = Arc::new(MemoryRecordStore::new());
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::default());

        assert!(matches!(
            updater.run(None).await,
            Err(FieldUpdateError::InvalidRequest(_))
        ));
        assert!(matches!(
            updater.run(Some(vec![])).await,
            Err(FieldUpdateError::InvalidRequest(_))
        ));
        assert_eq!(store.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_over_precise_price_is_invalid() {
        let store = Arc::new(MemoryRecordStore::with_records([stored(
            "1",
            json!(10),
            Some(ProductStatus::Sent),
        )]));
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::default());

        let result = updater
            .run(Some(vec![
                request("1", Decimal::new(11, 0)),
                request("1", Decimal::new(1234567890123456789, 19)),
            ]))
            .await;

        assert!(matches!(result, Err(FieldUpdateError::InvalidRequest(_))));
        assert_eq!(store.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_product_does_not_stop_the_batch() {
        let store = Arc::new(MemoryRecordStore::with_records([stored(
            "9",
            json!(10),
            Some(ProductStatus::Sent),
        )]));
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::Preserve);

        let report = updater
            .run(Some(vec![
                request("404", Decimal::new(100, 0)),
                request("9", Decimal::new(1250, 2)),
            ]))
            .await
            .unwrap();

        assert_eq!(report.not_found, vec!["404"]);
        assert_eq!(report.updated, vec!["9"]);
        assert!(report.failed.is_empty());

        let record = store.snapshot("9").unwrap();
        assert_eq!(record.fields.get(PRODUCT_PRICE_FIELD), Some(&json!(12.5)));
        assert_eq!(record.fields.get("name"), Some(&json!("Widget")));
        assert_eq!(record.status, Some(ProductStatus::Sent));
        assert!(store.snapshot("404").is_none());
    }

    #[tokio::test]
    async fn test_failed_upsert_is_isolated() {
        let store = Arc::new(MemoryRecordStore::with_records([
            stored("1", json!(1), Some(ProductStatus::Sent)),
            stored("2", json!(2), Some(ProductStatus::Sent)),
        ]));
        store.fail_upserts_for("1");
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::Preserve);

        let report = updater
            .run(Some(vec![
                request("1", Decimal::new(5, 0)),
                request("2", Decimal::new(6, 0)),
            ]))
            .await
            .unwrap();

        assert_eq!(report.failed, vec!["1"]);
        assert_eq!(report.updated, vec!["2"]);
        assert_eq!(
            store.snapshot("1").unwrap().fields.get(PRODUCT_PRICE_FIELD),
            Some(&json!(1))
        );
        assert_eq!(
            store.snapshot("2").unwrap().fields.get(PRODUCT_PRICE_FIELD),
            Some(&json!(6))
        );
    }

    #[tokio::test]
    async fn test_mark_updated_policy() {
        let store = Arc::new(MemoryRecordStore::with_records([
            stored("1", json!(10), Some(ProductStatus::Sent)),
            stored("2", json!("12.50"), Some(ProductStatus::Sent)),
            stored("3", json!(7), None),
        ]));
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::MarkUpdated);

        let report = updater
            .run(Some(vec![
                request("1", Decimal::new(11, 0)),
                request("2", Decimal::new(125, 1)),
                request("3", Decimal::new(8, 0)),
            ]))
            .await
            .unwrap();

        assert_eq!(report.updated, vec!["1", "2", "3"]);
        assert_eq!(
            store.snapshot("1").unwrap().status,
            Some(ProductStatus::Updated)
        );
        // Same price, different representation: nothing to publish
        assert_eq!(store.snapshot("2").unwrap().status, Some(ProductStatus::Sent));
        assert_eq!(
            store.snapshot("3").unwrap().status,
            Some(ProductStatus::Updated)
        );
    }

    #[tokio::test]
    async fn test_store_outage_fails_every_record() {
        let store = Arc::new(MemoryRecordStore::new());
        store.set_unavailable(true);
        let updater = PriceUpdater::new(store.clone(), PriceStatusPolicy::default());

        let report = updater
            .run(Some(vec![request("1", Decimal::ONE)]))
            .await
            .unwrap();
        assert_eq!(report.failed, vec!["1"]);
    }
}
