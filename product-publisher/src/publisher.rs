use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use product_common::product::{ProductRecord, ProductStatus};
use product_common::sink::{EventSink, OutboundMessage};
use product_common::store::RecordStore;

use crate::error::PublishError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    /// Delivered and marked `Sent`.
    pub sent: usize,
    /// Not delivered. The record stays pending for the next run.
    pub send_failed: usize,
    /// Delivered, but still pending in the store: it will be delivered again.
    pub status_write_failed: usize,
}

enum Delivery {
    Sent,
    SendFailed,
    StatusWriteFailed,
}

impl Delivery {
    fn as_label(&self) -> &'static str {
        match self {
            Delivery::Sent => "sent",
            Delivery::SendFailed => "send_failed",
            Delivery::StatusWriteFailed => "status_write_failed",
        }
    }
}

/// Forwards every pending product to the event sink and marks it `Sent` once acknowledged.
///
/// Delivery is at-least-once: the send and the status write are not atomic, so a record
/// whose status write fails is sent again on the next run. Each send carries a fresh message
/// id for consumers to de-duplicate on.
pub struct PublishStage {
    store: Arc<dyn RecordStore + Send + Sync>,
    sink: Arc<dyn EventSink + Send + Sync>,
    label: String,
}

impl PublishStage {
    pub fn new(
        store: Arc<dyn RecordStore + Send + Sync>,
        sink: Arc<dyn EventSink + Send + Sync>,
        label: &str,
    ) -> Self {
        Self {
            store,
            sink,
            label: label.to_owned(),
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<PublishSummary, PublishError> {
        let start = Instant::now();
        let pending = self
            .store
            .query_by_status(&ProductStatus::PENDING)
            .await
            .map_err(|e| {
                counter!("product_publish_runs_total", "outcome" => "store_error").increment(1);
                error!("failed to query pending products: {}", e);
                e
            })?;
        info!(count = pending.len(), "found pending products");

        let mut summary = PublishSummary::default();
        for record in pending {
            let outcome = self.publish(record).await;
            match outcome {
                Delivery::Sent => summary.sent += 1,
                Delivery::SendFailed => summary.send_failed += 1,
                Delivery::StatusWriteFailed => summary.status_write_failed += 1,
            }
            counter!("product_publish_records_total", "outcome" => outcome.as_label()).increment(1);
        }

        histogram!("product_publish_run_duration_seconds").record(start.elapsed().as_secs_f64());
        counter!("product_publish_runs_total", "outcome" => "completed").increment(1);
        info!(
            sent = summary.sent,
            send_failed = summary.send_failed,
            status_write_failed = summary.status_write_failed,
            "publish run completed"
        );

        Ok(summary)
    }

    async fn publish(&self, mut record: ProductRecord) -> Delivery {
        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                error!(product_id = %record.id, "failed to serialize product: {}", e);
                return Delivery::SendFailed;
            }
        };

        let message = OutboundMessage::json(&record.id, payload, &self.label);
        let message_id = message.message_id;
        if let Err(e) = self.sink.send(message).await {
            error!(product_id = %record.id, %message_id, "failed to send product: {}", e);
            return Delivery::SendFailed;
        }

        record.status = Some(
            record
                .status
                .unwrap_or(ProductStatus::Sent)
                .after_delivery(),
        );
        match self.store.upsert(&record).await {
            Ok(()) => {
                info!(product_id = %record.id, %message_id, "product sent");
                Delivery::Sent
            }
            Err(e) => {
                warn!(
                    product_id = %record.id,
                    %message_id,
                    "product sent but not marked Sent, it will be sent again: {}",
                    e
                );
                Delivery::StatusWriteFailed
            }
        }
    }
}
