use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::sink::{EventSink, OutboundMessage, SinkError};

/// Logs every message instead of delivering it, for local development.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), SinkError> {
        info!(
            key = %message.key,
            label = %message.label,
            message_id = %message.message_id,
            content_type = %message.content_type,
            payload = %String::from_utf8_lossy(&message.payload),
            "product event"
        );
        counter!("product_sink_messages_total", "sink" => "print").increment(1);

        Ok(())
    }
}
