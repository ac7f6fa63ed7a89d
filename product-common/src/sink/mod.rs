//! The event sink: downstream consumers of product changes.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod kafka;
pub mod memory;
pub mod print;

pub use kafka::KafkaEventSink;
pub use memory::MemorySink;
pub use print::PrintSink;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_LABEL: &str = "ProductUpdate";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SinkError {
    #[error("message rejected by the sink: {0}")]
    NonRetryable(String),
    #[error("failed to deliver message: {0}")]
    Retryable(String),
}

/// One message handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub label: String,
    /// Unique per send, so consumers can de-duplicate redeliveries.
    pub message_id: Uuid,
    /// Record id, used for partitioning.
    pub key: String,
}

impl OutboundMessage {
    /// A JSON message with a fresh id.
    pub fn json(key: &str, payload: Vec<u8>, label: &str) -> Self {
        Self {
            payload,
            content_type: JSON_CONTENT_TYPE.to_owned(),
            label: label.to_owned(),
            message_id: Uuid::now_v7(),
            key: key.to_owned(),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one message. Returns once the sink acknowledged it.
    async fn send(&self, message: OutboundMessage) -> Result<(), SinkError>;
}
