use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::sink::{EventSink, OutboundMessage, SinkError};

/// Keeps every accepted message. Can be switched to reject everything, or only some keys.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    failing_keys: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_key(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.push(key.to_owned());
        }
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, message: OutboundMessage) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Retryable("sink marked failing".to_owned()));
        }
        let rejected = self
            .failing_keys
            .lock()
            .map(|keys| keys.contains(&message.key))
            .unwrap_or(false);
        if rejected {
            return Err(SinkError::Retryable(format!("key {} rejected", message.key)));
        }

        self.messages
            .lock()
            .map_err(|_| SinkError::Retryable("poisoned MemorySink lock".to_owned()))?
            .push(message);
        Ok(())
    }
}
