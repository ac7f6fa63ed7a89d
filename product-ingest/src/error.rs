use thiserror::Error;

use product_common::feed::FeedError;

/// Errors that abort a whole Ingest run. Record-level failures are counted, not raised.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source feed unavailable: {0}")]
    SourceUnavailable(#[from] FeedError),
}
