use thiserror::Error;

use product_common::store::StoreError;

/// Errors that abort a whole Publish run. Per-record send or status write failures are
/// counted, not raised.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to query pending products: {0}")]
    Store(#[from] StoreError),
}
