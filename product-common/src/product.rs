use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field name carrying the canonical product id in feed payloads.
pub const PRODUCT_ID_FIELD: &str = "productId";
/// Field overwritten by price corrections.
pub const PRODUCT_PRICE_FIELD: &str = "productPrice";

/// Key of the outbox marker in the flat document. Capitalized so that a product attribute
/// named `status` stays an ordinary field.
pub const STATUS_KEY: &str = "Status";

/// Keys owned by the pipeline. They are never copied from feed candidates into `fields`.
const RESERVED_KEYS: [&str; 2] = ["id", STATUS_KEY];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProductError {
    #[error("{0} is not a valid ProductStatus")]
    ParseStatusError(String),
    #[error("feed entry is not a JSON object")]
    NotAnObject,
    #[error("feed entry is missing productId")]
    MissingProductId,
    #[error("feed entry has an invalid productId: {0}")]
    InvalidProductId(String),
}

/// Outbox marker stored alongside every product.
/// New: first sighting of the id, not yet forwarded to the event sink.
/// Updated: at least one field changed since the last confirmed delivery.
/// Sent: the latest change was delivered. Records created outside the pipeline carry no
/// status at all, which is read the same way as Sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductStatus {
    New,
    Updated,
    Sent,
}

impl ProductStatus {
    /// Statuses the publisher picks up.
    pub const PENDING: [ProductStatus; 2] = [ProductStatus::New, ProductStatus::Updated];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::New => "New",
            ProductStatus::Updated => "Updated",
            ProductStatus::Sent => "Sent",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ProductStatus::New | ProductStatus::Updated)
    }

    /// Status of an already stored record once a new change is applied to it.
    /// Every prior state converges on `Updated`, including `New` records that were never
    /// published and `Sent` records that are re-opened.
    pub fn after_change(self) -> ProductStatus {
        ProductStatus::Updated
    }

    /// Status once the event sink confirmed delivery of the pending change.
    pub fn after_delivery(self) -> ProductStatus {
        ProductStatus::Sent
    }
}

impl FromStr for ProductStatus {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(ProductStatus::New),
            "Updated" => Ok(ProductStatus::Updated),
            "Sent" => Ok(ProductStatus::Sent),
            invalid => Err(ProductError::ParseStatusError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A product document as kept in the record store.
///
/// Serialized flat, the way downstream consumers and API callers see it:
/// `{"id": "1", "Status": "New", "productId": "1", "name": "Widget"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProductStatus>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProductRecord {
    pub fn new(id: &str, fields: Map<String, Value>, status: Option<ProductStatus>) -> Self {
        Self {
            id: id.to_owned(),
            status,
            fields,
        }
    }

    /// Whether this record holds a change not yet confirmed by the event sink.
    pub fn is_pending(&self) -> bool {
        self.status.map(|s| s.is_pending()).unwrap_or(false)
    }

    /// Overwrite the price field, leaving everything else untouched.
    pub fn set_price(&mut self, price: Decimal) {
        self.fields
            .insert(PRODUCT_PRICE_FIELD.to_owned(), decimal_to_value(price));
    }

    /// A copy of this record without its outbox marker, for callers that should not see it.
    pub fn without_status(&self) -> Self {
        Self {
            id: self.id.clone(),
            status: None,
            fields: self.fields.clone(),
        }
    }
}

/// One entry of the source feed, keyed by its `productId`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub product_id: String,
    pub fields: Map<String, Value>,
}

impl CandidateRecord {
    /// Build a candidate out of a raw feed element.
    ///
    /// `productId` may come as a string or a number. It stays among the fields, as it
    /// is part of the canonical document. `id` and `Status` are dropped.
    pub fn from_value(value: Value) -> Result<Self, ProductError> {
        let Value::Object(mut object) = value else {
            return Err(ProductError::NotAnObject);
        };

        let product_id = match object.get(PRODUCT_ID_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.to_owned(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => return Err(ProductError::MissingProductId),
            Some(other) => return Err(ProductError::InvalidProductId(other.to_string())),
        };

        for key in RESERVED_KEYS {
            object.remove(key);
        }

        Ok(Self {
            product_id,
            fields: object,
        })
    }
}

/// Transient input of the price correction endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateRequest {
    #[serde(rename = "productId", deserialize_with = "product_id_from_text_or_number")]
    pub product_id: String,
    #[serde(rename = "productPrice")]
    pub product_price: Decimal,
}

/// Ids are accepted as strings or numbers, the same as in the feed.
fn product_id_from_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ProductId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match ProductId::deserialize(deserializer)? {
        ProductId::Text(id) => id,
        ProductId::Number(id) => id.to_string(),
    })
}

/// Whether `price` is stored without loss. Prices are kept as JSON numbers, which hold about
/// 15 significant digits.
pub fn is_storable_price(price: Decimal) -> bool {
    match decimal_to_value(price) {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .map_or(false, |stored| stored == price),
        _ => false,
    }
}

fn decimal_to_value(price: Decimal) -> Value {
    match serde_json::Number::from_str(&price.normalize().to_string()) {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(price.to_string()),
    }
}
