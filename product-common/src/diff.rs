//! Change detection between a feed candidate and the stored product.
//!
//! Values are compared through their string rendering, so `"12"` in the feed and `12` in
//! the store are the same value. A field missing from the stored record always counts as a
//! change. Fields that exist only in the store are never touched.

use serde_json::{Map, Value};

use crate::product::{CandidateRecord, ProductRecord, ProductStatus};

/// Outcome of reconciling one candidate against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The id was never seen: store the candidate as is, marked `New`.
    Create(ProductRecord),
    /// Some fields differ: the stored record with the changed fields applied, marked `Updated`.
    Update {
        record: ProductRecord,
        changed: Vec<String>,
    },
    /// Nothing differs. The stored record must be left alone.
    Unchanged,
}

/// String rendering used for comparisons.
pub fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Names of candidate fields that are absent from, or differ in, the stored fields.
/// Returned in candidate order.
pub fn changed_fields(stored: &Map<String, Value>, candidate: &Map<String, Value>) -> Vec<String> {
    candidate
        .iter()
        .filter(|(name, value)| match stored.get(name.as_str()) {
            Some(existing) => normalize(existing) != normalize(value),
            None => true,
        })
        .map(|(name, _)| name.to_owned())
        .collect()
}

/// Decide what to write for `candidate` given the currently stored record, if any.
pub fn reconcile(existing: Option<&ProductRecord>, candidate: CandidateRecord) -> Reconciliation {
    let Some(existing) = existing else {
        return Reconciliation::Create(ProductRecord::new(
            &candidate.product_id,
            candidate.fields,
            Some(ProductStatus::New),
        ));
    };

    let changed = changed_fields(&existing.fields, &candidate.fields);
    if changed.is_empty() {
        return Reconciliation::Unchanged;
    }

    let mut record = existing.clone();
    let mut fields = candidate.fields;
    for name in &changed {
        if let Some(value) = fields.remove(name.as_str()) {
            record.fields.insert(name.to_owned(), value);
        }
    }
    record.status = Some(
        existing
            .status
            .unwrap_or(ProductStatus::Sent)
            .after_change(),
    );

    Reconciliation::Update { record, changed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn candidate(value: Value) -> CandidateRecord {
        CandidateRecord::from_value(value).expect("valid candidate")
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&json!("Widget")), "Widget");
        assert_eq!(normalize(&json!(12)), "12");
        assert_eq!(normalize(&json!(12.5)), "12.5");
        assert_eq!(normalize(&json!(true)), "true");
        assert_eq!(normalize(&Value::Null), "");
        assert_eq!(normalize(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_string_normalized_comparison() {
        let stored = fields(json!({"weight": 12, "name": "Widget"}));
        let incoming = fields(json!({"weight": "12", "name": "Widget"}));
        assert!(changed_fields(&stored, &incoming).is_empty());
    }

    #[test]
    fn test_absent_field_counts_as_changed() {
        let stored = fields(json!({"name": "Widget"}));
        let incoming = fields(json!({"name": "Widget", "colour": null}));
        assert_eq!(changed_fields(&stored, &incoming), vec!["colour"]);
    }

    #[test]
    fn test_create_when_absent() {
        let result = reconcile(None, candidate(json!({"productId": "1", "name": "Widget"})));
        match result {
            Reconciliation::Create(record) => {
                assert_eq!(record.id, "1");
                assert_eq!(record.status, Some(ProductStatus::New));
                assert_eq!(record.fields, fields(json!({"productId": "1", "name": "Widget"})));
            }
            other => panic!("expected Create, got {:?}", other),
        }
    }

    #[test]
    fn test_update_only_changed_fields() {
        let existing = ProductRecord::new(
            "1",
            fields(json!({"productId": "1", "name": "Widget", "weight": 3, "legacy": "kept"})),
            Some(ProductStatus::Sent),
        );
        let result = reconcile(
            Some(&existing),
            candidate(json!({"productId": "1", "name": "Gadget", "weight": "3"})),
        );

        match result {
            Reconciliation::Update { record, changed } => {
                assert_eq!(changed, vec!["name"]);
                assert_eq!(record.id, "1");
                assert_eq!(record.status, Some(ProductStatus::Updated));
                assert_eq!(record.fields.get("name"), Some(&json!("Gadget")));
                // Unchanged fields keep their stored representation.
                assert_eq!(record.fields.get("weight"), Some(&json!(3)));
                assert_eq!(record.fields.get("legacy"), Some(&json!("kept")));
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[test]
    fn test_unchanged_record_is_left_alone() {
        let existing = ProductRecord::new(
            "1",
            fields(json!({"productId": "1", "name": "Widget"})),
            Some(ProductStatus::Sent),
        );
        let result = reconcile(
            Some(&existing),
            candidate(json!({"productId": "1", "name": "Widget"})),
        );
        assert_eq!(result, Reconciliation::Unchanged);
    }

    #[test]
    fn test_status_transitions_on_change() {
        for (before, after) in [
            (Some(ProductStatus::New), ProductStatus::Updated),
            (Some(ProductStatus::Updated), ProductStatus::Updated),
            (Some(ProductStatus::Sent), ProductStatus::Updated),
            (None, ProductStatus::Updated),
        ] {
            let existing = ProductRecord::new("1", fields(json!({"name": "Widget"})), before);
            let result = reconcile(
                Some(&existing),
                candidate(json!({"productId": "1", "name": "Gadget"})),
            );
            match result {
                Reconciliation::Update { record, .. } => assert_eq!(record.status, Some(after)),
                other => panic!("expected Update, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_candidate_never_overwrites_id() {
        let existing = ProductRecord::new("1", Map::new(), Some(ProductStatus::Sent));
        let result = reconcile(
            Some(&existing),
            candidate(json!({"productId": "1", "id": "2", "name": "Gadget"})),
        );
        match result {
            Reconciliation::Update { record, .. } => {
                assert_eq!(record.id, "1");
                assert!(!record.fields.contains_key("id"));
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }
}
