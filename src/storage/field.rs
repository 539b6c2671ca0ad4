//! Dynamic field extraction and scalar canonicalization (C2).
//!
//! Documents are heterogeneous, so a field is never read through `T`'s own
//! type — it is read by re-serializing `T` to a tagged-value map and
//! stringifying the requested field's scalar. This same canonicalization
//! defines both shard partition ids and B-tree index keys.

use serde::Serialize;
use serde_json::Value;

use crate::error::NyaruError;

/// The role a field plays when it is missing, used only to pick the right
/// error variant — the extraction logic itself is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Partition,
    Index,
}

/// A decoded top-level scalar value: string, number, bool, or null.
/// Nested arrays/objects are not modeled — the engine never inspects
/// structure beyond top-level fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl ScalarValue {
    /// Canonical string form: numbers in decimal, booleans as `true`/`false`,
    /// null as the literal `"null"`.
    pub fn to_canonical_string(&self) -> String {
        match self {
            ScalarValue::String(s) => s.clone(),
            ScalarValue::Number(n) => canonical_number(*n),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Null => "null".to_string(),
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ScalarValue::String(s.clone())),
            Value::Number(n) => Some(ScalarValue::Number(n.as_f64()?)),
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Null => Some(ScalarValue::Null),
            // Arrays/objects have no scalar stringification; treated as absent.
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn canonical_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Extract `field` from `doc`'s top-level map as a canonical string.
///
/// Fails with `PartitionKeyMissing`/`IndexKeyMissing` (per `role`) when the
/// field is absent, is not present in the re-serialized map, or does not
/// hold a scalar value.
pub fn extract<T: Serialize>(
    doc: &T,
    field: &str,
    role: FieldRole,
) -> Result<String, NyaruError> {
    let value = serde_json::to_value(doc)?;
    let scalar = value
        .as_object()
        .and_then(|obj| obj.get(field))
        .and_then(ScalarValue::from_json);

    match scalar {
        Some(s) => Ok(s.to_canonical_string()),
        None => Err(missing_error(field, role)),
    }
}

/// Same as [`extract`] but operating directly on an already-decoded JSON
/// value, used by the executor when a document has already been loaded.
pub fn extract_from_value(
    value: &Value,
    field: &str,
    role: FieldRole,
) -> Result<String, NyaruError> {
    let scalar = value
        .as_object()
        .and_then(|obj| obj.get(field))
        .and_then(ScalarValue::from_json);

    match scalar {
        Some(s) => Ok(s.to_canonical_string()),
        None => Err(missing_error(field, role)),
    }
}

/// Field presence check for `exists`/`not_exists` predicates — unlike
/// [`extract_from_value`], a field holding `null` still counts as present.
pub fn field_exists(value: &Value, field: &str) -> bool {
    value
        .as_object()
        .map(|obj| obj.contains_key(field))
        .unwrap_or(false)
}

fn missing_error(field: &str, role: FieldRole) -> NyaruError {
    match role {
        FieldRole::Partition => NyaruError::PartitionKeyMissing(field.to_string()),
        FieldRole::Index => NyaruError::IndexKeyMissing(field.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_string_number_bool_null() {
        let doc = json!({"name": "Alice", "age": 30, "active": true, "nickname": null});
        assert_eq!(
            extract_from_value(&doc, "name", FieldRole::Index).unwrap(),
            "Alice"
        );
        assert_eq!(
            extract_from_value(&doc, "age", FieldRole::Index).unwrap(),
            "30"
        );
        assert_eq!(
            extract_from_value(&doc, "active", FieldRole::Index).unwrap(),
            "true"
        );
        assert_eq!(
            extract_from_value(&doc, "nickname", FieldRole::Index).unwrap(),
            "null"
        );
    }

    #[test]
    fn missing_partition_key_is_distinguished_from_missing_index_key() {
        let doc = json!({"id": 1});
        let err = extract_from_value(&doc, "category", FieldRole::Partition).unwrap_err();
        assert!(matches!(err, NyaruError::PartitionKeyMissing(f) if f == "category"));

        let err = extract_from_value(&doc, "name", FieldRole::Index).unwrap_err();
        assert!(matches!(err, NyaruError::IndexKeyMissing(f) if f == "name"));
    }

    #[test]
    fn field_presence_counts_null_as_present() {
        let doc = json!({"x": null});
        assert!(field_exists(&doc, "x"));
        assert!(!field_exists(&doc, "y"));
    }
}
