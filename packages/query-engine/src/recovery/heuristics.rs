//! Post-parse normalization of key-name drift between models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, Result};

/// Expected shape of a recovered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Entity,
    EntityWithAction,
    Action,
    ProtectionMethod,
    Party,
    Relation,
    RetentionDetails,
}

/// Keys different models use for "the matched text".
const TEXT_KEYS: [&str; 7] = [
    "data_entity",
    "purpose",
    "text",
    "data",
    "entity",
    "dataEntity",
    "data entity",
];

/// Keys different models use for the entity's context label.
const CONTEXT_KEYS: [&str; 4] = ["context_type", "context", "type", "contextType"];

const RETENTION_OPTIONAL_KEYS: [&str; 2] = ["retention-period", "storage-place"];

/// Normalize a recovered value for `shape`.
///
/// - `Entity`: list items that are objects collapse to their single
///   text-like key's value.
/// - `RetentionDetails`: empty optional keys are dropped.
/// - Every other shape, and any non-list value, passes through.
pub fn normalize(value: Value, shape: ResultShape) -> Result<Value> {
    let Value::Array(items) = value else {
        return Ok(value);
    };

    match shape {
        ResultShape::Entity => items
            .into_iter()
            .map(collapse_entity)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        ResultShape::RetentionDetails => Ok(Value::Array(
            items.into_iter().map(drop_empty_retention_keys).collect(),
        )),
        _ => Ok(Value::Array(items)),
    }
}

fn collapse_entity(item: Value) -> Result<Value> {
    let Value::Object(mut object) = item else {
        return Ok(item);
    };

    single_key(&object, &CONTEXT_KEYS)?;
    match single_key(&object, &TEXT_KEYS)? {
        Some(key) => Ok(object.remove(key).unwrap_or(Value::Null)),
        None => Ok(Value::Object(object)),
    }
}

/// The one key of `group` present in `object`; two or more is malformed.
fn single_key<'k>(
    object: &serde_json::Map<String, Value>,
    group: &[&'k str],
) -> Result<Option<&'k str>> {
    let mut found: Option<&'k str> = None;
    for key in group {
        if object.contains_key(*key) {
            if let Some(previous) = found {
                return Err(QueryError::MalformedData {
                    reason: format!(
                        "multiple keys found in the same object: {} and {}",
                        previous, key
                    ),
                });
            }
            found = Some(*key);
        }
    }
    Ok(found)
}

fn drop_empty_retention_keys(item: Value) -> Value {
    let Value::Object(mut object) = item else {
        return item;
    };
    for key in RETENTION_OPTIONAL_KEYS {
        if object.get(key).is_some_and(is_empty) {
            object.remove(key);
        }
    }
    Value::Object(object)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Entity text that arrives either bare or wrapped in `{"text": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmbiguousText {
    Bare(String),
    Tagged { text: String },
}

impl AmbiguousText {
    pub fn into_text(self) -> String {
        match self {
            Self::Bare(text) | Self::Tagged { text } => text,
        }
    }

    /// Decode one value; anything other than a string or a `text` object
    /// is malformed.
    pub fn decode(value: Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|_| QueryError::MalformedData {
            reason: format!("expected a string or {{\"text\": ...}}, got {}", value),
        })
    }
}

/// Decode a list of entity texts, accepting either form per item.
pub fn entity_texts(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| AmbiguousText::decode(item).map(AmbiguousText::into_text))
            .collect(),
        other => Err(QueryError::MalformedData {
            reason: format!("expected a list of entities, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_variants_collapse() {
        let value = json!([
            "email",
            {"data_entity": "phone number", "context_type": "collected"},
            {"dataEntity": "address", "type": "shared"},
            {"data entity": "device id"},
            {"unrelated": 1}
        ]);
        assert_eq!(
            normalize(value, ResultShape::Entity).unwrap(),
            json!(["email", "phone number", "address", "device id", {"unrelated": 1}])
        );
    }

    #[test]
    fn test_two_text_keys_is_malformed() {
        let value = json!([{"text": "email", "entity": "email"}]);
        assert!(matches!(
            normalize(value, ResultShape::Entity),
            Err(QueryError::MalformedData { .. })
        ));

        let value = json!([{"text": "email", "type": "a", "context": "b"}]);
        assert!(normalize(value, ResultShape::Entity).is_err());
    }

    #[test]
    fn test_retention_details_drop_empty_keys() {
        let value = json!([
            {"data": "logs", "retention-period": "", "storage-place": "EU"},
            {"data": "email", "retention-period": "30 days", "storage-place": null}
        ]);
        assert_eq!(
            normalize(value, ResultShape::RetentionDetails).unwrap(),
            json!([
                {"data": "logs", "storage-place": "EU"},
                {"data": "email", "retention-period": "30 days"}
            ])
        );
    }

    #[test]
    fn test_other_shapes_pass_through() {
        let value = json!([{"text": "x", "data": "y"}]);
        assert_eq!(normalize(value.clone(), ResultShape::Relation).unwrap(), value);
        assert_eq!(normalize(json!({"a": 1}), ResultShape::Entity).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_ambiguous_text() {
        assert_eq!(
            entity_texts(json!(["email", {"text": "phone", "type": "x"}])).unwrap(),
            vec!["email", "phone"]
        );
        assert!(AmbiguousText::decode(json!(42)).is_err());
        assert_eq!(
            AmbiguousText::decode(json!({"text": "email"})).unwrap().into_text(),
            "email"
        );
    }
}
