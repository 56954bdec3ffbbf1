//! Ids that arrive either as JSON strings or as numbers.
//!
//! Use with `#[serde(deserialize_with = "...")]`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn coerce(value: Value) -> Result<String, Value> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(other),
    }
}

/// Optional id. `null`, a missing field or any other JSON type yields `None`.
pub(crate) fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| coerce(value).ok()))
}

/// Mandatory id.
pub(crate) fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    coerce(Value::deserialize(deserializer)?).map_err(|other| {
        serde::de::Error::custom(format!("expected a string or number id, got {other}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Ids {
        #[serde(deserialize_with = "required_id")]
        id: String,
        #[serde(default, deserialize_with = "optional_id")]
        parent: Option<String>,
    }

    fn parse(value: Value) -> serde_json::Result<Ids> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_strings_and_numbers_become_strings() {
        let ids = parse(json!({"id": 42, "parent": "p-1"})).unwrap();
        assert_eq!(ids.id, "42");
        assert_eq!(ids.parent.as_deref(), Some("p-1"));

        let ids = parse(json!({"id": "u-7", "parent": 3})).unwrap();
        assert_eq!(ids.id, "u-7");
        assert_eq!(ids.parent.as_deref(), Some("3"));
    }

    #[test]
    fn test_optional_id_tolerates_other_shapes() {
        assert_eq!(parse(json!({"id": 1})).unwrap().parent, None);
        assert_eq!(parse(json!({"id": 1, "parent": null})).unwrap().parent, None);
        assert_eq!(parse(json!({"id": 1, "parent": {"x": 1}})).unwrap().parent, None);
    }

    #[test]
    fn test_required_id_rejects_other_shapes() {
        for bad in [json!(null), json!(true), json!(["1"])] {
            let err = parse(json!({"id": bad})).unwrap_err();
            assert!(err.to_string().contains("string or number"), "{err}");
        }
        assert!(parse(json!({})).is_err());
    }
}
