//! Key-path lookup in JSON bodies
//!
//! Paths are dotted keys with optional array indices: `project`,
//! `project.id`, `items[0].name`, `matrix[1][0]`. A scalar resolves to a
//! single value; an array of scalars resolves to a list.

use crate::domain::AttributeValue;
use crate::payload::PayloadError;
use serde_json::Value;

/// Extract the value at `path` from a JSON document
pub fn extract(body: &[u8], path: &str) -> Result<AttributeValue, PayloadError> {
    let document: Value = serde_json::from_slice(body)?;
    lookup(&document, path)
}

/// Resolve `path` against an already-parsed document
pub fn lookup(document: &Value, path: &str) -> Result<AttributeValue, PayloadError> {
    let missing = || PayloadError::Missing(path.to_string());
    let steps = parse_path(path).ok_or_else(|| PayloadError::InvalidQuery(path.to_string()))?;

    let mut current = document;
    for step in &steps {
        current = match step {
            Step::Key(key) => current.get(key.as_str()),
            Step::Index(index) => current.get(*index),
        }
        .ok_or_else(missing)?;
    }

    match current {
        Value::Null => Err(missing()),
        Value::Array(items) => items
            .iter()
            .map(|item| scalar(item).ok_or_else(|| PayloadError::NotScalar(path.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(AttributeValue::Multi),
        other => scalar(other)
            .map(AttributeValue::Single)
            .ok_or_else(|| PayloadError::NotScalar(path.to_string())),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Step>> {
    if path.trim().is_empty() {
        return None;
    }

    let mut steps = Vec::new();
    for segment in path.split('.') {
        let (key, mut rest) = match segment.find('[') {
            Some(at) => segment.split_at(at),
            None => (segment, ""),
        };
        if key.is_empty() && rest.is_empty() {
            return None;
        }
        if !key.is_empty() {
            steps.push(Step::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.parse().ok()?;
            steps.push(Step::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(steps)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BODY: &str = r#"{
        "project": "p1",
        "count": 3,
        "enabled": true,
        "owner": { "team": { "id": "t1" } },
        "items": [ { "name": "a" }, { "name": "b" } ],
        "tags": ["x", "y"],
        "matrix": [["m00", "m01"], ["m10"]],
        "nothing": null
    }"#;

    #[rstest]
    #[case("project", AttributeValue::from("p1"))]
    #[case("count", AttributeValue::from("3"))]
    #[case("enabled", AttributeValue::from("true"))]
    #[case("owner.team.id", AttributeValue::from("t1"))]
    #[case("items[1].name", AttributeValue::from("b"))]
    #[case("tags", AttributeValue::Multi(vec!["x".into(), "y".into()]))]
    #[case("tags[0]", AttributeValue::from("x"))]
    #[case("matrix[1][0]", AttributeValue::from("m10"))]
    fn test_lookup(#[case] path: &str, #[case] expected: AttributeValue) {
        assert_eq!(extract(BODY.as_bytes(), path).unwrap(), expected);
    }

    #[rstest]
    #[case("missing")]
    #[case("items[5].name")]
    #[case("owner.team.name")]
    #[case("nothing")]
    fn test_missing_paths(#[case] path: &str) {
        assert!(matches!(
            extract(BODY.as_bytes(), path),
            Err(PayloadError::Missing(_))
        ));
    }

    #[test]
    fn test_non_scalar_values() {
        assert!(matches!(
            extract(BODY.as_bytes(), "owner"),
            Err(PayloadError::NotScalar(_))
        ));
        assert!(matches!(
            extract(BODY.as_bytes(), "items"),
            Err(PayloadError::NotScalar(_))
        ));
    }

    #[rstest]
    #[case("")]
    #[case("a..b")]
    #[case("items[x]")]
    #[case("items[0")]
    #[case("items[0]name")]
    fn test_invalid_paths(#[case] path: &str) {
        assert!(matches!(
            extract(BODY.as_bytes(), path),
            Err(PayloadError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            extract(b"{not json", "project"),
            Err(PayloadError::Json(_))
        ));
    }
}
