//! Attribute map and attribute extraction specs
//!
//! The attribute map is the flat, per-request bag of values that the
//! authorization gate and the hooks build their resource checks from.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known attribute keys
pub mod keys {
    pub const PROJECT: &str = "project";
    pub const RESOURCE: &str = "resource";
    pub const RESOURCE_TYPE: &str = "resource_type";
    pub const TEAM: &str = "team";
    pub const NAMESPACE: &str = "namespace";
    pub const PREFIX: &str = "prefix";
    pub const USER: &str = "user";
    pub const ORGANIZATION: &str = "organization";
}

/// A single attribute value: one string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multi(Vec<String>),
}

impl AttributeValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// No entry carries any text
    pub fn is_blank(&self) -> bool {
        self.values().iter().all(|value| value.is_empty())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => f.write_str(value),
            Self::Multi(values) => f.write_str(&values.join(",")),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// Per-request attribute map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, AttributeValue>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// All non-empty values stored under `key`
    pub fn values_of(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .map(|value| {
                value
                    .values()
                    .into_iter()
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy every entry of `other` into this map, overwriting on conflict
    pub fn merge(&mut self, other: AttributeMap) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Where an attribute's value is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Header,
    Query,
    JsonPayload,
    GrpcPayload,
    Constant,
}

/// Which message an attribute is read from; only hooks can see the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSource {
    #[default]
    Request,
    Response,
}

/// Configuration for one extracted attribute
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Header name, query parameter, or JSON key path
    #[serde(default, alias = "location")]
    pub key: String,
    /// gRPC field query such as `3` or `2.1[0]`
    #[serde(default, deserialize_with = "string_or_number")]
    pub index: String,
    /// Literal value for constants
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub source: AttributeSource,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_of_skips_empty_entries() {
        let mut map = AttributeMap::new();
        map.insert(keys::PROJECT, vec!["p1".to_string(), String::new()]);
        map.insert(keys::RESOURCE, "r1");

        assert_eq!(map.values_of(keys::PROJECT), vec!["p1"]);
        assert_eq!(map.values_of(keys::RESOURCE), vec!["r1"]);
        assert!(map.values_of(keys::TEAM).is_empty());
    }

    #[test]
    fn test_merge_overwrites() {
        let mut base = AttributeMap::new();
        base.insert("a", "1");
        base.insert("b", "2");
        let mut other = AttributeMap::new();
        other.insert("b", "3");

        base.merge(other);
        assert_eq!(base.get("a"), Some(&AttributeValue::from("1")));
        assert_eq!(base.get("b"), Some(&AttributeValue::from("3")));
    }

    #[test]
    fn test_spec_accepts_numeric_index_and_location_alias() {
        let spec: AttributeSpec =
            serde_yaml::from_str("type: grpc_payload\nindex: 3\nlocation: ignored").unwrap();
        assert_eq!(spec.kind, AttributeType::GrpcPayload);
        assert_eq!(spec.index, "3");
        assert_eq!(spec.key, "ignored");
        assert_eq!(spec.source, AttributeSource::Request);

        let spec: AttributeSpec =
            serde_yaml::from_str("type: grpc_payload\nindex: \"2.1[0]\"").unwrap();
        assert_eq!(spec.index, "2.1[0]");
    }

    #[test]
    fn test_is_blank() {
        assert!(AttributeValue::from("").is_blank());
        assert!(AttributeValue::Multi(vec![]).is_blank());
        assert!(AttributeValue::Multi(vec![String::new(), String::new()]).is_blank());
        assert!(!AttributeValue::Multi(vec![String::new(), "a".into()]).is_blank());
    }

    #[test]
    fn test_display_joins_values() {
        assert_eq!(
            AttributeValue::Multi(vec!["a".into(), "b".into()]).to_string(),
            "a,b"
        );
    }
}
