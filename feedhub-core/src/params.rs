//! Canonical channel parameters
//!
//! Channel parameters arrive as loosely typed JSON (`{"interval": "1m"}`,
//! `{"depth": 20}`, `null`, ...). They are normalized here into an ordered
//! set of name/value text pairs so that logically identical requests always
//! produce the same key regardless of insertion order or value encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::{FeedError, FeedResult};

/// Largest magnitude at which an integral float is still rendered as an integer
const MAX_EXACT_INTEGRAL_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Canonicalized channel parameters, ordered by parameter name
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelParams(BTreeMap<String, String>);

impl ChannelParams {
    /// The empty parameter set (`{}`, `null` and "no params" all map here)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Canonicalize an optional JSON value
    ///
    /// Accepts `None`, `null` or an object whose values are scalars.
    /// `null` members are treated as absent.
    pub fn from_json(params: Option<&Value>) -> FeedResult<Self> {
        match params {
            None | Some(Value::Null) => Ok(Self::empty()),
            Some(Value::Object(map)) => Self::from_object(map),
            Some(other) => Err(FeedError::invalid_request(format!(
                "channel params must be an object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Build from already-textual pairs; values are kept as-is
    pub fn from_pairs<I, K, V>(pairs: I) -> FeedResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = BTreeMap::new();
        for (name, value) in pairs {
            let name = normalize_name(name.into())?;
            params.insert(name, value.into());
        }
        Ok(Self(params))
    }

    fn from_object(map: &Map<String, Value>) -> FeedResult<Self> {
        let mut params = BTreeMap::new();
        for (name, value) in map {
            let name = normalize_name(name.clone())?;
            if let Some(text) = canonical_value(&name, value)? {
                params.insert(name, text);
            }
        }
        Ok(Self(params))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical serialization: `name=value` pairs joined by `&`, sorted by name
    ///
    /// Separator characters inside names and values are percent-escaped, so
    /// distinct parameter sets never share a canonical form.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for ChannelParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Percent-escape the characters used as separators in canonical text
pub(crate) fn escape_component(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            '|' => escaped.push_str("%7C"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn normalize_name(name: String) -> FeedResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FeedError::invalid_params(name, "parameter name is empty"));
    }
    Ok(trimmed.to_string())
}

/// Render a scalar JSON value as canonical text; `None` means "absent"
fn canonical_value(name: &str, value: &Value) -> FeedResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => canonical_number(name, n).map(Some),
        Value::Array(_) | Value::Object(_) => Err(FeedError::invalid_params(
            name,
            format!("nested {} values are not supported", json_kind(value)),
        )),
    }
}

fn canonical_number(name: &str, n: &Number) -> FeedResult<String> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            if f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGRAL_FLOAT {
                Ok((f as i64).to_string())
            } else {
                Ok(f.to_string())
            }
        }
        _ => Err(FeedError::invalid_params(name, "number is not finite")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_null_and_empty_are_identical() {
        let none = ChannelParams::from_json(None).unwrap();
        let null = ChannelParams::from_json(Some(&Value::Null)).unwrap();
        let empty = ChannelParams::from_json(Some(&json!({}))).unwrap();

        assert_eq!(none, null);
        assert_eq!(null, empty);
        assert!(none.is_empty());
        assert_eq!(none.canonical(), "");
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"interval":"1m","limit":500}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"limit":500,"interval":"1m"}"#).unwrap();

        let a = ChannelParams::from_json(Some(&a)).unwrap();
        let b = ChannelParams::from_json(Some(&b)).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.canonical(), "interval=1m&limit=500");
    }

    #[test]
    fn test_numbers_render_canonically() {
        let params = ChannelParams::from_json(Some(&json!({
            "depth": 20.0,
            "step": 0.5,
            "offset": -3,
        })))
        .unwrap();

        assert_eq!(params.get("depth"), Some("20"));
        assert_eq!(params.get("step"), Some("0.5"));
        assert_eq!(params.get("offset"), Some("-3"));
    }

    #[test]
    fn test_numeric_and_string_forms_collide() {
        let numeric = ChannelParams::from_json(Some(&json!({ "depth": 20 }))).unwrap();
        let text = ChannelParams::from_json(Some(&json!({ "depth": "20" }))).unwrap();
        assert_eq!(numeric, text);
    }

    #[test]
    fn test_null_member_is_absent() {
        let params = ChannelParams::from_json(Some(&json!({ "interval": "1m", "tz": null }))).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("tz"), None);
    }

    #[test]
    fn test_rejects_nested_and_non_object_values() {
        assert!(ChannelParams::from_json(Some(&json!({ "levels": [1, 2] }))).is_err());
        assert!(ChannelParams::from_json(Some(&json!({ "opts": { "a": 1 } }))).is_err());
        assert!(ChannelParams::from_json(Some(&json!("1m"))).is_err());
        assert!(ChannelParams::from_json(Some(&json!({ " ": "x" }))).is_err());
    }

    #[test]
    fn test_separators_in_values_are_escaped() {
        let packed = ChannelParams::from_json(Some(&json!({ "a": "1&b=2" }))).unwrap();
        let split = ChannelParams::from_json(Some(&json!({ "a": "1", "b": "2" }))).unwrap();

        assert_ne!(packed.canonical(), split.canonical());
        assert_eq!(packed.canonical(), "a=1%26b%3D2");
        assert_eq!(split.canonical(), "a=1&b=2");

        let percent = ChannelParams::from_json(Some(&json!({ "a": "%26" }))).unwrap();
        assert_eq!(percent.canonical(), "a=%2526");
    }

    #[test]
    fn test_from_pairs_matches_json_form() {
        let pairs = ChannelParams::from_pairs([("interval", "1m")]).unwrap();
        let json = ChannelParams::from_json(Some(&json!({ "interval": "1m" }))).unwrap();
        assert_eq!(pairs, json);
    }
}
