//! Body and querystring serialization contracts.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::errors::{TransportError, TransportResult};

/// Serialization seam consumed by the transport.
///
/// The default implementation is JSON over `serde_json`; alternative
/// implementations can swap in a different codec without touching the
/// orchestration logic.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Serialize a single body value
    fn serialize(&self, value: &Value) -> TransportResult<String>;

    /// Serialize a bulk body as newline-delimited JSON.
    ///
    /// Every line, including the last, is newline-terminated.
    fn ndserialize(&self, values: &[Value]) -> TransportResult<String>;

    /// Parse a response body
    fn deserialize(&self, text: &str) -> TransportResult<Value>;

    /// Encode a querystring with stable key order
    fn qserialize(&self, params: &BTreeMap<String, String>) -> String;
}

/// `serde_json`-backed serializer
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> TransportResult<String> {
        serde_json::to_string(value).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn ndserialize(&self, values: &[Value]) -> TransportResult<String> {
        let mut out = String::new();
        for value in values {
            out.push_str(&self.serialize(value)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn deserialize(&self, text: &str) -> TransportResult<Value> {
        serde_json::from_str(text).map_err(|e| TransportError::Deserialization(e.to_string()))
    }

    fn qserialize(&self, params: &BTreeMap<String, String>) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_object() {
        let s = JsonSerializer;
        let body = json!({ "query": { "match_all": {} } });
        assert_eq!(s.serialize(&body).unwrap(), r#"{"query":{"match_all":{}}}"#);
    }

    #[test]
    fn test_ndserialize_terminates_every_line() {
        let s = JsonSerializer;
        let lines = vec![json!({ "index": {} }), json!({ "field": 1 })];
        let out = s.ndserialize(&lines).unwrap();
        assert_eq!(out, "{\"index\":{}}\n{\"field\":1}\n");
    }

    #[test]
    fn test_deserialize_malformed_fails() {
        let s = JsonSerializer;
        let err = s.deserialize("{not json").unwrap_err();
        assert!(matches!(err, TransportError::Deserialization(_)));
    }

    #[test]
    fn test_qserialize_is_stable_and_escaped() {
        let s = JsonSerializer;
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), "foo bar".to_string());
        params.insert("from".to_string(), "10".to_string());
        // BTreeMap iteration order is lexicographic, so the encoding is stable
        assert_eq!(s.qserialize(&params), "from=10&q=foo+bar");
    }

    #[test]
    fn test_qserialize_empty() {
        let s = JsonSerializer;
        assert_eq!(s.qserialize(&BTreeMap::new()), "");
    }
}
