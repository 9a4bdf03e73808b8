//! Canonical JSON encoding
//!
//! Every value written to world state goes through [`encode`]. Object keys
//! are emitted in byte order at every depth, arrays keep their order and no
//! whitespace is produced. Replicas that execute the same write therefore
//! compute byte-identical values.
//!
//! Keys are sorted here, not by `serde_json`'s map type, so enabling
//! `preserve_order` elsewhere in the build leaves the output unchanged.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value canonically
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| Error::Encoding(format!("unsupported value: {}", e)))?;
    encode_value(&value)
}

/// Encode a JSON value canonically
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_value(&mut out, value)?;
    Ok(out)
}

/// Decode canonical (or any valid) JSON bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Encoding(format!("malformed value: {}", e)))
}

/// Check whether `bytes` are already in canonical form
pub fn is_canonical(bytes: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => encode_value(&value).map(|b| b == bytes).unwrap_or(false),
        Err(_) => false,
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            serde_json::to_writer(&mut *out, value)?;
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(out, item)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [3, 1, 2]});
        let bytes = encode_value(&value).unwrap();
        assert_eq!(bytes, br#"{"a":[3,1,2],"b":{"a":2,"z":1}}"#.to_vec());
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let first: Value = serde_json::from_str(r#"{"x":1,"y":{"q":true,"p":null}}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"y":{"p":null,"q":true},"x":1}"#).unwrap();
        assert_eq!(encode_value(&first).unwrap(), encode_value(&second).unwrap());
    }

    #[test]
    fn test_reencode_is_stable() {
        let value = json!({"name": "Cert \"A\"", "level": 4, "tags": ["b", "a"]});
        let bytes = encode_value(&value).unwrap();
        let decoded: Value = decode(&bytes).unwrap();
        assert_eq!(encode_value(&decoded).unwrap(), bytes);
        assert!(is_canonical(&bytes));
    }

    #[test]
    fn test_whitespace_not_canonical() {
        assert!(!is_canonical(br#"{ "a": 1 }"#));
        assert!(!is_canonical(br#"{"b":1,"a":2}"#));
        assert!(!is_canonical(b"not json"));
    }

    #[test]
    fn test_unsupported_key_kind() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "pair");
        let err = encode(&map).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode::<Value>(b"{").unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }
}
