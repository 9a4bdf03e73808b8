//! Range scan cursor
//!
//! A [`RangeScan`] wraps whatever iterator the backing store produces and
//! exposes it as a forward-only cursor. It cannot be rewound: a fresh scan is
//! a fresh range request against the store.

use crate::{state::KeyValue, Result};
use serde_json::Value;
use std::fmt;
use std::iter::{FusedIterator, Peekable};

type Inner<'a> = Box<dyn Iterator<Item = Result<KeyValue>> + 'a>;

/// Lazy cursor over `(key, value)` pairs in ledger key order
pub struct RangeScan<'a> {
    inner: Peekable<Inner<'a>>,
    done: bool,
}

impl<'a> RangeScan<'a> {
    /// Wrap a store iterator
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<KeyValue>> + 'a,
    {
        let inner: Inner<'a> = Box::new(iter);
        Self {
            inner: inner.peekable(),
            done: false,
        }
    }

    /// Scan that yields nothing
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Whether another entry is available
    pub fn has_next(&mut self) -> bool {
        !self.done && self.inner.peek().is_some()
    }

    /// Move to the next entry
    pub fn advance(&mut self) -> Option<Result<ScanEntry>> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(item) => Some(item.map(|(key, value)| ScanEntry { key, value })),
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

impl FusedIterator for RangeScan<'_> {}

impl fmt::Debug for RangeScan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeScan").field("done", &self.done).finish()
    }
}

/// One scanned entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// World-state key
    pub key: String,
    /// Raw stored bytes
    pub value: Vec<u8>,
}

impl ScanEntry {
    /// Decode the value as JSON, falling back to the raw text
    ///
    /// Legacy entries that are not valid JSON are returned as a JSON string
    /// instead of failing the scan.
    pub fn decode(&self) -> Value {
        match serde_json::from_slice(&self.value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Entry is not JSON, returning raw value");
                Value::String(String::from_utf8_lossy(&self.value).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn entries() -> Vec<Result<KeyValue>> {
        vec![
            Ok(("a".to_string(), br#"{"n":1}"#.to_vec())),
            Ok(("b".to_string(), b"legacy text".to_vec())),
        ]
    }

    #[test]
    fn test_cursor_protocol() {
        let mut scan = RangeScan::new(entries().into_iter());
        assert!(scan.has_next());
        assert_eq!(scan.advance().unwrap().unwrap().key, "a");
        assert!(scan.has_next());
        assert_eq!(scan.advance().unwrap().unwrap().key, "b");
        assert!(!scan.has_next());
        assert!(scan.advance().is_none());
        assert!(scan.advance().is_none());
    }

    #[test]
    fn test_decode_fallback() {
        let decoded: Vec<Value> = RangeScan::new(entries().into_iter())
            .map(|entry| entry.unwrap().decode())
            .collect();
        assert_eq!(decoded, vec![json!({"n": 1}), json!("legacy text")]);
    }

    #[test]
    fn test_error_item_passes_through() {
        let items: Vec<Result<KeyValue>> = vec![Err(Error::Storage("disk".into()))];
        let mut scan = RangeScan::new(items.into_iter());
        assert!(matches!(scan.advance(), Some(Err(Error::Storage(_)))));
        assert!(!scan.has_next());
    }

    #[test]
    fn test_empty_scan() {
        let mut scan = RangeScan::empty();
        assert!(!scan.has_next());
        assert_eq!(scan.count(), 0);
    }
}
