//! Extra parameters forwarded to readers and writers.
//!
//! Dispatch is format-agnostic, so per-call options travel as an open-ended
//! JSON map rather than as typed arguments.  Each format documents the keys
//! it honors and ignores the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An open-ended `key → JSON value` option map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extras(Map<String, Value>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key)?.as_u64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `key=value` pair as produced by the CLI's `--opt` flag.
    ///
    /// The value side is interpreted as JSON when it parses (`true`, `42`,
    /// `"quoted"`), and taken as a plain string otherwise.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), String> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
        if key.is_empty() {
            return Err(format!("empty key in '{pair}'"));
        }
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        self.0.insert(key.to_string(), value);
        Ok(())
    }
}
