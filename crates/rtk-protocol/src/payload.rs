//! Schema-free payload wrapper with typed path access.
//!
//! Adapter transforms read vendor payloads through dotted paths
//! (`"ENERGY.Voltage"`, `"sensors.0.value"`) instead of fixed structs,
//! so vendor schema churn stays inside profile configuration. Parse
//! failure is a recoverable state: the raw bytes remain available and
//! every accessor just reports absence.

use serde_json::Value;

/// Raw MQTT payload plus its lazily usable JSON tree.
#[derive(Debug, Clone)]
pub struct FlexiblePayload {
    raw: Vec<u8>,
    parsed: Option<Value>,
    parse_error: Option<String>,
}

impl FlexiblePayload {
    /// Wrap raw bytes, attempting a JSON parse. Never fails; on parse
    /// error the tree is absent and `last_error` records the cause.
    ///
    /// Duplicate keys in the input follow serde_json semantics: the
    /// last occurrence wins.
    pub fn parse(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => Self {
                raw,
                parsed: Some(value),
                parse_error: None,
            },
            Err(e) => Self {
                raw,
                parsed: None,
                parse_error: Some(e.to_string()),
            },
        }
    }

    /// Wrap an already-built JSON tree (used when synthesizing payloads).
    pub fn from_value(value: Value) -> Self {
        let raw = serde_json::to_vec(&value).unwrap_or_default();
        Self {
            raw,
            parsed: Some(value),
            parse_error: None,
        }
    }

    /// Original bytes as received, never rewritten.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whole parsed tree, if parsing succeeded.
    pub fn json(&self) -> Option<&Value> {
        self.parsed.as_ref()
    }

    /// True when the payload parsed as a JSON object.
    pub fn is_object(&self) -> bool {
        matches!(self.parsed, Some(Value::Object(_)))
    }

    /// Parse failure diagnostic, for logs only.
    pub fn last_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// Resolve a dotted path into the tree. A numeric segment indexes
    /// a list. Absent keys, type mismatches, and out-of-range indices
    /// all resolve to `None`.
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        let mut current = self.parsed.as_ref()?;
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_value(path)?.as_str()
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_value(path)?.as_f64()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get_value(path)?.as_bool()
    }

    pub fn get_array(&self, path: &str) -> Option<&Vec<Value>> {
        self.get_value(path)?.as_array()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_value(path).is_some()
    }

    /// New payload with `other`'s top-level keys overlaid on this one.
    /// Non-object sides are treated as empty.
    pub fn merge(&self, other: &Value) -> Self {
        let mut merged = match self.parsed.as_ref() {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(overlay) = other {
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
        }
        Self::from_value(Value::Object(merged))
    }
}
