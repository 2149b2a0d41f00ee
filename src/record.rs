//! Typed wrapper around one extracted document.
//!
//! A [`Record`] is whatever the OCR or LLM step produced: a JSON object whose
//! field vocabulary belongs to the caller. Every accessor states its defaulting
//! policy at the call site, so absent or malformed fields never panic.

use crate::normalize::{value_to_f64, value_to_text};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON value. Non-object values yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Scalar field as text; null, absent and structured values give `default`.
    pub fn get_str_or_default(&self, field: &str, default: &str) -> String {
        self.fields
            .get(field)
            .and_then(value_to_text)
            .unwrap_or_else(|| default.to_string())
    }

    /// Field read as a number, if it holds one (JSON number or parseable text).
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(value_to_f64)
    }

    pub fn get_f64_or_default(&self, field: &str, default: f64) -> f64 {
        self.get_f64(field).unwrap_or(default)
    }

    /// List-valued field; absent or non-array values read as empty.
    pub fn get_list(&self, field: &str) -> Vec<Value> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// True when the field is absent, null, blank text or an empty list.
    pub fn is_blank(&self, field: &str) -> bool {
        match self.fields.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Copy every field of `other` onto `self`; `other` wins on conflict.
    pub fn overlay(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Copy fields of `other` that are blank or absent on `self`; `self` wins
    /// wherever it already holds a value.
    pub fn fill_blanks(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            if self.is_blank(key) && !other.is_blank(key) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }
}
