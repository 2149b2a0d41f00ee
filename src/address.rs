//! Address key derivation for similarity grouping.

use crate::normalize::{comparison_text, value_to_text};
use crate::record::Record;
use serde_json::{Map, Value};

const OBJECT_KEYS: [&[&str]; 5] = [
    &["company", "name"],
    &["street"],
    &["city"],
    &["postal_code", "postcode", "zip"],
    &["country"],
];

/// Company, street, city, postal code and country of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressKey {
    pub company: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl AddressKey {
    /// Read the address stored under `field`.
    ///
    /// Accepts either an array (first five elements, missing ones empty) or an
    /// object with named parts. Anything else yields an empty key.
    pub fn from_record(record: &Record, field: &str) -> Self {
        match record.get(field) {
            Some(Value::Array(parts)) => Self::from_parts(parts),
            Some(Value::Object(map)) => Self::from_object(map),
            _ => Self::default(),
        }
    }

    fn from_parts(parts: &[Value]) -> Self {
        let part = |i: usize| {
            parts
                .get(i)
                .and_then(value_to_text)
                .unwrap_or_default()
        };
        Self {
            company: part(0),
            street: part(1),
            city: part(2),
            postal_code: part(3),
            country: part(4),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let part = |i: usize| {
            OBJECT_KEYS[i]
                .iter()
                .find_map(|key| map.get(*key).and_then(value_to_text))
                .unwrap_or_default()
        };
        Self {
            company: part(0),
            street: part(1),
            city: part(2),
            postal_code: part(3),
            country: part(4),
        }
    }

    /// Lowercased, space-joined concatenation of the five parts.
    pub fn comparison_string(&self) -> String {
        let joined = [
            &self.company,
            &self.street,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ");
        comparison_text(&joined)
    }

    pub fn is_empty(&self) -> bool {
        self.comparison_string().is_empty()
    }
}
