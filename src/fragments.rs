//! Collapse partial extractions of the same document.
//!
//! Container lists and packing lists often come back from extraction in
//! several pieces (one per page or per LLM chunk), each repeating the shared
//! identifier and filling in a different subset of fields.

use crate::record::Record;
use crate::reconcile::JoinKey;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Merge records that share a non-empty `key` value.
///
/// The first non-blank value of each scalar field wins; `list_fields` are
/// concatenated. Records with an empty key pass through untouched. Output
/// order follows the first appearance of each key.
pub fn collect_by_key(records: Vec<Record>, key: &JoinKey, list_fields: &[String]) -> Vec<Record> {
    let input_len = records.len();
    let mut out: Vec<Record> = Vec::new();
    let mut slot_by_key: HashMap<String, usize> = HashMap::new();

    for record in records {
        let value = key.value(&record);
        if value.is_empty() {
            out.push(record);
            continue;
        }
        match slot_by_key.get(&value) {
            Some(&slot) => absorb(&mut out[slot], &record, list_fields),
            None => {
                slot_by_key.insert(value, out.len());
                out.push(record);
            }
        }
    }

    debug!(
        "Collected {} fragment(s) into {} record(s) on key {}",
        input_len,
        out.len(),
        key
    );
    out
}

fn absorb(target: &mut Record, fragment: &Record, list_fields: &[String]) {
    for field in list_fields {
        if fragment.contains(field) {
            let mut items = target.get_list(field);
            items.extend(fragment.get_list(field));
            target.set(field.clone(), Value::Array(items));
        }
    }
    target.fill_blanks(fragment);
}
