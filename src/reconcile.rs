//! Join two independently extracted fragments of the same shipment.
//!
//! The primary side (invoice lines) is authoritative for price; the secondary
//! side (container or weighing records) for physical identifiers and weights.
//! A primary item matching several secondary items is fanned out into one
//! record per match, with its monetary value split by weight.

use crate::error::{MergeError, Result};
use crate::normalize::round_to;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// One field, or several fields whose values are concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinKey {
    Single(String),
    Composite(Vec<String>),
}

impl JoinKey {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Single(field) => vec![field.as_str()],
            Self::Composite(fields) => fields.iter().map(|f| f.as_str()).collect(),
        }
    }

    /// Join value of a record. Empty when any part is missing or blank.
    pub fn value(&self, record: &Record) -> String {
        let mut parts = Vec::new();
        for field in self.fields() {
            let part = record.get_str_or_default(field, "").trim().to_string();
            if part.is_empty() {
                return String::new();
            }
            parts.push(part);
        }
        parts.join("|")
    }

    fn present_on(&self, record: &Record) -> bool {
        self.fields().iter().any(|f| record.contains(f))
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields().join("+"))
    }
}

impl From<&str> for JoinKey {
    fn from(field: &str) -> Self {
        Self::Single(field.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingWeight {
    /// Any missing or unreadable weight makes the whole split equal.
    #[default]
    EqualSplit,
    TreatAsZero,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeWeight {
    #[default]
    Reject,
    TreatAsZero,
}

/// How unusable weights are handled. A zero total always splits equally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightPolicy {
    #[serde(default)]
    pub missing: MissingWeight,
    #[serde(default)]
    pub negative: NegativeWeight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSpec {
    pub primary_key: JoinKey,
    pub secondary_key: JoinKey,
    pub value_field: String,
    pub weight_field: String,
    #[serde(default)]
    pub weights: WeightPolicy,
    #[serde(default = "default_value_decimals")]
    pub value_decimals: u32,
}

fn default_value_decimals() -> u32 {
    2
}

impl ReconcileSpec {
    pub fn new(
        primary_key: impl Into<JoinKey>,
        secondary_key: impl Into<JoinKey>,
        value_field: &str,
        weight_field: &str,
    ) -> Self {
        Self {
            primary_key: primary_key.into(),
            secondary_key: secondary_key.into(),
            value_field: value_field.to_string(),
            weight_field: weight_field.to_string(),
            weights: WeightPolicy::default(),
            value_decimals: default_value_decimals(),
        }
    }

}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub matched_single: usize,
    pub matched_multi: usize,
    pub unmatched: usize,
    pub emitted: usize,
}

/// Split `total` across items in proportion to their weights.
///
/// Proportional shares are rounded to `decimals`; the equal-split fallback
/// (zero total weight, or a missing weight under [`MissingWeight::EqualSplit`])
/// is `total / n` unrounded.
pub fn allocate(
    total: f64,
    weights: &[Option<f64>],
    policy: &WeightPolicy,
    decimals: u32,
) -> Result<Vec<f64>> {
    let n = weights.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let equal = || vec![total / n as f64; n];

    let mut resolved = Vec::with_capacity(n);
    let mut saw_missing = false;
    for weight in weights {
        let w = match *weight {
            Some(w) if w < 0.0 => match policy.negative {
                NegativeWeight::Reject => {
                    return Err(MergeError::NegativeWeight {
                        join_value: String::new(),
                        weight: w,
                    })
                }
                NegativeWeight::TreatAsZero => 0.0,
            },
            Some(w) => w,
            None => {
                saw_missing = true;
                0.0
            }
        };
        resolved.push(w);
    }

    if saw_missing && policy.missing == MissingWeight::EqualSplit {
        return Ok(equal());
    }

    let sum: f64 = resolved.iter().sum();
    if sum <= 0.0 {
        return Ok(equal());
    }
    Ok(resolved
        .iter()
        .map(|w| round_to(w / sum * total, decimals))
        .collect())
}

pub fn reconcile(primary: Vec<Record>, secondary: &[Record], spec: &ReconcileSpec) -> Result<Vec<Record>> {
    reconcile_with_stats(primary, secondary, spec).map(|(records, _)| records)
}

/// Join primary items to secondary items and allocate values across fan-outs.
pub fn reconcile_with_stats(
    primary: Vec<Record>,
    secondary: &[Record],
    spec: &ReconcileSpec,
) -> Result<(Vec<Record>, ReconcileStats)> {
    check_key_present("primary", &spec.primary_key, &primary)?;
    check_key_present("secondary", &spec.secondary_key, secondary)?;

    let mut index: HashMap<String, Vec<&Record>> = HashMap::new();
    for item in secondary {
        let key = spec.secondary_key.value(item);
        if key.is_empty() {
            continue;
        }
        index.entry(key).or_default().push(item);
    }

    let mut stats = ReconcileStats::default();
    let mut out = Vec::with_capacity(primary.len());

    for item in primary {
        let key = spec.primary_key.value(&item);
        let matches = if key.is_empty() {
            None
        } else {
            index.get(&key)
        };

        match matches.map(|m| m.as_slice()) {
            None | Some([]) => {
                stats.unmatched += 1;
                out.push(item);
            }
            Some([only]) => {
                stats.matched_single += 1;
                let original = item.get(&spec.value_field).cloned();
                let mut merged = item;
                merged.overlay(only);
                restore(&mut merged, &spec.value_field, original);
                out.push(merged);
            }
            Some(many) => {
                stats.matched_multi += 1;
                out.extend(fan_out(&item, &key, many, spec)?);
            }
        }
    }

    stats.emitted = out.len();
    info!(
        "Reconciled on {} = {}: {} single, {} split, {} unmatched, {} emitted",
        spec.primary_key,
        spec.secondary_key,
        stats.matched_single,
        stats.matched_multi,
        stats.unmatched,
        stats.emitted
    );
    Ok((out, stats))
}

fn fan_out(
    item: &Record,
    key: &str,
    matches: &[&Record],
    spec: &ReconcileSpec,
) -> Result<Vec<Record>> {
    let original = item.get(&spec.value_field).cloned();
    let allocated = match item.get_f64(&spec.value_field) {
        Some(total) => {
            let weights: Vec<Option<f64>> = matches
                .iter()
                .map(|m| m.get_f64(&spec.weight_field))
                .collect();
            let shares = allocate(total, &weights, &spec.weights, spec.value_decimals).map_err(
                |e| match e {
                    MergeError::NegativeWeight { weight, .. } => MergeError::NegativeWeight {
                        join_value: key.to_string(),
                        weight,
                    },
                    other => other,
                },
            )?;
            debug!("Split {} across {} items for '{}': {:?}", total, matches.len(), key, shares);
            Some(shares)
        }
        None => {
            warn!(
                "'{}' on '{}' is not numeric; kept on the first of {} split items, null on the rest",
                spec.value_field,
                key,
                matches.len()
            );
            None
        }
    };

    Ok(matches
        .iter()
        .enumerate()
        .map(|(i, secondary)| {
            let mut record = item.clone();
            record.overlay(secondary);
            match &allocated {
                Some(shares) => record.set(spec.value_field.clone(), shares[i]),
                // An unreadable total cannot be split. Carrying it once keeps a
                // downstream sum from counting it N times; the nulls mark the
                // remaining rows as unallocated.
                None if i == 0 => restore(&mut record, &spec.value_field, original.clone()),
                None => record.set(spec.value_field.clone(), Value::Null),
            }
            record
        })
        .collect())
}

fn restore(record: &mut Record, field: &str, original: Option<Value>) {
    match original {
        Some(value) => record.set(field, value),
        None => {
            record.remove(field);
        }
    }
}

fn check_key_present(side: &'static str, key: &JoinKey, items: &[Record]) -> Result<()> {
    if !items.is_empty() && !items.iter().any(|r| key.present_on(r)) {
        return Err(MergeError::UnknownJoinKey {
            side,
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn spec() -> ReconcileSpec {
        ReconcileSpec::new("key", "key", "value_field", "weight")
    }

    #[test]
    fn test_proportional_split() {
        let primary = vec![rec(json!({"key": "INV1", "value_field": 100.0}))];
        let secondary = vec![
            rec(json!({"key": "INV1", "weight": 30})),
            rec(json!({"key": "INV1", "weight": 70})),
        ];
        let out = reconcile(primary, &secondary, &spec()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_f64("value_field"), Some(30.0));
        assert_eq!(out[1].get_f64("value_field"), Some(70.0));
        assert_eq!(out[0].get_f64("weight"), Some(30.0));
    }

    #[test]
    fn test_zero_weights_split_equally() {
        let primary = vec![rec(json!({"key": "INV1", "value_field": 100.0}))];
        let secondary = vec![
            rec(json!({"key": "INV1", "weight": 0})),
            rec(json!({"key": "INV1", "weight": 0})),
        ];
        let out = reconcile(primary, &secondary, &spec()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_f64("value_field"), Some(50.0));
        assert_eq!(out[1].get_f64("value_field"), Some(50.0));
    }

    #[test]
    fn test_equal_split_is_unrounded() {
        let shares = allocate(100.0, &[Some(0.0); 3], &WeightPolicy::default(), 2).unwrap();
        assert_eq!(shares, vec![100.0 / 3.0; 3]);
    }

    #[test]
    fn test_allocation_sums_to_parent_within_rounding() {
        let weights = [Some(1.0), Some(1.0), Some(1.0), Some(2.5)];
        let shares = allocate(1234.57, &weights, &WeightPolicy::default(), 2).unwrap();
        let sum: f64 = shares.iter().sum();
        assert!((sum - 1234.57).abs() <= weights.len() as f64 * 0.01);
    }

    #[test]
    fn test_missing_weight_policies() {
        let weights = [Some(30.0), None];
        let equal = allocate(100.0, &weights, &WeightPolicy::default(), 2).unwrap();
        assert_eq!(equal, vec![50.0, 50.0]);

        let zero = WeightPolicy {
            missing: MissingWeight::TreatAsZero,
            ..Default::default()
        };
        let shares = allocate(100.0, &weights, &zero, 2).unwrap();
        assert_eq!(shares, vec![100.0, 0.0]);
    }

    #[test]
    fn test_negative_weight_rejected_with_join_value() {
        let primary = vec![rec(json!({"key": "INV9", "value_field": 10}))];
        let secondary = vec![
            rec(json!({"key": "INV9", "weight": -1})),
            rec(json!({"key": "INV9", "weight": 5})),
        ];
        let err = reconcile(primary, &secondary, &spec()).unwrap_err();
        match err {
            MergeError::NegativeWeight { join_value, weight } => {
                assert_eq!(join_value, "INV9");
                assert_eq!(weight, -1.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_negative_weight_treated_as_zero() {
        let policy = WeightPolicy {
            negative: NegativeWeight::TreatAsZero,
            ..Default::default()
        };
        let shares = allocate(10.0, &[Some(-1.0), Some(5.0)], &policy, 2).unwrap();
        assert_eq!(shares, vec![0.0, 10.0]);
    }

    #[test]
    fn test_unmatched_passes_through() {
        let original = rec(json!({"key": "INV2", "value_field": 55.5, "extra": "keep"}));
        let secondary = vec![rec(json!({"key": "INV1", "weight": 1}))];
        let out = reconcile(vec![original.clone()], &secondary, &spec()).unwrap();
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn test_single_match_overlays_but_keeps_value() {
        let primary = vec![rec(json!({"key": "INV1", "value_field": 80, "desc": "pallets"}))];
        let secondary = vec![rec(json!({
            "key": "INV1", "weight": 12, "container": "MSKU1234567",
            "value_field": 999, "desc": "from cmr"
        }))];
        let out = reconcile(primary, &secondary, &spec()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("value_field"), Some(&json!(80)));
        assert_eq!(out[0].get_str_or_default("container", ""), "MSKU1234567");
        assert_eq!(out[0].get_str_or_default("desc", ""), "from cmr");
    }

    #[test]
    fn test_output_order_is_contiguous_per_primary() {
        let primary = vec![
            rec(json!({"key": "A", "value_field": 10})),
            rec(json!({"key": "B", "value_field": 20})),
            rec(json!({"key": "C", "value_field": 30})),
        ];
        let secondary = vec![
            rec(json!({"key": "B", "weight": 1, "n": 1})),
            rec(json!({"key": "A", "weight": 1, "n": 2})),
            rec(json!({"key": "B", "weight": 3, "n": 3})),
        ];
        let (out, stats) = reconcile_with_stats(primary, &secondary, &spec()).unwrap();
        let keys: Vec<String> = out.iter().map(|r| r.get_str_or_default("key", "")).collect();
        assert_eq!(keys, vec!["A", "B", "B", "C"]);
        assert_eq!(out[1].get_f64("n"), Some(1.0));
        assert_eq!(out[2].get_f64("n"), Some(3.0));
        assert_eq!(out[1].get_f64("value_field"), Some(5.0));
        assert_eq!(out[2].get_f64("value_field"), Some(15.0));
        assert_eq!(
            stats,
            ReconcileStats { matched_single: 1, matched_multi: 1, unmatched: 1, emitted: 4 }
        );
    }

    #[test]
    fn test_composite_join_key() {
        let spec = ReconcileSpec::new(
            JoinKey::Composite(vec!["Batch".into(), "DN Number".into()]),
            JoinKey::Composite(vec!["Batch".into(), "DN Number".into()]),
            "Value",
            "Net",
        );
        let primary = vec![
            rec(json!({"Batch": "B1", "DN Number": 8001, "Value": "1.000,00"})),
            rec(json!({"Batch": "B1", "Value": 5})),
        ];
        let secondary = vec![
            rec(json!({"Batch": "B1", "DN Number": "8001", "Net": "250"})),
            rec(json!({"Batch": "B1", "DN Number": "8001", "Net": "750"})),
            rec(json!({"Batch": "B1", "Net": "1"})),
        ];
        let out = reconcile(primary, &secondary, &spec).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_f64("Value"), Some(250.0));
        assert_eq!(out[1].get_f64("Value"), Some(750.0));
        // Incomplete composite keys never join.
        assert_eq!(out[2].get_f64("Value"), Some(5.0));
        assert!(!out[2].contains("Net"));
    }

    #[test]
    fn test_non_numeric_value_carried_once_on_fan_out() {
        let primary = vec![rec(json!({"key": "INV1", "value_field": "see annex"}))];
        let secondary = vec![
            rec(json!({"key": "INV1", "weight": 1})),
            rec(json!({"key": "INV1", "weight": 2})),
            rec(json!({"key": "INV1", "weight": 3})),
        ];
        let out = reconcile(primary, &secondary, &spec()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_str_or_default("value_field", ""), "see annex");
        assert_eq!(out[1].get("value_field"), Some(&Value::Null));
        assert_eq!(out[2].get("value_field"), Some(&Value::Null));
    }

    #[test]
    fn test_negative_weight_rejected_regardless_of_missing_position() {
        let policy = WeightPolicy::default();
        let missing_first = allocate(100.0, &[None, Some(-5.0)], &policy, 2);
        let negative_first = allocate(100.0, &[Some(-5.0), None], &policy, 2);
        assert!(matches!(missing_first, Err(MergeError::NegativeWeight { weight, .. }) if weight == -5.0));
        assert!(matches!(negative_first, Err(MergeError::NegativeWeight { weight, .. }) if weight == -5.0));
    }

    #[test]
    fn test_missing_weight_before_negative_in_reconcile() {
        let primary = vec![rec(json!({"key": "INV3", "value_field": 90}))];
        let secondary = vec![
            rec(json!({"key": "INV3"})),
            rec(json!({"key": "INV3", "weight": -2})),
        ];
        let err = reconcile(primary, &secondary, &spec()).unwrap_err();
        assert!(matches!(err, MergeError::NegativeWeight { ref join_value, .. } if join_value == "INV3"));
    }

    #[test]
    fn test_missing_weight_with_negative_treated_as_zero_splits_equally() {
        let policy = WeightPolicy {
            negative: NegativeWeight::TreatAsZero,
            ..Default::default()
        };
        let shares = allocate(100.0, &[None, Some(-5.0)], &policy, 2).unwrap();
        assert_eq!(shares, vec![50.0, 50.0]);
    }

    #[test]
    fn test_unknown_join_key_is_configuration_error() {
        let primary = vec![rec(json!({"invoice": "INV1"}))];
        let secondary = vec![rec(json!({"key": "INV1"}))];
        let err = reconcile(primary, &secondary, &spec()).unwrap_err();
        assert!(matches!(err, MergeError::UnknownJoinKey { side: "primary", .. }));
    }

    #[test]
    fn test_empty_sides() {
        assert!(reconcile(Vec::new(), &[], &spec()).unwrap().is_empty());
        let primary = vec![rec(json!({"key": "INV1", "value_field": 1}))];
        let out = reconcile(primary.clone(), &[], &spec()).unwrap();
        assert_eq!(out, primary);
    }

    #[test]
    fn test_spec_deserializes_single_and_composite_keys() {
        let spec: ReconcileSpec = serde_json::from_value(json!({
            "primary_key": "invoice_number",
            "secondary_key": ["other_reference", "line"],
            "value_field": "Amount",
            "weight_field": "Gross",
            "weights": {"negative": "treat_as_zero"}
        }))
        .unwrap();
        assert_eq!(spec.primary_key, JoinKey::Single("invoice_number".into()));
        assert_eq!(spec.secondary_key.fields(), vec!["other_reference", "line"]);
        assert_eq!(spec.weights.missing, MissingWeight::EqualSplit);
        assert_eq!(spec.weights.negative, NegativeWeight::TreatAsZero);
        assert_eq!(spec.value_decimals, 2);
    }
}
