//! Address-similarity grouping of invoices and their merge into one record per group.
//!
//! Records are assigned greedily in input order: each one joins the first
//! existing group whose representative address compares at or above the
//! threshold, otherwise it opens a new group. Multi-member groups are then
//! collapsed into a single merged record.

use crate::address::AddressKey;
use crate::error::{MergeError, Result};
use crate::normalize::round_to;
use crate::record::Record;
use crate::similarity::{ScorerKind, SimilarityScorer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// What to do with a record that carries no address at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyAddressPolicy {
    /// Join the first group created so far (or open one if none exists).
    #[default]
    MergeIntoFirst,
    /// Address-less records only group with each other.
    KeepSeparate,
}

/// Field vocabulary and thresholds for one client's invoice grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingRules {
    #[serde(default = "default_address_field")]
    pub address_field: String,
    /// Scalar identifiers joined with `" + "` when members disagree.
    #[serde(default = "default_identifier_fields")]
    pub identifier_fields: Vec<String>,
    /// Numeric totals summed across members.
    #[serde(default = "default_sum_fields")]
    pub sum_fields: Vec<String>,
    /// Line-item lists concatenated across members.
    #[serde(default = "default_list_fields")]
    pub list_fields: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub empty_address: EmptyAddressPolicy,
    #[serde(default)]
    pub scorer: ScorerKind,
    #[serde(default = "default_sum_decimals")]
    pub sum_decimals: u32,
}

fn default_address_field() -> String {
    "Address".to_string()
}

fn default_identifier_fields() -> Vec<String> {
    vec!["Reference".to_string()]
}

fn default_sum_fields() -> Vec<String> {
    vec![
        "Gross weight".to_string(),
        "Net weight".to_string(),
        "Total".to_string(),
    ]
}

fn default_list_fields() -> Vec<String> {
    vec!["Items".to_string()]
}

fn default_threshold() -> f64 {
    0.8
}

fn default_sum_decimals() -> u32 {
    2
}

impl Default for GroupingRules {
    fn default() -> Self {
        Self {
            address_field: default_address_field(),
            identifier_fields: default_identifier_fields(),
            sum_fields: default_sum_fields(),
            list_fields: default_list_fields(),
            threshold: default_threshold(),
            empty_address: EmptyAddressPolicy::default(),
            scorer: ScorerKind::default(),
            sum_decimals: default_sum_decimals(),
        }
    }
}

impl GroupingRules {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_empty_address(mut self, policy: EmptyAddressPolicy) -> Self {
        self.empty_address = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(MergeError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Records whose addresses compared similar to the first-seen `key`.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: String,
    pub members: Vec<Record>,
}

/// Accumulator threaded through the grouping fold.
#[derive(Debug, Default)]
struct Groups {
    groups: Vec<Group>,
}

impl Groups {
    fn assign(
        mut self,
        record: Record,
        rules: &GroupingRules,
        scorer: &dyn SimilarityScorer,
    ) -> Self {
        let key = AddressKey::from_record(&record, &rules.address_field).comparison_string();

        let matched = self
            .groups
            .iter()
            .position(|g| similar(scorer, &key, &g.key) >= rules.threshold);

        let target = match matched {
            Some(idx) => Some(idx),
            None if key.is_empty()
                && rules.empty_address == EmptyAddressPolicy::MergeIntoFirst
                && !self.groups.is_empty() =>
            {
                Some(0)
            }
            None => None,
        };

        match target {
            Some(idx) => {
                debug!(
                    "Address '{}' joins group '{}' (now {} members)",
                    key,
                    self.groups[idx].key,
                    self.groups[idx].members.len() + 1
                );
                self.groups[idx].members.push(record);
            }
            None => self.groups.push(Group {
                key,
                members: vec![record],
            }),
        }
        self
    }
}

/// An empty key never resembles a populated one, whatever the scorer says.
fn similar(scorer: &dyn SimilarityScorer, a: &str, b: &str) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => scorer.similarity(a, b),
    }
}

/// Partition records into address-similarity groups, in order of creation.
pub fn group(
    records: Vec<Record>,
    rules: &GroupingRules,
    scorer: &dyn SimilarityScorer,
) -> Result<Vec<Group>> {
    rules.validate()?;
    let groups = records
        .into_iter()
        .fold(Groups::default(), |acc, record| acc.assign(record, rules, scorer));
    Ok(groups.groups)
}

/// Group records by address similarity and collapse each group to one record.
pub fn group_and_merge(
    records: Vec<Record>,
    rules: &GroupingRules,
    scorer: &dyn SimilarityScorer,
) -> Result<Vec<Record>> {
    let input_len = records.len();
    let groups = group(records, rules, scorer)?;

    let merged: Vec<Record> = groups
        .into_iter()
        .map(|g| merge_members(g.members, rules))
        .collect();

    info!(
        "Grouped {} record(s) into {} (threshold={}, scorer={})",
        input_len,
        merged.len(),
        rules.threshold,
        scorer.name()
    );
    Ok(merged)
}

/// Collapse a group into one record. Fields outside the rules come from the
/// first member that carries a non-blank value for them.
pub fn merge_members(members: Vec<Record>, rules: &GroupingRules) -> Record {
    if members.len() == 1 {
        return members.into_iter().next().unwrap_or_default();
    }
    let Some(first) = members.first() else {
        return Record::new();
    };
    let mut merged = first.clone();
    for later in &members[1..] {
        merged.fill_blanks(later);
    }

    for field in &rules.identifier_fields {
        if !members.iter().any(|m| m.contains(field)) {
            continue;
        }
        let mut distinct: Vec<String> = Vec::new();
        for member in &members {
            let value = member.get_str_or_default(field, "").trim().to_string();
            if !value.is_empty() && !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        if distinct.len() > 1 {
            merged.set(field.clone(), distinct.join(" + "));
        } else if let Some(single) = distinct.pop() {
            merged.set(field.clone(), single);
        }
    }

    for field in &rules.sum_fields {
        if !members.iter().any(|m| m.contains(field)) {
            continue;
        }
        let total: f64 = members.iter().map(|m| m.get_f64_or_default(field, 0.0)).sum();
        merged.set(field.clone(), round_to(total, rules.sum_decimals));
    }

    for field in &rules.list_fields {
        if !members.iter().any(|m| m.contains(field)) {
            continue;
        }
        let items: Vec<Value> = members.iter().flat_map(|m| m.get_list(field)).collect();
        merged.set(field.clone(), Value::Array(items));
    }

    debug!("Merged {} records into one", members.len());
    merged
}
