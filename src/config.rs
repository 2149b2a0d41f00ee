//! Per-client pipeline profiles.
//!
//! Each freight client has its own field vocabulary and thresholds. Profiles
//! are JSON files in the config directory; when none are found the built-in
//! `default` profile is used. The in-memory store is backed by `RwLock`.

use crate::grouping::GroupingRules;
use crate::reconcile::{JoinKey, ReconcileSpec};
use crate::similarity::ScorerKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_DIR: &str = "configs";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Grouping, reconciliation and fragment rules for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub grouping: GroupingRules,
    #[serde(default)]
    pub reconcile: Option<ReconcileSpec>,
    /// Key shared by fragments of one container / packing-list entry.
    #[serde(default)]
    pub fragment_key: Option<JoinKey>,
    #[serde(default)]
    pub fragment_list_fields: Vec<String>,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default)]
    pub duplicate_scorer: ScorerKind,
}

fn default_duplicate_threshold() -> f64 {
    0.85
}

/// Process-level settings read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: String,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            config_dir: std::env::var("SHIPMENT_MERGE_CONFIG_DIR")
                .unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string()),
            bind_addr: std::env::var("SHIPMENT_MERGE_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    configs: RwLock<HashMap<String, PipelineConfig>>,
}

impl ConfigStore {
    /// Load every `*.json` profile in `dir`, falling back to the built-in default.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut configs = HashMap::new();

        if dir.exists() {
            for entry in std::fs::read_dir(dir)
                .with_context(|| format!("Failed to list config dir: {:?}", dir))?
            {
                let path = entry?.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read config: {:?}", path))?;
                    let config: PipelineConfig = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse config: {:?}", path))?;
                    info!("Loaded config: {} from {:?}", config.name, path);
                    configs.insert(config.name.clone(), config);
                }
            }
        }

        if configs.is_empty() {
            warn!("No configs found in {:?}; using built-in default", dir);
            let default = create_default_config();
            configs.insert(default.name.clone(), default);
        }

        Ok(Self {
            configs: RwLock::new(configs),
        })
    }

    pub fn from_configs(configs: Vec<PipelineConfig>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.name.clone(), c)).collect()),
        }
    }

    pub fn get(&self, name: &str) -> Option<PipelineConfig> {
        self.configs.read().unwrap().get(name).cloned()
    }

    /// Sorted profile names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn insert(&self, config: PipelineConfig) {
        self.configs
            .write()
            .unwrap()
            .insert(config.name.clone(), config);
    }
}

/// Generic invoice / packing-list profile.
pub fn create_default_config() -> PipelineConfig {
    PipelineConfig {
        name: "default".to_string(),
        description: "Invoice grouping by consignee address, invoice/CMR reconciliation"
            .to_string(),
        grouping: GroupingRules::default(),
        reconcile: Some(ReconcileSpec::new(
            "invoice_number",
            "other_reference",
            "Total",
            "Gross weight",
        )),
        fragment_key: Some(JoinKey::Single("Container".to_string())),
        fragment_list_fields: vec!["Items".to_string()],
        duplicate_threshold: default_duplicate_threshold(),
        duplicate_scorer: ScorerKind::default(),
    }
}
