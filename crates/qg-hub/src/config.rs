//! # Hub Configuration
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty or missing file yields a working configuration. A file that exists
//! but does not parse or validate is fatal.

use qg_core::{CostModel, HeuristicExtractor};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialSeed>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_realtime_threshold")]
    pub realtime_threshold_secs: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            realtime_threshold_secs: default_realtime_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalsConfig {
    #[serde(default = "default_indexed_columns")]
    pub indexed_columns: Vec<String>,
    #[serde(default = "default_projection_cost")]
    pub projection_cost_secs: f64,
    #[serde(default = "default_join_cost")]
    pub join_cost_secs: f64,
    #[serde(default = "default_aggregation_cost")]
    pub aggregation_cost_secs: f64,
    #[serde(default = "default_insert_cost")]
    pub insert_cost_secs: f64,
    #[serde(default = "default_unknown_cost")]
    pub unknown_cost_secs: f64,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            indexed_columns: default_indexed_columns(),
            projection_cost_secs: default_projection_cost(),
            join_cost_secs: default_join_cost(),
            aggregation_cost_secs: default_aggregation_cost(),
            insert_cost_secs: default_insert_cost(),
            unknown_cost_secs: default_unknown_cost(),
        }
    }
}

impl SignalsConfig {
    pub fn cost_model(&self) -> CostModel {
        CostModel {
            projection_secs: self.projection_cost_secs,
            join_secs: self.join_cost_secs,
            aggregation_secs: self.aggregation_cost_secs,
            insert_secs: self.insert_cost_secs,
            unknown_secs: self.unknown_cost_secs,
        }
    }

    pub fn extractor(&self) -> HeuristicExtractor {
        HeuristicExtractor::new(self.indexed_columns.clone(), self.cost_model())
    }
}

/// A sensitivity label and the roles allowed to read it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LabelRule {
    pub name: String,
    /// An empty list means nobody may read the label.
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    #[serde(default = "default_labels")]
    pub labels: Vec<LabelRule>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntegrationsConfig {
    /// Integrations every enterprise needs an active credential for.
    #[serde(default = "default_required_integrations")]
    pub required: Vec<String>,
    /// Per-enterprise lists. An entry replaces `required` for that enterprise.
    #[serde(default)]
    pub enterprises: HashMap<String, Vec<String>>,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            required: default_required_integrations(),
            enterprises: HashMap::new(),
        }
    }
}

impl IntegrationsConfig {
    pub fn required_for(&self, enterprise: &str) -> &[String] {
        self.enterprises
            .get(enterprise)
            .map(Vec::as_slice)
            .unwrap_or(&self.required)
    }
}

/// A credential registered at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialSeed {
    pub enterprise: String,
    pub service: String,
    pub token: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

fn default_realtime_threshold() -> f64 {
    qg_core::policy::DEFAULT_REALTIME_THRESHOLD_SECS
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_indexed_columns() -> Vec<String> {
    vec!["id".into()]
}
fn default_projection_cost() -> f64 {
    CostModel::default().projection_secs
}
fn default_join_cost() -> f64 {
    CostModel::default().join_secs
}
fn default_aggregation_cost() -> f64 {
    CostModel::default().aggregation_secs
}
fn default_insert_cost() -> f64 {
    CostModel::default().insert_secs
}
fn default_unknown_cost() -> f64 {
    CostModel::default().unknown_secs
}
fn default_labels() -> Vec<LabelRule> {
    vec![LabelRule {
        name: "highly_confidential".into(),
        roles: vec!["Admin".into()],
    }]
}
fn default_required_integrations() -> Vec<String> {
    vec!["Salesforce".into(), "Zendesk".into()]
}
fn default_true() -> bool {
    true
}
fn default_max_connections() -> usize {
    16
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_audit_capacity() -> usize {
    1000
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{} must be a finite, non-negative number (got {})",
                    name, value
                )))
            }
        };
        let positive = |name: &str, value: u64| {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be positive", name)))
            }
        };

        non_negative(
            "admission.realtime_threshold_secs",
            self.admission.realtime_threshold_secs,
        )?;
        non_negative("signals.projection_cost_secs", self.signals.projection_cost_secs)?;
        non_negative("signals.join_cost_secs", self.signals.join_cost_secs)?;
        non_negative(
            "signals.aggregation_cost_secs",
            self.signals.aggregation_cost_secs,
        )?;
        non_negative("signals.insert_cost_secs", self.signals.insert_cost_secs)?;
        non_negative("signals.unknown_cost_secs", self.signals.unknown_cost_secs)?;

        positive("cache.ttl_secs", self.cache.ttl_secs)?;
        positive("cache.sweep_interval_secs", self.cache.sweep_interval_secs)?;
        positive("executor.max_connections", self.executor.max_connections as u64)?;
        positive("executor.timeout_ms", self.executor.timeout_ms)?;
        positive("audit.capacity", self.audit.capacity as u64)?;

        if let Some(rule) = self.access.labels.iter().find(|l| l.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "access label with empty name (roles {:?})",
                rule.roles
            )));
        }
        if let Some(seed) = self.credentials.iter().find(|c| c.token.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "credential for {}/{} has an empty token",
                seed.enterprise, seed.service
            )));
        }
        Ok(())
    }
}
