//! Run configuration, loadable from TOML.
//!
//! ```toml
//! min_support = 0.05
//! min_confidence = 0.8
//! partition_count = 5
//! sampling_policy = "bernoulli"
//! algorithm = "closure"
//! rules = "cover_opt"
//!
//! [index]
//! leaf_capacity = 20
//! hash_width = 40
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::association_rules::{RuleConstraints, RuleKind};
use crate::common::validate_fraction;
use crate::error::{MiningError, Result};
use crate::miner::MinerKind;
use crate::sampler::SamplingPolicy;
use crate::subset_index::{DEFAULT_HASH_WIDTH, DEFAULT_LEAF_CAPACITY};

/// Shape of the hash trees used for candidate counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Itemsets a leaf holds before it splits.
    pub leaf_capacity: usize,
    /// Initial number of buckets per interior node.
    pub hash_width: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig { leaf_capacity: DEFAULT_LEAF_CAPACITY, hash_width: DEFAULT_HASH_WIDTH }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub min_support: f64,
    pub min_confidence: f64,
    pub partition_count: usize,
    /// Slack added on both sides of an aggregated estimate.
    pub epsilon_slack: f64,
    pub sampling_policy: SamplingPolicy,
    /// Expected rows per partition; defaults to `rows / partition_count`.
    pub sample_size: Option<u64>,
    pub seed: Option<u64>,
    /// Quorum override; defaults to a strict majority of partitions.
    pub required_count: Option<usize>,
    pub algorithm: MinerKind,
    /// Rule generation runs only when set.
    pub rules: Option<RuleKind>,
    pub rule_constraints: RuleConstraints,
    pub max_len: Option<usize>,
    pub index: IndexConfig,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            min_support: 0.1,
            min_confidence: 0.8,
            partition_count: 1,
            epsilon_slack: 0.02,
            sampling_policy: SamplingPolicy::default(),
            sample_size: None,
            seed: None,
            required_count: None,
            algorithm: MinerKind::default(),
            rules: None,
            rule_constraints: RuleConstraints::default(),
            max_len: None,
            index: IndexConfig::default(),
        }
    }
}

impl MiningConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MiningConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        validate_fraction("min_support", self.min_support)?;
        validate_fraction("min_confidence", self.min_confidence)?;
        if self.partition_count == 0 {
            return Err(MiningError::invalid("partition_count must be at least 1"));
        }
        if !(self.epsilon_slack >= 0.0) || !self.epsilon_slack.is_finite() {
            return Err(MiningError::invalid(format!("epsilon_slack must be >= 0, got {}", self.epsilon_slack)));
        }
        if self.sample_size == Some(0) {
            return Err(MiningError::invalid("sample_size must be at least 1"));
        }
        if let Some(rc) = self.required_count {
            if rc == 0 || rc > self.partition_count {
                return Err(MiningError::invalid(format!(
                    "required_count must be in 1..={}, got {}",
                    self.partition_count, rc
                )));
            }
        }
        if self.max_len == Some(0) {
            return Err(MiningError::invalid("max_len must be at least 1"));
        }
        if self.index.leaf_capacity == 0 || self.index.hash_width == 0 {
            return Err(MiningError::invalid("index leaf_capacity and hash_width must be positive"));
        }
        if let Some(kind) = self.rules {
            if kind != RuleKind::Apriori && !self.rule_constraints.is_unconstrained() {
                return Err(MiningError::invalid("rule constraints require apriori rule generation"));
            }
        }
        Ok(())
    }
}
