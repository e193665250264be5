//! In-process run of the partitioned mining flow.
//!
//! 1. The sampler maps every database row onto the partitions.
//! 2. Each partition is mined on its own rayon task, with optional rule
//!    generation on the local result.
//! 3. Local frequencies are grouped by itemset (`LocalShuffle`).
//! 4. Groups reaching the quorum are aggregated into global estimates.

use ahash::AHashMap;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::aggregate::{GlobalAggregator, GlobalEstimate};
use crate::association_rules::AssociationRule;
use crate::cancel::CancellationToken;
use crate::config::MiningConfig;
use crate::error::{Outcome, Result};
use crate::io::{MemorySource, TransactionSource};
use crate::itemset::{Item, Itemset};
use crate::miner::MiningStats;
use crate::sampler::PartitionSampler;
use crate::store::FrequentItemsetStore;

/// Groups local frequency estimates by itemset.
#[derive(Debug, Default)]
pub struct LocalShuffle {
    groups: AHashMap<Itemset, Vec<f64>>,
}

impl LocalShuffle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, itemset: &Itemset, estimate: f64) {
        match self.groups.get_mut(itemset) {
            Some(estimates) => estimates.push(estimate),
            None => {
                self.groups.insert(itemset.clone(), vec![estimate]);
            }
        }
    }

    /// Emit the support of every itemset in `store`.
    pub fn emit_store(&mut self, store: &FrequentItemsetStore) {
        for is in store.itemsets() {
            let support = is.support();
            self.emit(&is, support);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn into_groups(self) -> Vec<(Itemset, Vec<f64>)> {
        self.groups.into_iter().collect()
    }
}

/// What one partition found locally.
#[derive(Debug)]
pub struct PartitionResult {
    pub index: usize,
    pub rows: u64,
    pub itemsets: FrequentItemsetStore,
    pub rules: Vec<AssociationRule>,
    pub stats: MiningStats,
}

#[derive(Debug)]
pub struct GlobalResult {
    /// Globally frequent itemsets, sorted.
    pub itemsets: Vec<(Itemset, GlobalEstimate)>,
    pub partitions: Vec<PartitionResult>,
    pub required_count: usize,
}

impl GlobalResult {
    pub fn estimate(&self, items: &[Item]) -> Option<&GlobalEstimate> {
        self.itemsets
            .binary_search_by(|(is, _)| is.items().cmp(items))
            .ok()
            .map(|i| &self.itemsets[i].1)
    }
}

pub struct PartitionedMiner {
    config: MiningConfig,
    cancel: CancellationToken,
}

impl PartitionedMiner {
    pub fn new(config: MiningConfig) -> Result<Self> {
        config.validate()?;
        Ok(PartitionedMiner { config, cancel: CancellationToken::new() })
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    pub fn run(&self, source: &mut dyn TransactionSource) -> Outcome<GlobalResult> {
        self.try_run(source).into()
    }

    fn aggregator(&self) -> Result<GlobalAggregator> {
        let agg = GlobalAggregator::new(self.config.partition_count, self.config.epsilon_slack)?;
        match self.config.required_count {
            Some(rc) => agg.with_required_count(rc),
            None => Ok(agg),
        }
    }

    fn sample(&self, source: &mut dyn TransactionSource) -> Result<Vec<MemorySource>> {
        let cfg = &self.config;
        let mut sampler = PartitionSampler::new(cfg.sampling_policy, cfg.partition_count, source.num_rows())?;
        if let Some(size) = cfg.sample_size {
            sampler = sampler.with_sample_size(size)?;
        }
        if let Some(seed) = cfg.seed {
            sampler = sampler.with_seed(seed);
        }
        sampler.partition(source)
    }

    fn try_run(&self, source: &mut dyn TransactionSource) -> Result<GlobalResult> {
        let cfg = &self.config;
        let aggregator = self.aggregator()?;
        self.cancel.checkpoint()?;
        if source.num_rows() == 0 {
            return Ok(GlobalResult {
                itemsets: Vec::new(),
                partitions: Vec::new(),
                required_count: aggregator.required_count(),
            });
        }

        let parts = self.sample(source)?;
        let miner = cfg.algorithm.build(self.cancel.clone(), cfg.max_len, cfg.index);
        let rule_generator = cfg
            .rules
            .map(|kind| kind.build(self.cancel.clone(), cfg.rule_constraints.clone(), cfg.index))
            .transpose()?;

        let partitions: Vec<PartitionResult> = parts
            .into_par_iter()
            .enumerate()
            .map(|(index, mut part)| -> Result<PartitionResult> {
                let rows = part.num_rows();
                let mut store = FrequentItemsetStore::new();
                let stats = miner.find_frequent_itemsets(&mut part, cfg.min_support, &mut store)?;
                let rules = match &rule_generator {
                    Some(generator) => generator.generate(&store, cfg.min_confidence)?,
                    None => Vec::new(),
                };
                debug!(partition = index, rows, itemsets = store.len(), rules = rules.len(), "partition mined");
                Ok(PartitionResult { index, rows, itemsets: store, rules, stats })
            })
            .collect::<Result<_>>()?;

        self.cancel.checkpoint()?;
        let mut shuffle = LocalShuffle::new();
        for p in &partitions {
            shuffle.emit_store(&p.itemsets);
        }
        let candidates = shuffle.len();
        let itemsets = aggregator.aggregate_all(shuffle.into_groups());

        info!(
            miner = miner.name(),
            partitions = partitions.len(),
            candidates,
            global = itemsets.len(),
            required = aggregator.required_count(),
            "partitioned mining finished"
        );
        Ok(GlobalResult { itemsets, partitions, required_count: aggregator.required_count() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association_rules::RuleKind;
    use crate::miner::MinerKind;
    use crate::sampler::SamplingPolicy;

    fn fixture() -> MemorySource {
        MemorySource::from_rows(vec![vec![1, 2, 3], vec![1, 2], vec![1, 3], vec![2, 3], vec![1, 2, 3]]).unwrap()
    }

    fn config(partition_count: usize) -> MiningConfig {
        MiningConfig {
            min_support: 0.6,
            min_confidence: 0.7,
            partition_count,
            seed: Some(42),
            ..MiningConfig::default()
        }
    }

    #[test]
    fn test_shuffle_groups() {
        let mut shuffle = LocalShuffle::new();
        let a = Itemset::from_items([1, 2]).unwrap();
        shuffle.emit(&a, 0.1);
        shuffle.emit(&a, 0.3);
        shuffle.emit(&Itemset::from_items([3]).unwrap(), 0.2);
        assert_eq!(shuffle.len(), 2);
        let mut groups = shuffle.into_groups();
        groups.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(groups[0].1, vec![0.1, 0.3]);
    }

    #[test]
    fn test_single_partition_is_exact() {
        let miner = PartitionedMiner::new(config(1)).unwrap();
        let result = miner.run(&mut fixture()).completed().unwrap();
        assert_eq!(result.partitions.len(), 1);
        assert_eq!(result.partitions[0].rows, 5);
        assert_eq!(result.itemsets.len(), 6);
        let est = result.estimate(&[1, 2]).unwrap();
        assert!((est.frequency - 0.6).abs() < 1e-12);
        assert_eq!(est.reports, 1);
        assert!(result.estimate(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_full_rate_partitions_agree() {
        let cfg = MiningConfig {
            sampling_policy: SamplingPolicy::Bernoulli,
            sample_size: Some(5),
            rules: Some(RuleKind::Apriori),
            algorithm: MinerKind::Closure,
            ..config(3)
        };
        let result = PartitionedMiner::new(cfg).unwrap().run(&mut fixture()).completed().unwrap();
        assert_eq!(result.required_count, 2);
        for p in &result.partitions {
            assert_eq!(p.rows, 5);
            assert_eq!(p.rules.len(), 6);
        }
        let est = result.estimate(&[3]).unwrap();
        assert_eq!(est.reports, 3);
        assert!((est.frequency - 0.8).abs() < 1e-12);
        assert!((est.upper_bound - 0.81).abs() < 1e-12);
    }

    #[test]
    fn test_cancelled_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let miner = PartitionedMiner::new(config(2)).unwrap().with_cancel(cancel);
        assert!(miner.run(&mut fixture()).is_aborted());
    }

    #[test]
    fn test_empty_source() {
        let result = PartitionedMiner::new(config(3)).unwrap().run(&mut MemorySource::new()).completed().unwrap();
        assert!(result.itemsets.is_empty());
        assert_eq!(result.required_count, 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(PartitionedMiner::new(MiningConfig { min_support: 0.0, ..MiningConfig::default() }).is_err());
    }
}
