//! Frequent itemset and association rule mining over sampled partitions.
//!
//! A single database can be mined directly with any [`Miner`]
//! ([`FpGrowth`], or [`AprioriMiner`] with the Apriori or Closure candidate
//! strategy) into a [`FrequentItemsetStore`], from which a
//! [`RuleGenerator`] derives association rules. [`PartitionedMiner`] runs
//! the sampled flow instead: rows are spread over partitions by a
//! [`PartitionSampler`], each partition is mined locally, and the
//! [`GlobalAggregator`] keeps the itemsets a quorum of partitions agree on.

pub mod aggregate;
pub mod apriori;
pub mod association_rules;
pub mod cancel;
pub mod common;
pub mod config;
pub mod cover;
pub mod error;
pub mod fpgrowth;
pub mod io;
pub mod itemset;
pub mod miner;
pub mod pipeline;
pub mod sampler;
pub mod store;
pub mod subset_index;

pub use aggregate::{GlobalAggregator, GlobalEstimate};
pub use apriori::{AprioriMiner, CandidateStrategy};
pub use association_rules::{
    sort_rules, AprioriRules, AssociationRule, RuleConstraints, RuleGenerator, RuleKind, RuleMetric, RuleOrder,
    RuleSink,
};
pub use cancel::CancellationToken;
pub use config::{IndexConfig, MiningConfig};
pub use cover::{CoverRules, CoverRulesOpt};
pub use error::{MiningError, Outcome, Result};
pub use fpgrowth::FpGrowth;
pub use io::{read_itemsets, ItemsetSink, MemorySource, NullSink, TextSink, TextSource, TransactionSource};
pub use itemset::{Item, Itemset};
pub use miner::{AccumulatedSource, Miner, MinerKind, MiningStats, TransactionAccumulator};
pub use pipeline::{GlobalResult, LocalShuffle, PartitionResult, PartitionedMiner};
pub use sampler::{PartitionSampler, SamplingPlan, SamplingPolicy};
pub use store::FrequentItemsetStore;
pub use subset_index::SubsetIndex;
