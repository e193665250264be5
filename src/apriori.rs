//! Level-wise candidate miners counting with a [`SubsetIndex`].
//!
//! `Apriori` scans the database once per itemset size. `Closure` also
//! collects, for each candidate, how often every item co-occurs with it, and
//! uses those counts to settle the next size in the same scan, so it needs
//! one scan per two levels.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::common::{count_item_support, effective_min_weight, validate_fraction};
use crate::error::Result;
use crate::io::{scan, ItemsetSink, TransactionSource};
use crate::itemset::{Item, Itemset};
use crate::miner::{Miner, MiningStats};
use crate::subset_index::{CooccurrenceCounts, SubsetIndex, DEFAULT_HASH_WIDTH, DEFAULT_LEAF_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStrategy {
    /// One database scan per itemset size.
    Apriori,
    /// One scan per two sizes. Each pass keeps a `candidates x num_items`
    /// table of `u64` co-occurrence counts, which is `num_items^2` on the
    /// first pass; prefer `Apriori` for wide item universes.
    Closure,
}

/// Join step: combine every pair of sorted `k`-itemsets that differ only in
/// their last item and keep the result when all of its `k`-subsets are in
/// `itemsets`. Input must be sorted; output is sorted.
pub(crate) fn apriori_gen(itemsets: &[Itemset], leaf_capacity: usize, hash_width: usize) -> Result<Vec<Itemset>> {
    if itemsets.len() < 2 {
        return Ok(Vec::new());
    }
    let mut index = SubsetIndex::build(itemsets.iter().cloned(), leaf_capacity, hash_width)?;
    let mut out = Vec::new();
    for i in 0..itemsets.len() - 1 {
        for j in i + 1..itemsets.len() {
            if !itemsets[i].can_combine_with(&itemsets[j]) {
                break;
            }
            let candidate = itemsets[i].combine(&itemsets[j])?;
            if index.count_subsets(candidate.items()) == candidate.len() {
                out.push(candidate);
            }
        }
    }
    Ok(out)
}

struct Output<'a> {
    sink: &'a mut dyn ItemsetSink,
    num_rows: u64,
    emitted: u64,
}

impl Output<'_> {
    fn emit(&mut self, is: &mut Itemset, weight: u64) -> Result<()> {
        is.set_counts(weight, self.num_rows);
        self.sink.write_itemset(is)?;
        self.emitted += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AprioriMiner {
    strategy: CandidateStrategy,
    cancel: CancellationToken,
    max_len: Option<usize>,
    leaf_capacity: usize,
    hash_width: usize,
}

impl AprioriMiner {
    pub fn new(strategy: CandidateStrategy) -> Self {
        AprioriMiner {
            strategy,
            cancel: CancellationToken::new(),
            max_len: None,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            hash_width: DEFAULT_HASH_WIDTH,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    /// Shape of the subset indexes built for every level.
    pub fn with_index(mut self, leaf_capacity: usize, hash_width: usize) -> Self {
        self.leaf_capacity = leaf_capacity;
        self.hash_width = hash_width;
        self
    }

    pub fn strategy(&self) -> CandidateStrategy {
        self.strategy
    }

    fn fits(&self, len: usize) -> bool {
        self.max_len.map_or(true, |ml| len <= ml)
    }

    fn index(&self, candidates: Vec<Itemset>) -> Result<SubsetIndex> {
        SubsetIndex::build(candidates, self.leaf_capacity, self.hash_width)
    }

    fn mine_apriori(
        &self,
        source: &mut dyn TransactionSource,
        min_weight: u64,
        out: &mut Output<'_>,
    ) -> Result<usize> {
        self.cancel.checkpoint()?;
        let counts = count_item_support(source)?;
        let mut passes = 1;

        let mut frequent: Vec<Itemset> = Vec::new();
        if self.fits(1) {
            for (item, &c) in counts.iter().enumerate().skip(1) {
                if c >= min_weight {
                    let mut is = Itemset::singleton(item as Item);
                    out.emit(&mut is, c)?;
                    frequent.push(is);
                }
            }
        }

        let mut k = 1;
        while !frequent.is_empty() && self.fits(k + 1) {
            self.cancel.checkpoint()?;
            let candidates = apriori_gen(&frequent, self.leaf_capacity, self.hash_width)?;
            debug!(level = k + 1, candidates = candidates.len(), "generated candidates");
            if candidates.is_empty() {
                break;
            }
            let mut index = self.index(candidates)?;

            self.cancel.checkpoint()?;
            let size = k + 1;
            scan(source, |row| {
                if row.len() >= size {
                    index.update(row);
                }
                Ok(())
            })?;
            passes += 1;

            frequent.clear();
            for mut is in index.into_itemsets() {
                let w = is.weight();
                if w >= min_weight {
                    out.emit(&mut is, w)?;
                    frequent.push(is);
                }
            }
            k += 1;
        }
        Ok(passes)
    }

    fn mine_closure(
        &self,
        source: &mut dyn TransactionSource,
        min_weight: u64,
        out: &mut Output<'_>,
    ) -> Result<usize> {
        let num_items = source.num_items();
        if !self.fits(1) || num_items == 0 {
            return Ok(0);
        }
        let mut candidates = self.index((1..=num_items).map(Itemset::singleton).collect())?;
        let mut passes = 0;

        loop {
            self.cancel.checkpoint()?;
            let mut counts = CooccurrenceCounts::new(candidates.len(), num_items as usize);
            scan(source, |row| candidates.update_with_counts(row, &mut counts))?;
            passes += 1;

            self.cancel.checkpoint()?;
            let level = candidates.order();
            let extend = self.fits(level + 1);
            let mut next_frequent: Vec<Itemset> = Vec::new();
            for (i, mut is) in candidates.into_itemsets().into_iter().enumerate() {
                let w = is.weight();
                if w < min_weight {
                    continue;
                }
                out.emit(&mut is, w)?;
                if !extend {
                    continue;
                }
                let last = is.last().unwrap_or(0);
                for item in last + 1..=num_items {
                    let c = counts.get(i, item);
                    if c >= min_weight {
                        let mut items = is.items().to_vec();
                        items.push(item);
                        let mut ext = Itemset::from_sorted(items);
                        out.emit(&mut ext, c)?;
                        next_frequent.push(ext);
                    }
                }
            }
            debug!(level, pass = passes, next = next_frequent.len(), "closure pass finished");

            if next_frequent.is_empty() || !self.fits(level + 2) {
                break;
            }
            next_frequent.sort();
            let generated = apriori_gen(&next_frequent, self.leaf_capacity, self.hash_width)?;
            if generated.is_empty() {
                break;
            }
            candidates = self.index(generated)?;
        }
        Ok(passes)
    }
}

impl Miner for AprioriMiner {
    fn name(&self) -> &'static str {
        match self.strategy {
            CandidateStrategy::Apriori => "apriori",
            CandidateStrategy::Closure => "closure",
        }
    }

    fn find_frequent_itemsets(
        &self,
        source: &mut dyn TransactionSource,
        min_support: f64,
        sink: &mut dyn ItemsetSink,
    ) -> Result<MiningStats> {
        validate_fraction("min_support", min_support)?;
        let num_rows = source.num_rows();
        let min_weight = effective_min_weight(min_support, num_rows);
        let mut out = Output { sink, num_rows, emitted: 0 };

        let passes = match self.strategy {
            CandidateStrategy::Apriori => self.mine_apriori(source, min_weight, &mut out)?,
            CandidateStrategy::Closure => self.mine_closure(source, min_weight, &mut out)?,
        };
        out.sink.flush()?;

        info!(miner = self.name(), rows = num_rows, min_weight, passes, itemsets = out.emitted, "mining finished");
        Ok(MiningStats { passes, itemsets: out.emitted, min_weight, num_rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiningError;
    use crate::io::MemorySource;

    /// Cancels `token` on the first itemset it receives.
    struct CancelOnWrite {
        token: CancellationToken,
        written: u64,
    }

    impl ItemsetSink for CancelOnWrite {
        fn write_itemset(&mut self, _itemset: &Itemset) -> Result<()> {
            self.token.cancel();
            self.written += 1;
            Ok(())
        }
    }

    struct FailingSink;

    impl ItemsetSink for FailingSink {
        fn write_itemset(&mut self, _itemset: &Itemset) -> Result<()> {
            Err(MiningError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    fn set(items: &[Item]) -> Itemset {
        Itemset::from_items(items.iter().copied()).unwrap()
    }

    fn mine(strategy: CandidateStrategy, rows: Vec<Vec<Item>>, min_support: f64) -> (Vec<(Vec<Item>, u64)>, MiningStats) {
        let mut src = MemorySource::from_rows(rows).unwrap();
        let mut out: Vec<Itemset> = Vec::new();
        let stats = AprioriMiner::new(strategy).find_frequent_itemsets(&mut src, min_support, &mut out).unwrap();
        let mut v: Vec<(Vec<Item>, u64)> = out.iter().map(|is| (is.items().to_vec(), is.weight())).collect();
        v.sort();
        (v, stats)
    }

    fn fixture() -> Vec<Vec<Item>> {
        vec![vec![1, 2, 3], vec![1, 2], vec![1, 3], vec![2, 3], vec![1, 2, 3]]
    }

    #[test]
    fn test_apriori_gen_prunes() {
        let frequent = vec![set(&[1, 2]), set(&[1, 3]), set(&[1, 4]), set(&[2, 3])];
        let got = apriori_gen(&frequent, 20, 40).unwrap();
        // {1,2,4} and {1,3,4} lack {2,4} and {3,4}
        assert_eq!(got, vec![set(&[1, 2, 3])]);
        assert!(apriori_gen(&frequent[..1], 20, 40).unwrap().is_empty());
    }

    #[test]
    fn test_both_strategies_on_fixture() {
        let expected = vec![
            (vec![1], 4),
            (vec![1, 2], 3),
            (vec![1, 3], 3),
            (vec![2], 4),
            (vec![2, 3], 3),
            (vec![3], 4),
        ];
        let (apriori, stats) = mine(CandidateStrategy::Apriori, fixture(), 0.6);
        assert_eq!(apriori, expected);
        assert_eq!(stats.passes, 3);
        let (closure, stats) = mine(CandidateStrategy::Closure, fixture(), 0.6);
        assert_eq!(closure, expected);
        assert_eq!(stats.passes, 2);
    }

    #[test]
    fn test_closure_covers_deep_itemsets() {
        let rows = vec![vec![1, 2, 3, 4], vec![1, 2, 3, 4], vec![1, 2, 3], vec![4]];
        let (closure, _) = mine(CandidateStrategy::Closure, rows.clone(), 0.5);
        let (apriori, _) = mine(CandidateStrategy::Apriori, rows, 0.5);
        assert_eq!(closure, apriori);
        assert!(closure.contains(&(vec![1, 2, 3, 4], 2)));
        assert_eq!(closure.len(), 15);
    }

    #[test]
    fn test_max_len() {
        let miner = AprioriMiner::new(CandidateStrategy::Closure).with_max_len(Some(2));
        let mut src = MemorySource::from_rows(fixture()).unwrap();
        let store = miner.mine(&mut src, 0.2).unwrap();
        assert_eq!(store.len(), 6);
        assert!(!store.contains(&[1, 2, 3]));
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let miner = AprioriMiner::new(CandidateStrategy::Apriori).with_cancel(cancel);
        let mut src = MemorySource::from_rows(fixture()).unwrap();
        assert!(miner.run(&mut src, 0.5).is_aborted());
    }

    #[test]
    fn test_cancelled_mid_run() {
        // Apriori finishes level 1; Closure finishes its first two-level pass
        for (strategy, before_abort) in [(CandidateStrategy::Apriori, 3), (CandidateStrategy::Closure, 6)] {
            let token = CancellationToken::new();
            let miner = AprioriMiner::new(strategy).with_cancel(token.clone());
            let mut src = MemorySource::from_rows(fixture()).unwrap();
            let mut sink = CancelOnWrite { token, written: 0 };
            let err = miner.find_frequent_itemsets(&mut src, 0.6, &mut sink).unwrap_err();
            assert!(matches!(err, MiningError::Aborted), "{:?}", strategy);
            assert_eq!(sink.written, before_abort, "{:?}", strategy);
        }
    }

    #[test]
    fn test_sink_failure_propagates() {
        for strategy in [CandidateStrategy::Apriori, CandidateStrategy::Closure] {
            let mut src = MemorySource::from_rows(fixture()).unwrap();
            let err = AprioriMiner::new(strategy).find_frequent_itemsets(&mut src, 0.6, &mut FailingSink).unwrap_err();
            assert!(matches!(err, MiningError::Io(_)), "{:?}", strategy);
        }
    }
}
