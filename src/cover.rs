//! Minimal covers of the valid association rules.
//!
//! Each maximal frequent itemset is a rule base. For a base `B` the best
//! antecedent is the proper subset with the largest support not above
//! `supp(B) / min_confidence`; the rule it yields enters the cover unless a
//! rule already there covers it. When that antecedent is not the most
//! frequent subset, every `(|B| - 1)`-subset becomes a new base.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::association_rules::{AssociationRule, RuleGenerator, RuleSink};
use crate::cancel::CancellationToken;
use crate::common::validate_fraction;
use crate::error::Result;
use crate::itemset::{Item, Itemset};
use crate::store::FrequentItemsetStore;

/// Maximal itemsets of size 2 or more, largest first.
fn initial_bases(store: &FrequentItemsetStore) -> Vec<Itemset> {
    let mut large: Vec<Itemset> = store.maximal_itemsets().into_iter().filter(|is| is.len() >= 2).collect();
    large.sort_by(|a, b| b.len().cmp(&a.len()));
    large
}

fn singletons(store: &FrequentItemsetStore, base: &Itemset) -> Result<Vec<Itemset>> {
    base.items().iter().map(|&i| store.get(&[i])).collect()
}

/// Next-size subsets from sorted same-size `subsets`, supports filled in.
fn next_subsets(store: &FrequentItemsetStore, subsets: &[Itemset]) -> Result<Vec<Itemset>> {
    let mut out = Vec::new();
    for i in 0..subsets.len().saturating_sub(1) {
        for j in i + 1..subsets.len() {
            if !subsets[i].can_combine_with(&subsets[j]) {
                break;
            }
            let is = subsets[i].combine(&subsets[j])?;
            out.push(store.get(is.items())?);
        }
    }
    Ok(out)
}

fn sort_by_support(subsets: &mut [Itemset]) {
    subsets.sort_by(|a, b| a.support().total_cmp(&b.support()));
}

/// Position of `support` in `sorted`, or where it would be inserted.
fn search_support(sorted: &[Itemset], support: f64) -> usize {
    let (mut left, mut right) = (0isize, sorted.len() as isize - 1);
    while right >= left {
        let middle = (left + right) / 2;
        let current = sorted[middle as usize].support();
        if support > current {
            left = middle + 1;
        } else if support < current {
            right = middle - 1;
        } else {
            return middle as usize;
        }
    }
    left as usize
}

fn make_rule(store: &FrequentItemsetStore, base: &Itemset, antecedent: &Itemset) -> Result<AssociationRule> {
    AssociationRule::from_store(store, antecedent, &base.subtract(antecedent), base.support())
}

/// Add `rule` to `cover` and pass it on to `sink`, unless a rule already in
/// `cover` covers it. Rules whose confidence rounds below `min_confidence`
/// are dropped.
fn admit(
    cover: &mut Vec<AssociationRule>,
    rule: AssociationRule,
    min_confidence: f64,
    sink: &mut dyn RuleSink,
) -> Result<()> {
    if rule.confidence() < min_confidence || cover.iter().any(|r| rule.is_covered_by(r)) {
        return Ok(());
    }
    sink.write_rule(&rule)?;
    cover.push(rule);
    Ok(())
}

/// `(|base| - 1)`-subsets of `base` not already inside a queued base.
fn sub_bases<'a, T>(
    store: &'a FrequentItemsetStore,
    base: &'a Itemset,
    queued: &'a VecDeque<T>,
    itemset_of: impl Fn(&T) -> &Itemset + 'a,
) -> impl Iterator<Item = Result<Itemset>> + 'a {
    let items: &[Item] = if base.len() > 2 { base.items() } else { &[] };
    items.iter().filter_map(move |&item| {
        let nb = base.subtract(&Itemset::singleton(item));
        if queued.iter().any(|q| nb.is_included_in(itemset_of(q))) {
            None
        } else {
            Some(store.get(nb.items()))
        }
    })
}

/// Cover search that enumerates every proper subset of each rule base.
#[derive(Debug, Clone, Default)]
pub struct CoverRules {
    cancel: CancellationToken,
}

impl CoverRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn process_base(
        &self,
        store: &FrequentItemsetStore,
        base: &Itemset,
        min_confidence: f64,
        queue: &mut VecDeque<Itemset>,
        cover: &mut Vec<AssociationRule>,
        sink: &mut dyn RuleSink,
    ) -> Result<()> {
        self.cancel.checkpoint()?;
        let sup_threshold = base.support() / min_confidence;

        let subsets_1 = singletons(store, base)?;
        let mut subsets = subsets_1.clone();
        let mut k_subsets = subsets_1;
        for _ in 2..base.len() {
            k_subsets = next_subsets(store, &k_subsets)?;
            subsets.extend(k_subsets.iter().cloned());
        }
        sort_by_support(&mut subsets);

        let mut index = search_support(&subsets, sup_threshold).min(subsets.len() - 1);
        if subsets[index].support() > sup_threshold {
            if index == 0 {
                self.enqueue_sub_bases(store, base, queue)?;
                return Ok(());
            }
            index -= 1;
        }
        let supp = subsets[index].support();
        while index > 0 && subsets[index - 1].support() == supp {
            index -= 1;
        }

        let antecedent = &subsets[index];
        admit(cover, make_rule(store, base, antecedent)?, min_confidence, sink)?;
        let most_frequent = subsets[subsets.len() - 1].support();
        if antecedent.support() < most_frequent {
            self.enqueue_sub_bases(store, base, queue)?;
        }
        Ok(())
    }

    fn enqueue_sub_bases(&self, store: &FrequentItemsetStore, base: &Itemset, queue: &mut VecDeque<Itemset>) -> Result<()> {
        let fresh: Vec<Itemset> = sub_bases(store, base, queue, |q| q).collect::<Result<_>>()?;
        queue.extend(fresh);
        Ok(())
    }
}

impl RuleGenerator for CoverRules {
    fn name(&self) -> &'static str {
        "cover"
    }

    fn generate_into(
        &self,
        store: &FrequentItemsetStore,
        min_confidence: f64,
        sink: &mut dyn RuleSink,
    ) -> Result<u64> {
        validate_fraction("min_confidence", min_confidence)?;
        let mut queue: VecDeque<Itemset> = initial_bases(store).into();
        debug!(bases = queue.len(), "initial rule bases");
        let mut cover = Vec::new();
        while let Some(base) = queue.pop_front() {
            self.process_base(store, &base, min_confidence, &mut queue, &mut cover, sink)?;
        }
        info!(generator = self.name(), rules = cover.len(), "rule generation finished");
        Ok(cover.len() as u64)
    }
}

#[derive(Debug, Clone)]
struct RuleBase {
    itemset: Itemset,
    /// Subsets at or below this support were already tried by the parent base.
    support_inf_threshold: f64,
}

/// Cover search that builds the subsets of a base level by level and
/// discards those no more frequent than the best antecedent found so far.
#[derive(Debug, Clone, Default)]
pub struct CoverRulesOpt {
    cancel: CancellationToken,
}

impl CoverRulesOpt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn process_base(
        &self,
        store: &FrequentItemsetStore,
        base: &RuleBase,
        min_confidence: f64,
        queue: &mut VecDeque<RuleBase>,
        cover: &mut Vec<AssociationRule>,
        sink: &mut dyn RuleSink,
    ) -> Result<()> {
        self.cancel.checkpoint()?;
        let rule_base = &base.itemset;
        let sup_threshold = rule_base.support() / min_confidence;
        let mut inf_threshold = base.support_inf_threshold;

        let subsets_1 = singletons(store, rule_base)?;
        let mut subsets: Vec<Itemset> =
            subsets_1.iter().filter(|is| is.support() > inf_threshold).cloned().collect();
        if subsets.is_empty() {
            return Ok(());
        }

        let mut candidate: Option<AssociationRule> = None;
        let mut add_sub_bases = false;
        for card in 1..rule_base.len() {
            let mut ordered = subsets.clone();
            sort_by_support(&mut ordered);
            let mut index = search_support(&ordered, sup_threshold).min(ordered.len() - 1) as isize;
            if ordered[index as usize].support() > sup_threshold {
                index -= 1;
            }
            let mut chosen_support = None;
            if index >= 0 {
                let antecedent = &ordered[index as usize];
                candidate = Some(make_rule(store, rule_base, antecedent)?);
                inf_threshold = antecedent.support();
                chosen_support = Some(inf_threshold);
            }
            if card == 1 {
                let most_frequent = ordered[ordered.len() - 1].support();
                add_sub_bases = chosen_support.map_or(true, |s| s < most_frequent);
            }

            subsets = next_subsets(store, &subsets)?;
            subsets.retain(|is| is.support() > inf_threshold);
            if subsets.is_empty() {
                break;
            }
        }

        if let Some(rule) = candidate {
            admit(cover, rule, min_confidence, sink)?;
        }
        if add_sub_bases {
            let fresh: Vec<Itemset> = sub_bases(store, rule_base, queue, |q| &q.itemset).collect::<Result<_>>()?;
            queue.extend(fresh.into_iter().map(|itemset| RuleBase { itemset, support_inf_threshold: inf_threshold }));
        }
        Ok(())
    }
}

impl RuleGenerator for CoverRulesOpt {
    fn name(&self) -> &'static str {
        "cover_opt"
    }

    fn generate_into(
        &self,
        store: &FrequentItemsetStore,
        min_confidence: f64,
        sink: &mut dyn RuleSink,
    ) -> Result<u64> {
        validate_fraction("min_confidence", min_confidence)?;
        let mut queue: VecDeque<RuleBase> = initial_bases(store)
            .into_iter()
            .map(|itemset| RuleBase { itemset, support_inf_threshold: 0.0 })
            .collect();
        debug!(bases = queue.len(), "initial rule bases");
        let mut cover = Vec::new();
        while let Some(base) = queue.pop_front() {
            self.process_base(store, &base, min_confidence, &mut queue, &mut cover, sink)?;
        }
        info!(generator = self.name(), rules = cover.len(), "rule generation finished");
        Ok(cover.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association_rules::AprioriRules;
    use crate::error::MiningError;

    fn store_of(entries: &[(&[Item], u64)], rows: u64) -> FrequentItemsetStore {
        let mut store = FrequentItemsetStore::new();
        for (items, w) in entries {
            store.insert(&Itemset::from_items(items.iter().copied()).unwrap().with_counts(*w, rows)).unwrap();
        }
        store
    }

    fn pairs_fixture() -> FrequentItemsetStore {
        store_of(&[(&[1], 4), (&[2], 4), (&[3], 4), (&[1, 2], 3), (&[1, 3], 3), (&[2, 3], 3)], 5)
    }

    /// Frequent itemsets of 1 2 3 / 1 2 3 / 1 2 / 1 / 2 3 at weight >= 1.
    fn triple_fixture() -> FrequentItemsetStore {
        store_of(
            &[
                (&[1], 4),
                (&[2], 4),
                (&[3], 3),
                (&[1, 2], 3),
                (&[1, 3], 2),
                (&[2, 3], 3),
                (&[1, 2, 3], 2),
            ],
            5,
        )
    }

    fn assert_minimal(cover: &[AssociationRule]) {
        for (i, r) in cover.iter().enumerate() {
            for earlier in &cover[..i] {
                assert!(!r.is_covered_by(earlier), "{} is covered by {}", r, earlier);
            }
        }
    }

    #[test]
    fn test_search_support() {
        let store = pairs_fixture();
        let mut subsets = vec![store.get(&[1, 2]).unwrap(), store.get(&[1]).unwrap()];
        sort_by_support(&mut subsets);
        assert_eq!(search_support(&subsets, 0.6), 0);
        assert_eq!(search_support(&subsets, 0.7), 1);
        assert_eq!(search_support(&subsets, 0.9), 2);
    }

    #[test]
    fn test_cover_on_pairs() {
        for generator in [&CoverRules::new() as &dyn RuleGenerator, &CoverRulesOpt::new()] {
            let cover = generator.generate(&pairs_fixture(), 0.7).unwrap();
            // one single-item antecedent per pair
            assert_eq!(cover.len(), 3, "{}", generator.name());
            assert_minimal(&cover);
            for r in &cover {
                assert!(r.confidence() >= 0.7);
                assert_eq!(r.antecedent().len(), 1);
            }
        }
    }

    #[test]
    fn test_cover_rules_are_valid() {
        let store = triple_fixture();
        let all = AprioriRules::new().generate(&store, 0.5).unwrap();
        for generator in [&CoverRules::new() as &dyn RuleGenerator, &CoverRulesOpt::new()] {
            let cover = generator.generate(&store, 0.5).unwrap();
            assert!(!cover.is_empty());
            assert_minimal(&cover);
            for r in &cover {
                assert!(r.confidence() >= 0.5 && r.confidence() <= 1.0);
                assert!(all.contains(r), "{} not a valid rule", r);
            }
        }
    }

    #[test]
    fn test_cover_picks_best_antecedent() {
        let cover = CoverRules::new().generate(&triple_fixture(), 0.5).unwrap();
        // supp{1,2,3} / 0.5 = 0.8 admits {1} as antecedent of the full base
        let first = &cover[0];
        assert_eq!(first.antecedent().items(), &[1]);
        assert_eq!(first.consequent().items(), &[2, 3]);
        assert!((first.confidence() - 0.5).abs() < 1e-12);
    }

    /// Cancels `token` as soon as the first rule is admitted.
    struct CancelOnWrite {
        token: CancellationToken,
        written: u64,
    }

    impl RuleSink for CancelOnWrite {
        fn write_rule(&mut self, _rule: &AssociationRule) -> Result<()> {
            self.token.cancel();
            self.written += 1;
            Ok(())
        }
    }

    #[test]
    fn test_cancelled_mid_cover() {
        let builds: [fn(CancellationToken) -> Box<dyn RuleGenerator>; 2] = [
            |token| Box::new(CoverRules::new().with_cancel(token)) as Box<dyn RuleGenerator>,
            |token| Box::new(CoverRulesOpt::new().with_cancel(token)) as Box<dyn RuleGenerator>,
        ];
        for build in builds {
            let token = CancellationToken::new();
            let generator = build(token.clone());
            let mut sink = CancelOnWrite { token, written: 0 };
            // three pair bases; the second one hits the checkpoint
            let err = generator.generate_into(&pairs_fixture(), 0.7, &mut sink).unwrap_err();
            assert!(matches!(err, MiningError::Aborted), "{}", generator.name());
            assert_eq!(sink.written, 1, "{}", generator.name());
        }
    }

    #[test]
    fn test_cover_sink_failure_propagates() {
        struct FailingSink;
        impl RuleSink for FailingSink {
            fn write_rule(&mut self, _rule: &AssociationRule) -> Result<()> {
                Err(MiningError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
            }
        }
        let err = CoverRules::new().generate_into(&pairs_fixture(), 0.7, &mut FailingSink).unwrap_err();
        assert!(matches!(err, MiningError::Io(_)));
    }

    #[test]
    fn test_no_bases() {
        let store = store_of(&[(&[1], 4), (&[2], 4)], 5);
        assert!(CoverRules::new().generate(&store, 0.5).unwrap().is_empty());
        assert!(CoverRulesOpt::new().generate(&store, 0.5).unwrap().is_empty());
        assert!(CoverRules::new().generate(&store, 1.5).is_err());
    }
}
