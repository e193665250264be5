//! Property-based tests for the miners, the rule generators and the
//! aggregator.
//!
//! Covers: every miner against exhaustive subset counting, the confidence
//! bound of generated rules, cover minimality and the aggregation quorum.

use std::collections::BTreeSet;

use parfim::{
    AprioriMiner, AprioriRules, CandidateStrategy, CoverRules, CoverRulesOpt, FpGrowth, FrequentItemsetStore,
    GlobalAggregator, Item, Itemset, MemorySource, Miner, RuleGenerator,
};
use proptest::prelude::*;

const MAX_ITEM: Item = 8;

/// Up to 40 rows over items 1..=8.
fn arb_rows() -> impl Strategy<Value = Vec<Vec<Item>>> {
    prop::collection::vec(prop::collection::btree_set(1..=MAX_ITEM, 0..6), 1..40)
        .prop_map(|rows| rows.into_iter().map(|r| r.into_iter().collect()).collect())
}

/// Every non-empty itemset with weight >= max(floor(min_support * rows), 1).
fn brute_force(rows: &[Vec<Item>], min_support: f64) -> BTreeSet<(Vec<Item>, u64)> {
    let min_weight = ((min_support * rows.len() as f64).floor() as u64).max(1);
    let mut out = BTreeSet::new();
    for mask in 1u32..(1 << MAX_ITEM) {
        let items: Vec<Item> = (0..MAX_ITEM).filter(|b| mask & (1 << b) != 0).map(|b| b + 1).collect();
        let weight = rows.iter().filter(|r| items.iter().all(|i| r.contains(i))).count() as u64;
        if weight >= min_weight {
            out.insert((items, weight));
        }
    }
    out
}

fn mined(miner: &dyn Miner, rows: &[Vec<Item>], min_support: f64) -> BTreeSet<(Vec<Item>, u64)> {
    let mut source = MemorySource::from_rows(rows.to_vec()).expect("rows are valid");
    let mut out: Vec<Itemset> = Vec::new();
    miner.find_frequent_itemsets(&mut source, min_support, &mut out).expect("mining succeeds");
    let set: BTreeSet<_> = out.iter().map(|is| (is.items().to_vec(), is.weight())).collect();
    assert_eq!(set.len(), out.len(), "{} emitted an itemset twice", miner.name());
    set
}

fn store_for(rows: &[Vec<Item>], min_support: f64) -> FrequentItemsetStore {
    let mut source = MemorySource::from_rows(rows.to_vec()).expect("rows are valid");
    FpGrowth::new().mine(&mut source, min_support).expect("mining succeeds")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fpgrowth_matches_brute_force(rows in arb_rows(), min_support in 0.05f64..0.9) {
        prop_assert_eq!(mined(&FpGrowth::new(), &rows, min_support), brute_force(&rows, min_support));
    }

    #[test]
    fn candidate_miners_match_fpgrowth(rows in arb_rows(), min_support in 0.05f64..0.9) {
        let expected = mined(&FpGrowth::new(), &rows, min_support);
        let apriori = AprioriMiner::new(CandidateStrategy::Apriori).with_index(3, 2);
        prop_assert_eq!(mined(&apriori, &rows, min_support), expected.clone());
        let closure = AprioriMiner::new(CandidateStrategy::Closure).with_index(3, 2);
        prop_assert_eq!(mined(&closure, &rows, min_support), expected);
    }

    #[test]
    fn rules_respect_confidence(rows in arb_rows(), min_support in 0.1f64..0.6, min_confidence in 0.1f64..1.0) {
        let store = store_for(&rows, min_support);
        let generators: [&dyn RuleGenerator; 3] = [&AprioriRules::new(), &CoverRules::new(), &CoverRulesOpt::new()];
        for generator in generators {
            for rule in generator.generate(&store, min_confidence).expect("generation succeeds") {
                prop_assert!(rule.confidence() >= min_confidence, "{} from {}", rule, generator.name());
                prop_assert!(rule.confidence() <= 1.0);
                prop_assert!(!rule.antecedent().intersects(rule.consequent()));
            }
        }
    }

    #[test]
    fn cover_rules_are_minimal(rows in arb_rows(), min_support in 0.1f64..0.6, min_confidence in 0.3f64..1.0) {
        let store = store_for(&rows, min_support);
        let valid = AprioriRules::new().generate(&store, min_confidence).expect("generation succeeds");
        let generators: [&dyn RuleGenerator; 2] = [&CoverRules::new(), &CoverRulesOpt::new()];
        for generator in generators {
            let cover = generator.generate(&store, min_confidence).expect("generation succeeds");
            for (i, rule) in cover.iter().enumerate() {
                prop_assert!(valid.contains(rule), "{} is not a valid rule", rule);
                for earlier in &cover[..i] {
                    prop_assert!(!rule.is_covered_by(earlier), "{} covered by {}", rule, earlier);
                }
            }
        }
    }

    #[test]
    fn aggregation_needs_quorum(
        partitions in 1usize..12,
        estimates in prop::collection::vec(0.0f64..1.0, 0..12),
    ) {
        let agg = GlobalAggregator::new(partitions, 0.02).expect("valid aggregator");
        let required = partitions / 2 + 1;
        match agg.aggregate(&estimates) {
            None => prop_assert!(estimates.len() < required),
            Some(est) => {
                prop_assert!(estimates.len() >= required);
                prop_assert!(est.lower_bound <= est.frequency && est.frequency <= est.upper_bound);
                prop_assert!(est.lower_bound >= 0.0 && est.upper_bound <= 1.0);
                let inside = estimates
                    .iter()
                    .filter(|&&e| e >= est.lower_bound && e <= est.upper_bound)
                    .count();
                prop_assert!(inside >= required);
            }
        }
    }

    #[test]
    fn subset_antisymmetry(
        a in prop::collection::btree_set(1..=MAX_ITEM, 1..5),
        b in prop::collection::btree_set(1..=MAX_ITEM, 1..5),
    ) {
        let a = Itemset::from_items(a).expect("positive items");
        let b = Itemset::from_items(b).expect("positive items");
        if a != b && a.len() == b.len() {
            prop_assert!(!(a.is_included_in(&b) && b.is_included_in(&a)));
        }
        if a.can_combine_with(&b) && a != b {
            let c = a.combine(&b).expect("combinable");
            prop_assert_eq!(c.len(), a.len() + 1);
            prop_assert!(c.items().windows(2).all(|w| w[0] < w[1]));
        }
    }
}
