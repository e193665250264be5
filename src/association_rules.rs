use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::apriori::apriori_gen;
use crate::cancel::CancellationToken;
use crate::common::validate_fraction;
use crate::config::IndexConfig;
use crate::cover::{CoverRules, CoverRulesOpt};
use crate::error::{MiningError, Outcome, Result};
use crate::itemset::Itemset;
use crate::store::FrequentItemsetStore;

/// `antecedent -> consequent`. Support is the support of the union,
/// confidence is that support over the antecedent's. The antecedent and
/// consequent carry their own supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationRule {
    antecedent: Itemset,
    consequent: Itemset,
    antecedent_support: f64,
    consequent_support: f64,
    support: f64,
    confidence: f64,
}

impl AssociationRule {
    pub fn new(antecedent: Itemset, consequent: Itemset, support: f64, confidence: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&support) || !(0.0..=1.0).contains(&confidence) {
            return Err(MiningError::invalid(format!(
                "rule support {} and confidence {} must lie in [0, 1]",
                support, confidence
            )));
        }
        if antecedent.is_empty() || consequent.is_empty() {
            return Err(MiningError::invalid("rule sides must not be empty"));
        }
        if antecedent.intersects(&consequent) {
            return Err(MiningError::invalid(format!(
                "antecedent {{{}}} and consequent {{{}}} overlap",
                antecedent, consequent
            )));
        }
        Ok(AssociationRule {
            antecedent_support: antecedent.support(),
            consequent_support: consequent.support(),
            antecedent,
            consequent,
            support,
            confidence,
        })
    }

    /// Build `antecedent -> consequent` with supports looked up in `store`.
    pub(crate) fn from_store(
        store: &FrequentItemsetStore,
        antecedent: &Itemset,
        consequent: &Itemset,
        support: f64,
    ) -> Result<Self> {
        let ant = store.get(antecedent.items())?;
        let cons = store.get(consequent.items())?;
        let confidence = support / ant.support();
        Self::new(ant, cons, support, confidence)
    }

    pub fn antecedent(&self) -> &Itemset {
        &self.antecedent
    }

    pub fn consequent(&self) -> &Itemset {
        &self.consequent
    }

    pub fn support(&self) -> f64 {
        self.support
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn antecedent_support(&self) -> f64 {
        self.antecedent_support
    }

    pub fn consequent_support(&self) -> f64 {
        self.consequent_support
    }

    /// `self` follows from `other`: all of its items are in `other`'s and
    /// its antecedent is no more frequent than `other`'s.
    pub fn is_covered_by(&self, other: &AssociationRule) -> bool {
        let mine = self.antecedent.union(&self.consequent);
        let theirs = other.antecedent.union(&other.consequent);
        mine.is_included_in(&theirs) && self.antecedent_support <= other.antecedent_support
    }

    pub fn compare_by(&self, other: &AssociationRule, order: RuleOrder) -> Ordering {
        match order {
            RuleOrder::AntecedentSize => self.antecedent.len().cmp(&other.antecedent.len()),
            RuleOrder::ConsequentSize => self.consequent.len().cmp(&other.consequent.len()),
            RuleOrder::Support => self.support.total_cmp(&other.support),
            RuleOrder::Confidence => self.confidence.total_cmp(&other.confidence),
        }
    }

    pub fn metric(&self, metric: RuleMetric) -> f64 {
        metric.compute(self)
    }
}

impl PartialEq for AssociationRule {
    fn eq(&self, other: &Self) -> bool {
        self.antecedent == other.antecedent && self.consequent == other.consequent
    }
}

impl fmt::Display for AssociationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}} -> {{{}}} ({}, {})", self.antecedent, self.consequent, self.support, self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrder {
    AntecedentSize,
    ConsequentSize,
    Support,
    Confidence,
}

/// Stable sort of `rules` by `order`.
pub fn sort_rules(rules: &mut [AssociationRule], order: RuleOrder, descending: bool) {
    if descending {
        rules.sort_by(|a, b| b.compare_by(a, order));
    } else {
        rules.sort_by(|a, b| a.compare_by(b, order));
    }
}

const METRIC_NAMES: &[&str] = &[
    "support", "confidence", "lift", "leverage", "influence", "conviction", "jaccard", "certainty", "kulczynski",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMetric {
    Support,
    Confidence,
    Lift,
    /// Piatetsky-Shapiro.
    Leverage,
    Influence,
    Conviction,
    Jaccard,
    Certainty,
    Kulczynski,
}

const METRICS: [RuleMetric; 9] = [
    RuleMetric::Support,
    RuleMetric::Confidence,
    RuleMetric::Lift,
    RuleMetric::Leverage,
    RuleMetric::Influence,
    RuleMetric::Conviction,
    RuleMetric::Jaccard,
    RuleMetric::Certainty,
    RuleMetric::Kulczynski,
];

impl RuleMetric {
    pub fn name(self) -> &'static str {
        METRIC_NAMES[self as usize]
    }

    #[inline]
    pub fn compute(self, rule: &AssociationRule) -> f64 {
        let s_ac = rule.support;
        let s_a = rule.antecedent_support;
        let s_c = rule.consequent_support;
        let confidence = rule.confidence;
        match self {
            RuleMetric::Support => s_ac,
            RuleMetric::Confidence => confidence,
            RuleMetric::Lift => {
                if s_c == 0.0 { f64::INFINITY } else { confidence / s_c }
            }
            RuleMetric::Leverage => s_ac - s_a * s_c,
            RuleMetric::Influence => confidence - s_c,
            RuleMetric::Conviction => {
                if confidence >= 1.0 { f64::INFINITY } else { (1.0 - s_c) / (1.0 - confidence) }
            }
            RuleMetric::Jaccard => {
                let jd = s_a + s_c - s_ac;
                if jd == 0.0 { 0.0 } else { s_ac / jd }
            }
            RuleMetric::Certainty => {
                let cd = 1.0 - s_c;
                if cd == 0.0 { 0.0 } else { (confidence - s_c) / cd }
            }
            RuleMetric::Kulczynski => {
                let conf_ca = if s_c == 0.0 { f64::INFINITY } else { s_ac / s_c };
                (confidence + conf_ca) / 2.0
            }
        }
    }
}

impl FromStr for RuleMetric {
    type Err = MiningError;

    fn from_str(s: &str) -> Result<Self> {
        METRIC_NAMES
            .iter()
            .position(|&m| m == s)
            .map(|i| METRICS[i])
            .ok_or_else(|| MiningError::invalid(format!("unknown metric '{}'", s)))
    }
}

/// Optional restrictions on the rules generated from a store.
/// A size limit of `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConstraints {
    pub required_in_antecedent: Option<Itemset>,
    pub required_in_consequent: Option<Itemset>,
    pub ignored_items: Option<Itemset>,
    pub max_antecedent_size: Option<usize>,
    pub min_consequent_size: Option<usize>,
}

impl RuleConstraints {
    pub fn is_unconstrained(&self) -> bool {
        *self == RuleConstraints::default()
    }

    /// Whether rules drawn from `itemset` can satisfy the constraints at all.
    fn admits_itemset(&self, itemset: &Itemset) -> bool {
        if self.ignored_items.as_ref().map_or(false, |ig| itemset.intersects(ig)) {
            return false;
        }
        if self.required_in_antecedent.as_ref().map_or(false, |r| !r.is_included_in(itemset)) {
            return false;
        }
        if self.required_in_consequent.as_ref().map_or(false, |r| !r.is_included_in(itemset)) {
            return false;
        }
        itemset.len() >= 2 && self.min_consequent_size.map_or(true, |m| itemset.len() > m)
    }
}

/// Receives rules as a generator finds them.
pub trait RuleSink {
    fn write_rule(&mut self, rule: &AssociationRule) -> Result<()>;
}

impl<S: RuleSink + ?Sized> RuleSink for &mut S {
    fn write_rule(&mut self, rule: &AssociationRule) -> Result<()> {
        (**self).write_rule(rule)
    }
}

impl RuleSink for Vec<AssociationRule> {
    fn write_rule(&mut self, rule: &AssociationRule) -> Result<()> {
        self.push(rule.clone());
        Ok(())
    }
}

pub trait RuleGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream the rules with confidence at least `min_confidence` drawn from
    /// `store` into `sink`. Returns how many were written.
    fn generate_into(
        &self,
        store: &FrequentItemsetStore,
        min_confidence: f64,
        sink: &mut dyn RuleSink,
    ) -> Result<u64>;

    fn generate(&self, store: &FrequentItemsetStore, min_confidence: f64) -> Result<Vec<AssociationRule>> {
        let mut rules = Vec::new();
        self.generate_into(store, min_confidence, &mut rules)?;
        Ok(rules)
    }

    fn run(&self, store: &FrequentItemsetStore, min_confidence: f64) -> Outcome<Vec<AssociationRule>> {
        self.generate(store, min_confidence).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    Apriori,
    Cover,
    CoverOpt,
}

impl RuleKind {
    /// Only exhaustive generation honours constraints; the cover generators
    /// reject them.
    pub fn build(
        self,
        cancel: CancellationToken,
        constraints: RuleConstraints,
        index: IndexConfig,
    ) -> Result<Box<dyn RuleGenerator>> {
        if self != RuleKind::Apriori && !constraints.is_unconstrained() {
            return Err(MiningError::invalid(format!("{:?} rule generation does not support constraints", self)));
        }
        Ok(match self {
            RuleKind::Apriori => Box::new(
                AprioriRules::new()
                    .with_cancel(cancel)
                    .with_constraints(constraints)
                    .with_index(index.leaf_capacity, index.hash_width),
            ),
            RuleKind::Cover => Box::new(CoverRules::new().with_cancel(cancel)),
            RuleKind::CoverOpt => Box::new(CoverRulesOpt::new().with_cancel(cancel)),
        })
    }
}

/// Exhaustive rule generation: grow the consequents of every frequent
/// itemset level by level, dropping a consequent as soon as its rule falls
/// below the confidence threshold.
#[derive(Debug, Clone, Default)]
pub struct AprioriRules {
    cancel: CancellationToken,
    constraints: RuleConstraints,
    index: IndexConfig,
}

impl AprioriRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_constraints(mut self, constraints: RuleConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_index(mut self, leaf_capacity: usize, hash_width: usize) -> Self {
        self.index = IndexConfig { leaf_capacity, hash_width };
        self
    }

    fn ap_genrules(
        &self,
        store: &FrequentItemsetStore,
        frequent: &Itemset,
        min_confidence: f64,
        sink: &mut dyn RuleSink,
    ) -> Result<u64> {
        let c = &self.constraints;
        let mut written = 0;
        let mut consequents: Vec<Itemset> = frequent.items().iter().map(|&i| Itemset::singleton(i)).collect();

        while !consequents.is_empty() && frequent.len() > consequents[0].len() {
            let mut kept = Vec::with_capacity(consequents.len());
            for consequent in consequents {
                let antecedent = frequent.subtract(&consequent);
                let confidence = frequent.support() / store.support(antecedent.items())?;
                if confidence < min_confidence {
                    continue;
                }
                // a larger consequent only shrinks the antecedent further
                if c.required_in_antecedent.as_ref().map_or(false, |r| !r.is_included_in(&antecedent)) {
                    continue;
                }
                let emit = c.required_in_consequent.as_ref().map_or(true, |r| r.is_included_in(&consequent))
                    && c.max_antecedent_size.map_or(true, |m| antecedent.len() <= m)
                    && c.min_consequent_size.map_or(true, |m| consequent.len() >= m);
                if emit {
                    sink.write_rule(&AssociationRule::from_store(store, &antecedent, &consequent, frequent.support())?)?;
                    written += 1;
                }
                kept.push(consequent);
            }
            consequents = apriori_gen(&kept, self.index.leaf_capacity, self.index.hash_width)?;
        }
        Ok(written)
    }
}

impl RuleGenerator for AprioriRules {
    fn name(&self) -> &'static str {
        "apriori"
    }

    fn generate_into(
        &self,
        store: &FrequentItemsetStore,
        min_confidence: f64,
        sink: &mut dyn RuleSink,
    ) -> Result<u64> {
        validate_fraction("min_confidence", min_confidence)?;
        let frequent: Vec<Itemset> =
            store.itemsets().into_iter().filter(|is| self.constraints.admits_itemset(is)).collect();
        debug!(itemsets = frequent.len(), "rule bases after constraints");

        let mut written = 0;
        for is in &frequent {
            self.cancel.checkpoint()?;
            written += self.ap_genrules(store, is, min_confidence, sink)?;
        }
        info!(generator = self.name(), rules = written, "rule generation finished");
        Ok(written)
    }
}
