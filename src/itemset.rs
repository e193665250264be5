use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MiningError, Result};

/// Item identifier. Ids are positive; `0` is rejected everywhere.
pub type Item = u32;

/// An ordered, duplicate-free set of items together with its support
/// (fraction of rows) and weight (number of rows).
///
/// Equality, ordering and hashing only look at the items.
#[derive(Debug, Clone, Default)]
pub struct Itemset {
    items: Vec<Item>,
    support: f64,
    weight: u64,
    mark: bool,
}

impl Itemset {
    pub fn new() -> Self {
        Itemset::default()
    }

    /// Build an itemset from arbitrary ids; they are sorted and deduplicated.
    pub fn from_items<I: IntoIterator<Item = Item>>(items: I) -> Result<Self> {
        let mut items: Vec<Item> = items.into_iter().collect();
        if items.iter().any(|&i| i == 0) {
            return Err(MiningError::invalid("item ids must be positive"));
        }
        items.sort_unstable();
        items.dedup();
        Ok(Itemset { items, ..Itemset::default() })
    }

    /// Caller guarantees `items` is strictly increasing and non-zero.
    pub(crate) fn from_sorted(items: Vec<Item>) -> Self {
        debug_assert!(items.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(items.first().map_or(true, |&i| i > 0));
        Itemset { items, ..Itemset::default() }
    }

    pub(crate) fn singleton(item: Item) -> Self {
        Itemset::from_sorted(vec![item])
    }

    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Item> {
        self.items.get(i).copied()
    }

    pub fn last(&self) -> Option<Item> {
        self.items.last().copied()
    }

    pub fn support(&self) -> f64 {
        self.support
    }

    pub fn set_support(&mut self, support: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&support) {
            return Err(MiningError::invalid(format!("support {} outside [0, 1]", support)));
        }
        self.support = support;
        Ok(())
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: u64) {
        self.weight = weight;
    }

    #[inline]
    pub fn increment_weight(&mut self) {
        self.weight += 1;
    }

    /// Set weight and derive support from the number of rows it was counted over.
    pub(crate) fn set_counts(&mut self, weight: u64, num_rows: u64) {
        self.weight = weight;
        self.support = if num_rows == 0 { 0.0 } else { (weight as f64 / num_rows as f64).min(1.0) };
    }

    pub(crate) fn with_counts(mut self, weight: u64, num_rows: u64) -> Self {
        self.set_counts(weight, num_rows);
        self
    }

    pub(crate) fn with_support(mut self, support: f64) -> Self {
        self.support = support;
        self
    }

    /// Insert `item` at its sorted position. Returns false if already present.
    pub fn insert(&mut self, item: Item) -> Result<bool> {
        if item == 0 {
            return Err(MiningError::invalid("item ids must be positive"));
        }
        match self.items.binary_search(&item) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.items.insert(pos, item);
                Ok(true)
            }
        }
    }

    pub fn remove_last(&mut self) -> Option<Item> {
        self.items.pop()
    }

    /// Ordered two-pointer subset test.
    pub fn is_included_in(&self, other: &Itemset) -> bool {
        is_subset(&self.items, &other.items)
    }

    pub fn intersects(&self, other: &Itemset) -> bool {
        let (a, b) = (&self.items, &other.items);
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => return true,
                Ordering::Greater => j += 1,
                Ordering::Less => i += 1,
            }
        }
        false
    }

    /// Two itemsets of equal size combine when they differ only in the last item.
    pub fn can_combine_with(&self, other: &Itemset) -> bool {
        let n = self.items.len();
        if n == 0 || n != other.items.len() {
            return false;
        }
        self.items[..n - 1] == other.items[..n - 1] && self.items[n - 1] != other.items[n - 1]
    }

    /// This itemset's items plus the last item of `other`; counts start at zero.
    pub fn combine(&self, other: &Itemset) -> Result<Itemset> {
        if self.items.len() != other.items.len() {
            return Err(MiningError::invalid(format!(
                "cannot combine itemsets of sizes {} and {}",
                self.items.len(),
                other.items.len()
            )));
        }
        if !self.can_combine_with(other) {
            return Err(MiningError::invalid(format!("itemsets {{{}}} and {{{}}} are not combinable", self, other)));
        }
        let n = self.items.len();
        let (a, b) = (self.items[n - 1], other.items[n - 1]);
        let mut items = Vec::with_capacity(n + 1);
        items.extend_from_slice(&self.items[..n - 1]);
        items.push(a.min(b));
        items.push(a.max(b));
        Ok(Itemset::from_sorted(items))
    }

    /// Items of `self` that are not in `other`.
    pub fn subtract(&self, other: &Itemset) -> Itemset {
        let (a, b) = (&self.items, &other.items);
        let mut out = Vec::with_capacity(a.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                Ordering::Greater => j += 1,
                Ordering::Less => {
                    out.push(a[i]);
                    i += 1;
                }
            }
        }
        out.extend_from_slice(&a[i..]);
        Itemset::from_sorted(out)
    }

    pub fn union(&self, other: &Itemset) -> Itemset {
        let (a, b) = (&self.items, &other.items);
        let mut out = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
                Ordering::Greater => {
                    out.push(b[j]);
                    j += 1;
                }
                Ordering::Less => {
                    out.push(a[i]);
                    i += 1;
                }
            }
        }
        out.extend_from_slice(&a[i..]);
        out.extend_from_slice(&b[j..]);
        Itemset::from_sorted(out)
    }

    /// Sets the mark, returning the previous state.
    pub fn mark(&mut self) -> bool {
        std::mem::replace(&mut self.mark, true)
    }

    pub fn unmark(&mut self) -> bool {
        std::mem::replace(&mut self.mark, false)
    }

    pub fn is_marked(&self) -> bool {
        self.mark
    }

    /// Drop every itemset that is included in another one of `v`.
    /// Equal itemsets collapse into a single survivor.
    pub fn prune_non_maximal(v: &mut Vec<Itemset>) {
        let mut i = 0;
        while i < v.len() {
            let mut j = i + 1;
            while j < v.len() {
                if v[j].is_included_in(&v[i]) {
                    v.swap_remove(j);
                } else {
                    j += 1;
                }
            }
            let dominated = (i + 1..v.len()).any(|j| v[i].is_included_in(&v[j]));
            if dominated {
                v.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn prune_duplicates(v: &mut Vec<Itemset>) {
        let mut i = 0;
        while i < v.len() {
            let mut j = i + 1;
            while j < v.len() {
                if v[j] == v[i] {
                    v.swap_remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
}

/// Two-pointer inclusion test over sorted slices.
#[inline]
pub(crate) fn is_subset(small: &[Item], large: &[Item]) -> bool {
    if large.len() < small.len() {
        return false;
    }
    let mut i = 0;
    for &x in large {
        if i == small.len() || small[i] < x {
            break;
        }
        if small[i] == x {
            i += 1;
        }
    }
    i == small.len()
}

impl PartialEq for Itemset {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for Itemset {}

impl Hash for Itemset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.items.hash(state);
    }
}

impl PartialOrd for Itemset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Itemset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.items.cmp(&other.items)
    }
}

impl fmt::Display for Itemset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}

impl Serialize for Itemset {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Itemset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let items = Vec::<Item>::deserialize(deserializer)?;
        Itemset::from_items(items).map_err(serde::de::Error::custom)
    }
}
