//! Prefix tree of frequent itemsets and their supports.

use ahash::AHashMap;

use crate::error::{MiningError, Result};
use crate::io::ItemsetSink;
use crate::itemset::{Item, Itemset};

#[derive(Debug, Default)]
struct StoreNode {
    children: AHashMap<Item, u32>,
    support: f64,
    weight: u64,
    /// Set once an itemset ending here was inserted.
    terminal: bool,
}

/// Node `0` is the root and stands for the empty itemset, which is never stored.
#[derive(Debug)]
pub struct FrequentItemsetStore {
    nodes: Vec<StoreNode>,
    len: usize,
}

impl Default for FrequentItemsetStore {
    fn default() -> Self {
        FrequentItemsetStore { nodes: vec![StoreNode::default()], len: 0 }
    }
}

impl FrequentItemsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the itemsets of `itemsets` whose support is at least `min_support`.
    pub fn from_itemsets<I>(itemsets: I, min_support: f64) -> Result<Self>
    where
        I: IntoIterator<Item = Itemset>,
    {
        let mut store = Self::new();
        for is in itemsets {
            if is.support() >= min_support {
                store.insert(&is)?;
            }
        }
        Ok(store)
    }

    /// Store `itemset` with its support and weight, overwriting a previous entry.
    pub fn insert(&mut self, itemset: &Itemset) -> Result<()> {
        if itemset.is_empty() {
            return Err(MiningError::invalid("cannot store the empty itemset"));
        }
        let mut node = 0u32;
        for &item in itemset.items() {
            node = match self.nodes[node as usize].children.get(&item) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(StoreNode::default());
                    self.nodes[node as usize].children.insert(item, child);
                    child
                }
            };
        }
        let n = &mut self.nodes[node as usize];
        if !n.terminal {
            self.len += 1;
        }
        n.terminal = true;
        n.support = itemset.support();
        n.weight = itemset.weight();
        Ok(())
    }

    fn find(&self, items: &[Item]) -> Option<&StoreNode> {
        if items.is_empty() {
            return None;
        }
        let mut node = 0u32;
        for item in items {
            node = *self.nodes[node as usize].children.get(item)?;
        }
        let n = &self.nodes[node as usize];
        n.terminal.then_some(n)
    }

    fn not_found(items: &[Item]) -> MiningError {
        let s: Vec<String> = items.iter().map(|i| i.to_string()).collect();
        MiningError::NotFound(format!("{{{}}}", s.join(" ")))
    }

    pub fn support(&self, items: &[Item]) -> Result<f64> {
        self.find(items).map(|n| n.support).ok_or_else(|| Self::not_found(items))
    }

    pub fn weight(&self, items: &[Item]) -> Result<u64> {
        self.find(items).map(|n| n.weight).ok_or_else(|| Self::not_found(items))
    }

    /// Copy of the stored itemset with its support and weight filled in.
    pub fn get(&self, items: &[Item]) -> Result<Itemset> {
        let n = self.find(items).ok_or_else(|| Self::not_found(items))?;
        let mut is = Itemset::from_sorted(items.to_vec());
        is.set_weight(n.weight);
        Ok(is.with_support(n.support))
    }

    pub fn contains(&self, items: &[Item]) -> bool {
        self.find(items).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every stored itemset in pre-order: a prefix comes before its
    /// extensions and siblings are visited by ascending item.
    pub fn itemsets(&self) -> Vec<Itemset> {
        let mut out = Vec::with_capacity(self.len);
        let mut path = Vec::new();
        self.walk(0, &mut path, &mut |node: &StoreNode, path: &[Item]| {
            if node.terminal {
                let mut is = Itemset::from_sorted(path.to_vec());
                is.set_weight(node.weight);
                out.push(is.with_support(node.support));
            }
        });
        out
    }

    /// Stored itemsets with no stored strict superset.
    pub fn maximal_itemsets(&self) -> Vec<Itemset> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.collect_maximal(0, &mut path, &mut out);
        // an itemset can still be covered by a superset on another branch
        Itemset::prune_non_maximal(&mut out);
        out.sort();
        out
    }

    fn walk<F>(&self, node: u32, path: &mut Vec<Item>, visit: &mut F)
    where
        F: FnMut(&StoreNode, &[Item]),
    {
        let n = &self.nodes[node as usize];
        visit(n, path);
        let mut keys: Vec<(Item, u32)> = n.children.iter().map(|(&k, &v)| (k, v)).collect();
        keys.sort_unstable();
        for (item, child) in keys {
            path.push(item);
            self.walk(child, path, visit);
            path.pop();
        }
    }

    /// Returns whether the subtree under `node` holds a stored itemset.
    fn collect_maximal(&self, node: u32, path: &mut Vec<Item>, out: &mut Vec<Itemset>) -> bool {
        let n = &self.nodes[node as usize];
        let mut below = false;
        for (&item, &child) in &n.children {
            path.push(item);
            below |= self.collect_maximal(child, path, out);
            path.pop();
        }
        if n.terminal && !below {
            let mut is = Itemset::from_sorted(path.clone());
            is.set_weight(n.weight);
            out.push(is.with_support(n.support));
        }
        below || n.terminal
    }
}

impl ItemsetSink for FrequentItemsetStore {
    fn write_itemset(&mut self, itemset: &Itemset) -> Result<()> {
        self.insert(itemset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[Item], weight: u64, rows: u64) -> Itemset {
        Itemset::from_items(items.iter().copied()).unwrap().with_counts(weight, rows)
    }

    fn fixture() -> FrequentItemsetStore {
        let mut store = FrequentItemsetStore::new();
        for (items, w) in [(&[1][..], 4), (&[2], 4), (&[3], 4), (&[1, 2], 3), (&[1, 3], 3), (&[2, 3], 3)] {
            store.insert(&set(items, w, 5)).unwrap();
        }
        store
    }

    #[test]
    fn test_lookup() {
        let store = fixture();
        assert_eq!(store.len(), 6);
        assert_eq!(store.support(&[1, 2]).unwrap(), 0.6);
        assert_eq!(store.weight(&[3]).unwrap(), 4);
        assert!(matches!(store.support(&[1, 2, 3]), Err(MiningError::NotFound(_))));
        assert!(matches!(store.support(&[]), Err(MiningError::NotFound(_))));
        assert_eq!(store.get(&[2, 3]).unwrap().weight(), 3);
    }

    #[test]
    fn test_prefix_without_entry_is_missing() {
        let mut store = FrequentItemsetStore::new();
        store.insert(&set(&[4, 7, 9], 2, 10)).unwrap();
        assert!(store.contains(&[4, 7, 9]));
        assert!(!store.contains(&[4, 7]));
        assert!(store.support(&[4]).is_err());
    }

    #[test]
    fn test_enumeration_is_preorder() {
        let items: Vec<Vec<Item>> = fixture().itemsets().iter().map(|is| is.items().to_vec()).collect();
        assert_eq!(items, vec![vec![1], vec![1, 2], vec![1, 3], vec![2], vec![2, 3], vec![3]]);
    }

    #[test]
    fn test_maximal() {
        let store = fixture();
        let max: Vec<Vec<Item>> = store.maximal_itemsets().iter().map(|is| is.items().to_vec()).collect();
        assert_eq!(max, vec![vec![1, 2], vec![1, 3], vec![2, 3]]);

        let mut store = fixture();
        store.insert(&set(&[1, 2, 3], 2, 5)).unwrap();
        let max = store.maximal_itemsets();
        assert_eq!(max.len(), 1);
        assert_eq!(max[0].items(), &[1, 2, 3]);
    }

    #[test]
    fn test_reinsert_keeps_count() {
        let mut store = fixture();
        store.insert(&set(&[1], 5, 5)).unwrap();
        assert_eq!(store.len(), 6);
        assert_eq!(store.support(&[1]).unwrap(), 1.0);
    }

    #[test]
    fn test_from_itemsets_filters() {
        let store = FrequentItemsetStore::from_itemsets(fixture().itemsets(), 0.7).unwrap();
        assert_eq!(store.len(), 3);
        assert!(!store.contains(&[1, 2]));
    }
}
