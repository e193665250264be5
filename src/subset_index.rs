//! Hash tree over same-size itemsets.
//!
//! Interior nodes hash on the item at their depth, leaves hold up to
//! `leaf_capacity` itemset indices. A query walks every path of a row that
//! can still spell a full itemset and tests the members of each reached
//! leaf with an ordered inclusion check. Leaves are flagged while a query
//! runs so a leaf reachable through several paths is processed once.

use tracing::debug;

use crate::error::{MiningError, Result};
use crate::itemset::{is_subset, Item, Itemset};

pub const DEFAULT_LEAF_CAPACITY: usize = 20;
pub const DEFAULT_HASH_WIDTH: usize = 40;

const NO_CHILD: u32 = u32::MAX;

#[derive(Debug)]
enum Node {
    Leaf(Vec<u32>),
    /// `hash_width` slots, `NO_CHILD` when empty.
    Interior(Vec<u32>),
}

/// A leaf at full depth is full and cannot be split any further.
struct Overflow;

/// Per-(indexed itemset, item) co-occurrence counts gathered while scanning.
/// Column `item - 1` of row `i` counts the rows that contain indexed
/// itemset `i` together with `item`.
#[derive(Debug, Clone)]
pub struct CooccurrenceCounts {
    cols: usize,
    counts: Vec<u64>,
}

impl CooccurrenceCounts {
    pub fn new(rows: usize, cols: usize) -> Self {
        CooccurrenceCounts { cols, counts: vec![0; rows * cols] }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        if self.cols == 0 { 0 } else { self.counts.len() / self.cols }
    }

    /// Counts for indexed itemset `row`; entry `j` belongs to item `j + 1`.
    pub fn row(&self, row: usize) -> &[u64] {
        &self.counts[row * self.cols..(row + 1) * self.cols]
    }

    pub fn get(&self, row: usize, item: Item) -> u64 {
        self.counts[row * self.cols + item as usize - 1]
    }
}

#[derive(Debug)]
pub struct SubsetIndex {
    itemsets: Vec<Itemset>,
    nodes: Vec<Node>,
    order: usize,
    leaf_capacity: usize,
    hash_width: usize,
    visited: Vec<bool>,
    touched: Vec<u32>,
}

impl Default for SubsetIndex {
    fn default() -> Self {
        SubsetIndex {
            itemsets: Vec::new(),
            nodes: vec![Node::Leaf(Vec::new())],
            order: 0,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            hash_width: DEFAULT_HASH_WIDTH,
            visited: Vec::new(),
            touched: Vec::new(),
        }
    }
}

impl SubsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(leaf_capacity: usize, hash_width: usize) -> Result<Self> {
        if leaf_capacity == 0 || hash_width == 0 {
            return Err(MiningError::invalid("leaf capacity and hash width must be positive"));
        }
        Ok(SubsetIndex { leaf_capacity, hash_width, ..Self::default() })
    }

    /// Index every itemset of `itemsets`, in order.
    pub fn build<I>(itemsets: I, leaf_capacity: usize, hash_width: usize) -> Result<Self>
    where
        I: IntoIterator<Item = Itemset>,
    {
        let mut index = Self::with_params(leaf_capacity, hash_width)?;
        for is in itemsets {
            index.push(is)?;
        }
        Ok(index)
    }

    /// Add an itemset and return its position. All indexed itemsets share
    /// the size of the first one.
    pub fn push(&mut self, itemset: Itemset) -> Result<usize> {
        if itemset.is_empty() {
            return Err(MiningError::invalid("cannot index the empty itemset"));
        }
        if self.itemsets.is_empty() {
            self.order = itemset.len();
        } else if itemset.len() != self.order {
            return Err(MiningError::invalid(format!(
                "cannot index an itemset of size {} next to itemsets of size {}",
                itemset.len(),
                self.order
            )));
        }
        if self.contains(&itemset) {
            return Err(MiningError::invalid(format!("itemset {{{}}} is already indexed", itemset)));
        }

        let idx = self.itemsets.len();
        self.itemsets.push(itemset);
        if self.insert(0, 0, idx as u32).is_err() {
            self.rebuild_wider();
        }
        Ok(idx)
    }

    pub fn contains(&self, itemset: &Itemset) -> bool {
        if itemset.len() != self.order {
            return false;
        }
        let items = itemset.items();
        let mut node = 0usize;
        let mut level = 0usize;
        loop {
            match &self.nodes[node] {
                Node::Leaf(members) => {
                    return members.iter().any(|&m| self.itemsets[m as usize].items() == items);
                }
                Node::Interior(children) => {
                    let child = children[items[level] as usize % children.len()];
                    if child == NO_CHILD {
                        return false;
                    }
                    node = child as usize;
                    level += 1;
                }
            }
        }
    }

    fn insert(&mut self, node: u32, level: usize, idx: u32) -> std::result::Result<(), Overflow> {
        let capacity = self.leaf_capacity;
        let (key, child) = match &mut self.nodes[node as usize] {
            Node::Leaf(members) => {
                if members.len() < capacity {
                    members.push(idx);
                    return Ok(());
                }
                if level == self.order {
                    return Err(Overflow);
                }
                let members = std::mem::take(members);
                self.nodes[node as usize] = Node::Interior(vec![NO_CHILD; self.hash_width]);
                for m in members {
                    self.insert(node, level, m)?;
                }
                return self.insert(node, level, idx);
            }
            Node::Interior(children) => {
                let key = self.itemsets[idx as usize].items()[level] as usize % children.len();
                (key, children[key])
            }
        };

        if child != NO_CHILD {
            return self.insert(child, level + 1, idx);
        }
        let leaf = self.nodes.len() as u32;
        let mut members = Vec::with_capacity(capacity);
        members.push(idx);
        self.nodes.push(Node::Leaf(members));
        if let Node::Interior(children) = &mut self.nodes[node as usize] {
            children[key] = leaf;
        }
        Ok(())
    }

    fn rebuild_wider(&mut self) {
        loop {
            self.hash_width = 2 * self.hash_width + 1;
            debug!(hash_width = self.hash_width, itemsets = self.itemsets.len(), "subset index overflow, widening");
            self.nodes.clear();
            self.nodes.push(Node::Leaf(Vec::with_capacity(self.leaf_capacity)));
            let n = self.itemsets.len() as u32;
            if (0..n).try_for_each(|i| self.insert(0, 0, i)).is_ok() {
                break;
            }
        }
    }

    /// Run `visit` on every indexed itemset stored in a leaf reachable from
    /// `row`. Candidates still need an inclusion test.
    fn visit_candidates<F>(&mut self, row: &[Item], mut visit: F)
    where
        F: FnMut(usize, &mut Itemset),
    {
        if self.itemsets.is_empty() {
            return;
        }
        let mut touched = std::mem::take(&mut self.touched);
        touched.clear();
        self.visited.resize(self.nodes.len(), false);
        collect_leaves(&self.nodes, &mut self.visited, &mut touched, 0, row, 0, 0, self.order);

        for &leaf in &touched {
            self.visited[leaf as usize] = false;
            if let Node::Leaf(members) = &self.nodes[leaf as usize] {
                for &m in members {
                    visit(m as usize, &mut self.itemsets[m as usize]);
                }
            }
        }
        self.touched = touched;
    }

    /// Increment the weight of every indexed itemset included in `row`.
    pub fn update(&mut self, row: &[Item]) {
        self.visit_candidates(row, |_, is| {
            if is_subset(is.items(), row) {
                is.increment_weight();
            }
        });
    }

    /// Like [`update`](Self::update), and also count, for every matched
    /// itemset, each item of `row` in `counts`.
    pub fn update_with_counts(&mut self, row: &[Item], counts: &mut CooccurrenceCounts) -> Result<()> {
        if counts.rows() != self.itemsets.len() {
            return Err(MiningError::invalid(format!(
                "co-occurrence matrix has {} rows for {} indexed itemsets",
                counts.rows(),
                self.itemsets.len()
            )));
        }
        if let Some(&last) = row.last() {
            if last as usize > counts.cols {
                return Err(MiningError::invalid(format!(
                    "item {} exceeds the {} columns of the co-occurrence matrix",
                    last, counts.cols
                )));
            }
        }
        let cols = counts.cols;
        let data = &mut counts.counts;
        self.visit_candidates(row, |i, is| {
            if is_subset(is.items(), row) {
                is.increment_weight();
                let base = i * cols;
                for &item in row {
                    data[base + item as usize - 1] += 1;
                }
            }
        });
        Ok(())
    }

    /// Number of indexed itemsets included in `items`.
    pub fn count_subsets(&mut self, items: &[Item]) -> usize {
        let mut n = 0;
        self.visit_candidates(items, |_, is| {
            if is_subset(is.items(), items) {
                n += 1;
            }
        });
        n
    }

    /// Number of indexed itemsets included in `items` with weight at least `min_weight`.
    pub fn count_frequent_subsets(&mut self, items: &[Item], min_weight: u64) -> usize {
        let mut n = 0;
        self.visit_candidates(items, |_, is| {
            if is.weight() >= min_weight && is_subset(is.items(), items) {
                n += 1;
            }
        });
        n
    }

    /// Mark every indexed itemset included in `items`.
    pub fn check_largeness(&mut self, items: &[Item]) {
        self.visit_candidates(items, |_, is| {
            if is_subset(is.items(), items) {
                is.mark();
            }
        });
    }

    pub fn itemsets(&self) -> &[Itemset] {
        &self.itemsets
    }

    pub fn get(&self, idx: usize) -> Option<&Itemset> {
        self.itemsets.get(idx)
    }

    pub fn into_itemsets(self) -> Vec<Itemset> {
        self.itemsets
    }

    pub fn len(&self) -> usize {
        self.itemsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itemsets.is_empty()
    }

    /// Size of the indexed itemsets, 0 while empty.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn hash_width(&self) -> usize {
        self.hash_width
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_leaves(
    nodes: &[Node],
    visited: &mut [bool],
    touched: &mut Vec<u32>,
    node: u32,
    row: &[Item],
    start: usize,
    level: usize,
    order: usize,
) {
    match &nodes[node as usize] {
        Node::Leaf(_) => {
            if !visited[node as usize] {
                visited[node as usize] = true;
                touched.push(node);
            }
        }
        Node::Interior(children) => {
            // leave enough items after position i to finish a full path
            let end = row.len().saturating_sub(order - level - 1);
            for i in start..end {
                let child = children[row[i] as usize % children.len()];
                if child != NO_CHILD {
                    collect_leaves(nodes, visited, touched, child, row, i + 1, level + 1, order);
                }
            }
        }
    }
}
