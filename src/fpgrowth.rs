//! FP-Growth: count items, build the FP-tree, mine it recursively through
//! conditional trees. Itemsets are streamed to the sink as they are found.

use tracing::{debug, info, trace};

use crate::cancel::CancellationToken;
use crate::common::{count_item_support, effective_min_weight, validate_fraction};
use crate::error::Result;
use crate::io::{scan, ItemsetSink, TransactionSource};
use crate::itemset::{Item, Itemset};
use crate::miner::{Miner, MiningStats};

/// Item slot of the root node.
const ROOT: u32 = u32::MAX;
/// Marks an item dropped from a conditional tree.
const DROPPED: u32 = u32::MAX;

/// One FP-tree node. Its children are a contiguous run `[first, first + len)`
/// of `FPTree::edges`.
#[derive(Debug, Clone, Copy)]
struct FPNode {
    item: u32,
    count: u64,
    parent: u32,
    first: u32,
    len: u32,
}

/// FP-tree over local item ids. Local ids follow descending item count (ties
/// broken by item id), so a branch sorted by local id runs from the most to
/// the least frequent item.
struct FPTree {
    nodes: Vec<FPNode>,
    /// `(local item, node)` edges, grouped per parent.
    edges: Vec<(u32, u32)>,
    /// Node-links: the nodes carrying each local id.
    item_nodes: Vec<Vec<u32>>,
    original_items: Vec<Item>,
    /// Suffix the tree is conditioned on.
    cond_items: Vec<Item>,
    single_path: bool,
}

impl FPTree {
    fn new(original_items: Vec<Item>, cond_items: Vec<Item>) -> Self {
        FPTree {
            nodes: vec![FPNode { item: ROOT, count: 0, parent: 0, first: 0, len: 0 }],
            edges: Vec::new(),
            item_nodes: vec![Vec::new(); original_items.len()],
            original_items,
            cond_items,
            single_path: true,
        }
    }

    #[inline]
    fn is_path(&self) -> bool {
        self.single_path
    }

    #[inline]
    fn num_items(&self) -> usize {
        self.original_items.len()
    }

    /// Node under `parent` for `item`, created with a zero count if missing.
    fn child(&mut self, parent: u32, item: u32) -> u32 {
        let FPNode { first, len, .. } = self.nodes[parent as usize];
        let run = first as usize..(first + len) as usize;
        if let Some(&(_, node)) = self.edges[run.clone()].iter().find(|&&(it, _)| it == item) {
            return node;
        }

        let node = self.nodes.len() as u32;
        self.nodes.push(FPNode { item, count: 0, parent, first: 0, len: 0 });
        self.item_nodes[item as usize].push(node);
        if len > 0 {
            self.single_path = false;
        }
        // a run that does not end the edge list is moved to its end first
        if len > 0 && run.end != self.edges.len() {
            self.edges.extend_from_within(run);
            self.nodes[parent as usize].first = (self.edges.len() - len as usize) as u32;
        } else if len == 0 {
            self.nodes[parent as usize].first = self.edges.len() as u32;
        }
        self.edges.push((item, node));
        self.nodes[parent as usize].len += 1;
        node
    }

    /// Add `count` transactions along `branch`, which must be sorted by
    /// local id.
    fn insert_branch(&mut self, branch: &[u32], count: u64) {
        self.nodes[0].count += count;
        let mut at = 0;
        for &item in branch {
            at = self.child(at, item);
            self.nodes[at as usize].count += count;
        }
    }

    fn item_weight(&self, item: u32) -> u64 {
        self.item_nodes[item as usize].iter().map(|&n| self.nodes[n as usize].count).sum()
    }

    /// Local ids on the path from `node`'s parent up to the root, leaf side
    /// first.
    fn prefix_path(&self, node: u32, path: &mut Vec<u32>) {
        path.clear();
        let mut at = self.nodes[node as usize].parent;
        while self.nodes[at as usize].item != ROOT {
            path.push(self.nodes[at as usize].item);
            at = self.nodes[at as usize].parent;
        }
    }

    /// Conditional tree for `item`: its prefix paths, weighted by the count
    /// of the node they lead to, keeping only items that reach `min_weight`.
    fn conditional_tree(&self, item: u32, min_weight: u64) -> FPTree {
        let links = &self.item_nodes[item as usize];
        let mut paths: Vec<(Vec<u32>, u64)> = Vec::with_capacity(links.len());
        // every ancestor has a smaller local id than `item`
        let mut weights = vec![0u64; item as usize];
        let mut path = Vec::new();
        for &node in links {
            self.prefix_path(node, &mut path);
            let count = self.nodes[node as usize].count;
            path.iter().for_each(|&it| weights[it as usize] += count);
            paths.push((path.clone(), count));
        }

        let mut kept: Vec<u32> = (0..item).filter(|&it| weights[it as usize] >= min_weight).collect();
        kept.sort_unstable_by_key(|&it| (std::cmp::Reverse(weights[it as usize]), self.original_items[it as usize]));
        let mut relabel = vec![DROPPED; item as usize];
        for (new_id, &old_id) in kept.iter().enumerate() {
            relabel[old_id as usize] = new_id as u32;
        }

        let mut cond_items = self.cond_items.clone();
        cond_items.push(self.original_items[item as usize]);
        let mut tree = FPTree::new(kept.iter().map(|&it| self.original_items[it as usize]).collect(), cond_items);
        for (path, count) in &mut paths {
            path.retain_mut(|it| {
                *it = relabel[*it as usize];
                *it != DROPPED
            });
            if !path.is_empty() {
                path.sort_unstable();
                tree.insert_branch(path, *count);
            }
        }
        tree
    }
}

/// Index combinations of `n` elements taken `size` at a time, in lexicographic order.
fn combinations(n: usize, size: usize) -> impl Iterator<Item = Vec<usize>> {
    let mut indices: Vec<usize> = (0..size).collect();
    let mut first = true;
    std::iter::from_fn(move || {
        if size == 0 || n < size {
            return None;
        }
        if first {
            first = false;
        } else {
            let mut i = size;
            loop {
                if i == 0 {
                    return None;
                }
                i -= 1;
                if indices[i] < n - size + i {
                    break;
                }
            }
            indices[i] += 1;
            for j in i + 1..size {
                indices[j] = indices[j - 1] + 1;
            }
        }
        Some(indices.clone())
    })
}

struct Emitter<'a> {
    sink: &'a mut dyn ItemsetSink,
    num_rows: u64,
    emitted: u64,
    buf: Vec<Item>,
}

impl Emitter<'_> {
    fn emit(&mut self, suffix: &[Item], extra: impl Iterator<Item = Item>, weight: u64) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(suffix);
        self.buf.extend(extra);
        self.buf.sort_unstable();
        let is = Itemset::from_sorted(self.buf.clone()).with_counts(weight, self.num_rows);
        trace!(itemset = %is, weight, "frequent itemset");
        self.sink.write_itemset(&is)?;
        self.emitted += 1;
        Ok(())
    }
}

/// Frequent-itemset miner built on FP-trees. Mining is single-threaded.
#[derive(Debug, Clone, Default)]
pub struct FpGrowth {
    cancel: CancellationToken,
    max_len: Option<usize>,
}

impl FpGrowth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Skip itemsets longer than `max_len`.
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    fn fpg_step(&self, tree: &FPTree, min_weight: u64, out: &mut Emitter<'_>) -> Result<()> {
        self.cancel.checkpoint()?;
        let num_items = tree.num_items();
        let cond_len = tree.cond_items.len();

        if tree.is_path() {
            // every subset of a single path is frequent; its weight is the
            // count of its deepest node
            let max_size = self.max_len.map_or(num_items, |ml| ml.saturating_sub(cond_len).min(num_items));
            for size in 1..=max_size {
                for combo in combinations(num_items, size) {
                    let weight = combo
                        .iter()
                        .map(|&local| tree.nodes[tree.item_nodes[local][0] as usize].count)
                        .min()
                        .unwrap_or(0);
                    out.emit(&tree.cond_items, combo.iter().map(|&l| tree.original_items[l]), weight)?;
                }
            }
            return Ok(());
        }

        if self.max_len.map_or(false, |ml| ml <= cond_len) {
            return Ok(());
        }
        let grow = self.max_len.map_or(true, |ml| cond_len + 1 < ml);
        for local_id in (0..num_items as u32).rev() {
            let weight = tree.item_weight(local_id);
            out.emit(&tree.cond_items, std::iter::once(tree.original_items[local_id as usize]), weight)?;
            if grow {
                let cond_tree = tree.conditional_tree(local_id, min_weight);
                if cond_tree.num_items() > 0 {
                    self.fpg_step(&cond_tree, min_weight, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Miner for FpGrowth {
    fn name(&self) -> &'static str {
        "fpgrowth"
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

        self.cancel.checkpoint()?;
        let item_count = count_item_support(source)?;

        let mut frequent: Vec<(Item, u64)> = item_count
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c >= min_weight)
            .map(|(item, &c)| (item as Item, c))
            .collect();
        frequent.sort_unstable_by_key(|&(item, c)| (std::cmp::Reverse(c), item));
        debug!(frequent_items = frequent.len(), min_weight, "counted items");

        let mut stats = MiningStats { passes: 1, itemsets: 0, min_weight, num_rows };
        if frequent.is_empty() {
            sink.flush()?;
            return Ok(stats);
        }

        let mut global_to_local = vec![u32::MAX; item_count.len()];
        let mut original_items = Vec::with_capacity(frequent.len());
        for (local_id, &(item, _)) in frequent.iter().enumerate() {
            global_to_local[item as usize] = local_id as u32;
            original_items.push(item);
        }

        self.cancel.checkpoint()?;
        let mut branches: Vec<Vec<u32>> = Vec::with_capacity(num_rows as usize);
        scan(source, |row| {
            let mut branch: Vec<u32> = row
                .iter()
                .filter_map(|&item| global_to_local.get(item as usize).copied())
                .filter(|&l| l != u32::MAX)
                .collect();
            if !branch.is_empty() {
                branch.sort_unstable();
                branches.push(branch);
            }
            Ok(())
        })?;
        stats.passes = 2;

        // identical branches are inserted once with their multiplicity
        branches.sort_unstable();
        let mut tree = FPTree::new(original_items, Vec::new());
        let mut i = 0;
        while i < branches.len() {
            let mut j = i + 1;
            while j < branches.len() && branches[j] == branches[i] {
                j += 1;
            }
            tree.insert_branch(&branches[i], (j - i) as u64);
            i = j;
        }
        drop(branches);
        debug!(nodes = tree.nodes.len(), single_path = tree.is_path(), "built FP-tree");

        let mut out = Emitter { sink, num_rows, emitted: 0, buf: Vec::new() };
        self.fpg_step(&tree, min_weight, &mut out)?;
        out.sink.flush()?;
        stats.itemsets = out.emitted;

        info!(miner = self.name(), rows = num_rows, min_weight, itemsets = stats.itemsets, "mining finished");
        Ok(stats)
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

    fn fixture() -> MemorySource {
        MemorySource::from_rows(vec![vec![1, 2, 3], vec![1, 2], vec![1, 3], vec![2, 3], vec![1, 2, 3]]).unwrap()
    }

    fn mine(miner: &FpGrowth, src: &mut MemorySource, min_support: f64) -> Vec<(Vec<Item>, u64)> {
        let mut out: Vec<Itemset> = Vec::new();
        miner.find_frequent_itemsets(src, min_support, &mut out).unwrap();
        let mut v: Vec<(Vec<Item>, u64)> = out.iter().map(|is| (is.items().to_vec(), is.weight())).collect();
        v.sort();
        v
    }

    #[test]
    fn test_combinations() {
        let all: Vec<Vec<usize>> = combinations(4, 2).collect();
        assert_eq!(all, vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]);
        assert_eq!(combinations(3, 3).count(), 1);
        assert_eq!(combinations(2, 3).count(), 0);
    }

    #[test]
    fn test_fixture() {
        let got = mine(&FpGrowth::new(), &mut fixture(), 0.6);
        assert_eq!(
            got,
            vec![
                (vec![1], 4),
                (vec![1, 2], 3),
                (vec![1, 3], 3),
                (vec![2], 4),
                (vec![2, 3], 3),
                (vec![3], 4),
            ]
        );
    }

    #[test]
    fn test_single_path_weights() {
        let mut src = MemorySource::from_rows(vec![vec![1, 2, 3], vec![1, 2], vec![1]]).unwrap();
        let got = mine(&FpGrowth::new(), &mut src, 0.3);
        assert_eq!(
            got,
            vec![
                (vec![1], 3),
                (vec![1, 2], 2),
                (vec![1, 2, 3], 1),
                (vec![1, 3], 1),
                (vec![2], 2),
                (vec![2, 3], 1),
                (vec![3], 1),
            ]
        );
    }

    #[test]
    fn test_max_len() {
        let got = mine(&FpGrowth::new().with_max_len(Some(1)), &mut fixture(), 0.2);
        assert_eq!(got, vec![(vec![1], 4), (vec![2], 4), (vec![3], 4)]);
        let got = mine(&FpGrowth::new().with_max_len(Some(2)), &mut fixture(), 0.2);
        assert!(got.iter().all(|(items, _)| items.len() <= 2));
        assert_eq!(got.len(), 6);
    }

    #[test]
    fn test_support_is_weight_over_rows() {
        let mut out: Vec<Itemset> = Vec::new();
        let stats = FpGrowth::new().find_frequent_itemsets(&mut fixture(), 0.6, &mut out).unwrap();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.min_weight, 3);
        assert_eq!(stats.itemsets, 6);
        assert!(out.iter().all(|is| (is.support() - is.weight() as f64 / 5.0).abs() < 1e-12));
    }

    #[test]
    fn test_empty_and_invalid() {
        let mut empty = MemorySource::new();
        assert!(mine(&FpGrowth::new(), &mut empty, 0.5).is_empty());
        let mut out: Vec<Itemset> = Vec::new();
        let err = FpGrowth::new().find_frequent_itemsets(&mut fixture(), 0.0, &mut out).unwrap_err();
        assert!(matches!(err, MiningError::InvalidArgument(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let miner = FpGrowth::new().with_cancel(cancel);
        let outcome = miner.run(&mut fixture(), 0.6);
        assert!(outcome.is_aborted());
    }

    #[test]
    fn test_cancelled_mid_run() {
        let token = CancellationToken::new();
        let miner = FpGrowth::new().with_cancel(token.clone());
        let mut sink = CancelOnWrite { token, written: 0 };
        // {3} is emitted first; its conditional tree is entered after the cancel
        let err = miner.find_frequent_itemsets(&mut fixture(), 0.6, &mut sink).unwrap_err();
        assert!(matches!(err, MiningError::Aborted));
        assert_eq!(sink.written, 1);
    }

    #[test]
    fn test_sink_failure_propagates() {
        let err = FpGrowth::new().find_frequent_itemsets(&mut fixture(), 0.6, &mut FailingSink).unwrap_err();
        assert!(matches!(err, MiningError::Io(_)));
    }
}
