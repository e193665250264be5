//! The `Miner` seam shared by every frequent-itemset algorithm, plus an
//! accumulator that turns `(transaction, item)` pairs into a transaction
//! source without holding spilled pairs in memory.
//!
//! Accumulator memory strategy:
//!   • add_chunk(): sort each chunk right away; keep it in RAM while under
//!     budget, otherwise spill it to an anonymous temp file.
//!   • AccumulatedSource: every scan k-way merges the sorted chunks, one
//!     heap entry per chunk, so only the current row is assembled in RAM.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::tempfile;
use tracing::debug;

use crate::apriori::{AprioriMiner, CandidateStrategy};
use crate::cancel::CancellationToken;
use crate::config::IndexConfig;
use crate::error::{MiningError, Outcome, Result};
use crate::fpgrowth::FpGrowth;
use crate::io::{ItemsetSink, TransactionSource};
use crate::itemset::Item;
use crate::store::FrequentItemsetStore;

/// Summary of one mining run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiningStats {
    /// Full scans of the transaction source.
    pub passes: usize,
    pub itemsets: u64,
    pub min_weight: u64,
    pub num_rows: u64,
}

pub trait Miner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream every itemset with weight at least `floor(min_support * rows)`
    /// (and at least 1) into `sink`, with weight and support set.
    fn find_frequent_itemsets(
        &self,
        source: &mut dyn TransactionSource,
        min_support: f64,
        sink: &mut dyn ItemsetSink,
    ) -> Result<MiningStats>;

    fn mine(&self, source: &mut dyn TransactionSource, min_support: f64) -> Result<FrequentItemsetStore> {
        let mut store = FrequentItemsetStore::new();
        self.find_frequent_itemsets(source, min_support, &mut store)?;
        Ok(store)
    }

    /// [`mine`](Miner::mine) with cancellation reported as its own outcome.
    fn run(&self, source: &mut dyn TransactionSource, min_support: f64) -> Outcome<FrequentItemsetStore> {
        self.mine(source, min_support).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerKind {
    #[default]
    FpGrowth,
    Apriori,
    Closure,
}

impl MinerKind {
    pub fn build(self, cancel: CancellationToken, max_len: Option<usize>, index: IndexConfig) -> Box<dyn Miner> {
        match self {
            MinerKind::FpGrowth => Box::new(FpGrowth::new().with_cancel(cancel).with_max_len(max_len)),
            MinerKind::Apriori | MinerKind::Closure => {
                let strategy = if self == MinerKind::Apriori {
                    CandidateStrategy::Apriori
                } else {
                    CandidateStrategy::Closure
                };
                Box::new(
                    AprioriMiner::new(strategy)
                        .with_cancel(cancel)
                        .with_max_len(max_len)
                        .with_index(index.leaf_capacity, index.hash_width),
                )
            }
        }
    }
}

impl FromStr for MinerKind {
    type Err = MiningError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fpgrowth" | "fp-growth" => Ok(MinerKind::FpGrowth),
            "apriori" => Ok(MinerKind::Apriori),
            "closure" => Ok(MinerKind::Closure),
            other => Err(MiningError::invalid(format!("unknown mining algorithm '{}'", other))),
        }
    }
}

impl fmt::Display for MinerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MinerKind::FpGrowth => "fpgrowth",
            MinerKind::Apriori => "apriori",
            MinerKind::Closure => "closure",
        })
    }
}

const PAIR_BYTES: usize = 12;

/// A sorted run of `(transaction, item)` pairs, in RAM or in a temp file.
enum Chunk {
    Memory { pairs: Vec<(i64, Item)>, pos: usize },
    Disk { reader: BufReader<File>, len: usize, remaining: usize },
}

impl Chunk {
    fn restart(&mut self) -> Result<()> {
        match self {
            Chunk::Memory { pos, .. } => *pos = 0,
            Chunk::Disk { reader, len, remaining } => {
                reader.seek(SeekFrom::Start(0))?;
                *remaining = *len;
            }
        }
        Ok(())
    }

    fn next_pair(&mut self) -> Result<Option<(i64, Item)>> {
        match self {
            Chunk::Memory { pairs, pos } => {
                let pair = pairs.get(*pos).copied();
                *pos += 1;
                Ok(pair)
            }
            Chunk::Disk { reader, remaining, .. } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let mut txn = [0u8; 8];
                let mut item = [0u8; 4];
                reader.read_exact(&mut txn)?;
                reader.read_exact(&mut item)?;
                *remaining -= 1;
                Ok(Some((i64::from_le_bytes(txn), Item::from_le_bytes(item))))
            }
        }
    }

    fn is_spilled(&self) -> bool {
        matches!(self, Chunk::Disk { .. })
    }
}

/// Collects `(transaction_id, item_id)` pairs in chunks, spilling sorted
/// chunks to temp files once `max_ram_mb` is exceeded.
pub struct TransactionAccumulator {
    chunks: Vec<Chunk>,
    n_pairs: usize,
    max_ram_bytes: Option<usize>,
    current_ram_bytes: usize,
}

impl TransactionAccumulator {
    pub fn new(max_ram_mb: Option<usize>) -> Self {
        let max_ram_bytes = max_ram_mb.map(|mb| mb.saturating_mul(1024 * 1024));
        TransactionAccumulator { chunks: Vec::new(), n_pairs: 0, max_ram_bytes, current_ram_bytes: 0 }
    }

    /// Feed a chunk of pairs. Pair `i` puts `item_ids[i]` into transaction `txn_ids[i]`.
    pub fn add_chunk(&mut self, txn_ids: &[i64], item_ids: &[Item]) -> Result<()> {
        if txn_ids.len() != item_ids.len() {
            return Err(MiningError::invalid("txn_ids and item_ids must have the same length"));
        }
        if item_ids.iter().any(|&i| i == 0) {
            return Err(MiningError::invalid("item ids must be positive"));
        }
        let mut pairs: Vec<(i64, Item)> = txn_ids.iter().copied().zip(item_ids.iter().copied()).collect();
        pairs.sort_unstable();

        let len = pairs.len();
        let bytes = len * PAIR_BYTES;
        self.n_pairs += len;

        let over_budget = self.max_ram_bytes.map_or(false, |limit| self.current_ram_bytes + bytes > limit);
        if !over_budget {
            self.current_ram_bytes += bytes;
            self.chunks.push(Chunk::Memory { pairs, pos: 0 });
            return Ok(());
        }

        let mut file = tempfile()?;
        {
            let mut writer = BufWriter::new(&mut file);
            for &(t, i) in &pairs {
                writer.write_all(&t.to_le_bytes())?;
                writer.write_all(&i.to_le_bytes())?;
            }
            writer.flush()?;
        }
        debug!(pairs = len, "spilled chunk to disk");
        self.chunks.push(Chunk::Disk { reader: BufReader::new(file), len, remaining: 0 });
        Ok(())
    }

    /// Total number of pairs accumulated.
    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }

    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn spilled_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_spilled()).count()
    }

    pub fn max_ram_mb(&self) -> Option<usize> {
        self.max_ram_bytes.map(|b| b / (1024 * 1024))
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.chunks.shrink_to_fit();
        self.n_pairs = 0;
        self.current_ram_bytes = 0;
    }

    /// Turn the chunks into a source that merges them on every scan.
    /// One merge pass runs here to learn the row count and largest item.
    pub fn into_source(self) -> Result<AccumulatedSource> {
        let mut source = AccumulatedSource {
            chunks: self.chunks,
            heap: BinaryHeap::new(),
            row: Vec::new(),
            num_rows: 0,
            num_items: 0,
        };
        source.rewind()?;
        let (mut rows, mut max) = (0u64, 0u32);
        while let Some(row) = source.next_row()? {
            rows += 1;
            if let Some(&last) = row.last() {
                max = max.max(last);
            }
        }
        source.num_rows = rows;
        source.num_items = max;
        source.rewind()?;
        Ok(source)
    }
}

/// Rows of a [`TransactionAccumulator`], produced by a k-way merge over its
/// sorted chunks. Spilled chunks stay on disk and are re-read on every scan.
/// Rows come in transaction-id order with duplicate items removed.
pub struct AccumulatedSource {
    chunks: Vec<Chunk>,
    // min-heap: smallest (txn, item) pops first
    heap: BinaryHeap<Reverse<(i64, Item, usize)>>,
    row: Vec<Item>,
    num_rows: u64,
    num_items: u32,
}

impl AccumulatedSource {
    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn spilled_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_spilled()).count()
    }
}

impl TransactionSource for AccumulatedSource {
    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn num_items(&self) -> u32 {
        self.num_items
    }

    fn rewind(&mut self) -> Result<()> {
        self.heap.clear();
        for (ci, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.restart()?;
            if let Some((t, i)) = chunk.next_pair()? {
                self.heap.push(Reverse((t, i, ci)));
            }
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<&[Item]>> {
        let txn = match self.heap.peek() {
            Some(Reverse((t, _, _))) => *t,
            None => return Ok(None),
        };
        self.row.clear();
        while let Some(&Reverse((t, item, ci))) = self.heap.peek() {
            if t != txn {
                break;
            }
            self.heap.pop();
            if let Some((nt, ni)) = self.chunks[ci].next_pair()? {
                self.heap.push(Reverse((nt, ni, ci)));
            }
            if self.row.last() != Some(&item) {
                self.row.push(item);
            }
        }
        Ok(Some(&self.row))
    }
}
