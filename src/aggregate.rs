//! Quorum aggregation of per-partition frequency estimates.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MiningError, Result};
use crate::itemset::Itemset;

/// Global frequency of one itemset with its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalEstimate {
    pub frequency: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Partitions that reported the itemset.
    pub reports: usize,
}

#[derive(Debug, Clone)]
pub struct GlobalAggregator {
    partition_count: usize,
    required_count: usize,
    epsilon: f64,
}

impl GlobalAggregator {
    /// Quorum defaults to a strict majority, `partition_count / 2 + 1`.
    pub fn new(partition_count: usize, epsilon: f64) -> Result<Self> {
        if partition_count == 0 {
            return Err(MiningError::invalid("partition_count must be at least 1"));
        }
        if !(epsilon >= 0.0 && epsilon.is_finite()) {
            return Err(MiningError::invalid(format!("epsilon must be >= 0, got {}", epsilon)));
        }
        Ok(GlobalAggregator { partition_count, required_count: partition_count / 2 + 1, epsilon })
    }

    pub fn with_required_count(mut self, required_count: usize) -> Result<Self> {
        if required_count == 0 || required_count > self.partition_count {
            return Err(MiningError::invalid(format!(
                "required_count must be in 1..={}, got {}",
                self.partition_count, required_count
            )));
        }
        self.required_count = required_count;
        Ok(self)
    }

    pub fn required_count(&self) -> usize {
        self.required_count
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// `None` unless at least `required_count` partitions reported.
    ///
    /// The estimate is the midpoint of the narrowest window of
    /// `required_count` consecutive sorted estimates; the interval widens
    /// that window by `epsilon / 2` on each side, clamped to `[0, 1]`.
    pub fn aggregate(&self, estimates: &[f64]) -> Option<GlobalEstimate> {
        let req = self.required_count;
        if estimates.len() < req {
            return None;
        }
        let mut sorted = estimates.to_vec();
        sorted.sort_by(f64::total_cmp);

        let (mut lo, mut hi) = (sorted[0], sorted[req - 1]);
        for window in sorted.windows(req).skip(1) {
            let (wlo, whi) = (window[0], window[req - 1]);
            if whi - wlo < hi - lo {
                lo = wlo;
                hi = whi;
            }
        }
        let half = self.epsilon / 2.0;
        Some(GlobalEstimate {
            frequency: lo + (hi - lo) / 2.0,
            lower_bound: (lo - half).max(0.0),
            upper_bound: (hi + half).min(1.0),
            reports: estimates.len(),
        })
    }

    /// Aggregate every shuffled group in parallel. Output is sorted by itemset.
    pub fn aggregate_all(&self, groups: Vec<(Itemset, Vec<f64>)>) -> Vec<(Itemset, GlobalEstimate)> {
        let total = groups.len();
        let mut out: Vec<(Itemset, GlobalEstimate)> = groups
            .into_par_iter()
            .filter_map(|(is, estimates)| self.aggregate(&estimates).map(|est| (is, est)))
            .collect();
        out.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
        debug!(groups = total, accepted = out.len(), required = self.required_count, "aggregated estimates");
        out
    }
}
