//! Mapping of database rows onto sample partitions.
//!
//! Every row gets its own random stream, seeded from the sampler seed and
//! the row index, so decisions are independent of each other and of the
//! order rows are visited in.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MiningError, Result};
use crate::io::{scan, MemorySource, TransactionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingPolicy {
    /// Each row goes to exactly one partition.
    #[default]
    Uniform,
    /// Each partition takes the row with probability `min(1, S / D)`, so the
    /// expected partition size is `S`. A sample size of 1 gives the flat
    /// `1 / D` inclusion rate.
    Bernoulli,
    /// Each partition takes `Binomial(S, 1 / D)` copies of the row.
    Binomial,
}

impl FromStr for SamplingPolicy {
    type Err = MiningError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(SamplingPolicy::Uniform),
            "bernoulli" => Ok(SamplingPolicy::Bernoulli),
            "binomial" => Ok(SamplingPolicy::Binomial),
            other => Err(MiningError::invalid(format!("unknown sampling policy '{}'", other))),
        }
    }
}

impl fmt::Display for SamplingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SamplingPolicy::Uniform => "uniform",
            SamplingPolicy::Bernoulli => "bernoulli",
            SamplingPolicy::Binomial => "binomial",
        })
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
pub struct PartitionSampler {
    policy: SamplingPolicy,
    partition_count: usize,
    dataset_size: u64,
    sample_size: u64,
    seed: u64,
}

impl PartitionSampler {
    /// Sample size defaults to `dataset_size / partition_count`, at least 1.
    /// Without [`with_seed`](Self::with_seed) the seed is drawn at random.
    pub fn new(policy: SamplingPolicy, partition_count: usize, dataset_size: u64) -> Result<Self> {
        if partition_count == 0 {
            return Err(MiningError::invalid("partition_count must be at least 1"));
        }
        if dataset_size == 0 {
            return Err(MiningError::invalid("dataset_size must be at least 1"));
        }
        Ok(PartitionSampler {
            policy,
            partition_count,
            dataset_size,
            sample_size: (dataset_size / partition_count as u64).max(1),
            seed: rand::rng().random(),
        })
    }

    pub fn with_sample_size(mut self, sample_size: u64) -> Result<Self> {
        if sample_size == 0 {
            return Err(MiningError::invalid("sample_size must be at least 1"));
        }
        self.sample_size = sample_size;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    fn rng_for(&self, row_index: u64) -> StdRng {
        StdRng::seed_from_u64(splitmix64(self.seed ^ splitmix64(row_index)))
    }

    /// Partitions receiving row `row_index`, one entry per copy, ascending.
    pub fn assign(&self, row_index: u64) -> Result<Vec<usize>> {
        let mut rng = self.rng_for(row_index);
        let mut out = Vec::new();
        match self.policy {
            SamplingPolicy::Uniform => out.push(rng.random_range(0..self.partition_count)),
            SamplingPolicy::Bernoulli => {
                let p = (self.sample_size as f64 / self.dataset_size as f64).min(1.0);
                for part in 0..self.partition_count {
                    if rng.random_bool(p) {
                        out.push(part);
                    }
                }
            }
            SamplingPolicy::Binomial => {
                let dist = Binomial::new(self.sample_size, 1.0 / self.dataset_size as f64)
                    .map_err(|e| MiningError::invalid(format!("binomial sampling: {}", e)))?;
                for part in 0..self.partition_count {
                    let copies = dist.sample(&mut rng);
                    out.extend(std::iter::repeat(part).take(copies as usize));
                }
            }
        }
        Ok(out)
    }

    /// Split `source` into `partition_count` in-memory samples.
    pub fn partition(&self, source: &mut dyn TransactionSource) -> Result<Vec<MemorySource>> {
        let mut parts: Vec<MemorySource> = (0..self.partition_count).map(|_| MemorySource::new()).collect();
        let mut row_index = 0u64;
        scan(source, |row| {
            for part in self.assign(row_index)? {
                parts[part].push_sorted_row(row.to_vec());
            }
            row_index += 1;
            Ok(())
        })?;
        if row_index != self.dataset_size {
            debug!(expected = self.dataset_size, rows = row_index, "dataset size differs from rows scanned");
        }
        info!(
            policy = %self.policy,
            partitions = self.partition_count,
            rows = row_index,
            sample_size = self.sample_size,
            "sampled partitions"
        );
        Ok(parts)
    }
}

/// Per-partition sample size giving every partition an ε-approximation of
/// the itemset frequencies with probability at least `1 - δ`, for a
/// dataset whose VC-dimension is bounded by `d`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    phi: f64,
    sample_size: u64,
}

impl SamplingPlan {
    pub fn new(epsilon: f64, delta: f64, vc_dimension: u32, partitions: usize) -> Result<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(MiningError::invalid(format!("epsilon must be in (0, 1), got {}", epsilon)));
        }
        if !(delta > 0.0 && delta < 1.0) {
            return Err(MiningError::invalid(format!("delta must be in (0, 1), got {}", delta)));
        }
        if vc_dimension == 0 || partitions == 0 {
            return Err(MiningError::invalid("vc_dimension and partitions must be positive"));
        }
        let n = partitions as f64;
        let ln_delta = delta.ln();
        let phi = 2.0 + 4.0 * ln_delta / n
            - (16.0 * ln_delta.powi(2) / n + 8.0 * ln_delta / n + 3.0).sqrt();
        if !(phi > 0.0 && phi < 1.0) {
            return Err(MiningError::invalid(format!(
                "no valid per-partition failure probability for delta={} over {} partitions (phi={})",
                delta, partitions, phi
            )));
        }
        let size = (2.0 / epsilon.powi(2)) * (vc_dimension as f64 + (1.0 / phi).ln());
        Ok(SamplingPlan { phi, sample_size: size.ceil() as u64 })
    }

    /// Failure probability allowed for each partition.
    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rows: usize) -> MemorySource {
        MemorySource::from_rows((0..rows).map(|i| vec![(i % 7) as u32 + 1]).collect()).unwrap()
    }

    #[test]
    fn test_uniform_assigns_once() {
        let sampler = PartitionSampler::new(SamplingPolicy::Uniform, 4, 1000).unwrap().with_seed(11);
        let parts = sampler.partition(&mut source(1000)).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.iter().map(|p| p.num_rows()).sum::<u64>(), 1000);
        for p in &parts {
            assert!(p.num_rows() > 150, "partition of {} rows", p.num_rows());
        }
    }

    #[test]
    fn test_seed_reproducible() {
        let a = PartitionSampler::new(SamplingPolicy::Bernoulli, 3, 500).unwrap().with_seed(5);
        let b = a.clone();
        for row in 0..50 {
            assert_eq!(a.assign(row).unwrap(), b.assign(row).unwrap());
        }
        let rows_a: Vec<_> = a.partition(&mut source(500)).unwrap().into_iter().map(|p| p.into_rows()).collect();
        let rows_b: Vec<_> = b.partition(&mut source(500)).unwrap().into_iter().map(|p| p.into_rows()).collect();
        assert_eq!(rows_a, rows_b);
    }

    #[test]
    fn test_bernoulli_expected_size() {
        let sampler = PartitionSampler::new(SamplingPolicy::Bernoulli, 2, 4000)
            .unwrap()
            .with_sample_size(1000)
            .unwrap()
            .with_seed(3);
        for p in sampler.partition(&mut source(4000)).unwrap() {
            let n = p.num_rows();
            assert!((800..1200).contains(&n), "partition of {} rows", n);
        }
    }

    #[test]
    fn test_binomial_expected_size() {
        let sampler = PartitionSampler::new(SamplingPolicy::Binomial, 2, 4000)
            .unwrap()
            .with_sample_size(1000)
            .unwrap()
            .with_seed(9);
        for p in sampler.partition(&mut source(4000)).unwrap() {
            let n = p.num_rows();
            assert!((800..1200).contains(&n), "partition of {} rows", n);
        }
    }

    #[test]
    fn test_unit_sample_size_gives_flat_rate() {
        // 100 rows at rate 1/100 into 50 partitions: about 50 placements
        let sampler =
            PartitionSampler::new(SamplingPolicy::Bernoulli, 50, 100).unwrap().with_sample_size(1).unwrap().with_seed(21);
        let placed: usize = (0..100).map(|row| sampler.assign(row).unwrap().len()).sum();
        assert!((25..80).contains(&placed), "{} placements", placed);
    }

    #[test]
    fn test_full_rate_takes_every_row() {
        let sampler = PartitionSampler::new(SamplingPolicy::Bernoulli, 3, 10).unwrap().with_sample_size(10).unwrap();
        for row in 0..10 {
            assert_eq!(sampler.assign(row).unwrap(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(PartitionSampler::new(SamplingPolicy::Uniform, 0, 10).is_err());
        assert!(PartitionSampler::new(SamplingPolicy::Uniform, 1, 0).is_err());
        assert!(PartitionSampler::new(SamplingPolicy::Uniform, 1, 10).unwrap().with_sample_size(0).is_err());
        assert_eq!(PartitionSampler::new(SamplingPolicy::Uniform, 8, 3).unwrap().sample_size(), 1);
        assert_eq!("Binomial".parse::<SamplingPolicy>().unwrap(), SamplingPolicy::Binomial);
        assert!("reservoir".parse::<SamplingPolicy>().is_err());
    }

    #[test]
    fn test_sampling_plan() {
        let plan = SamplingPlan::new(0.05, 0.1, 5, 1000).unwrap();
        assert!((plan.phi() - 0.239_672_961_9).abs() < 1e-9);
        assert_eq!(plan.sample_size(), 5143);
        // too few partitions to spread delta over
        assert!(SamplingPlan::new(0.05, 0.1, 5, 100).is_err());
        assert!(SamplingPlan::new(0.0, 0.1, 5, 1000).is_err());
        assert!(SamplingPlan::new(0.05, 1.0, 5, 1000).is_err());
    }
}
