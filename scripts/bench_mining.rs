use std::time::Instant;

use parfim::{
    AprioriMiner, AprioriRules, CandidateStrategy, CoverRulesOpt, FpGrowth, MemorySource, Miner, MiningConfig,
    NullSink, PartitionedMiner, RuleGenerator, SamplingPolicy,
};

fn hash(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

fn main() {
    let n_transactions = 20_000;
    let n_items = 100u32;
    let density = 0.06;
    let min_support = 0.01;

    // popular items first, long tail after
    let item_probs: Vec<f64> =
        (0..n_items).map(|i| density * (2.0 * (n_items - i) as f64 / n_items as f64)).collect();

    let rows: Vec<Vec<u32>> = (0..n_transactions)
        .map(|t| {
            (0..n_items)
                .filter(|&i| {
                    let h = hash(i as u64 * 1_000_003 + t as u64 + 1) % 100_000;
                    (h as f64) < item_probs[i as usize] * 100_000.0
                })
                .map(|i| i + 1)
                .collect()
        })
        .collect();
    let mut source = MemorySource::from_rows(rows).expect("synthetic rows are valid");

    let miners: Vec<Box<dyn Miner>> = vec![
        Box::new(FpGrowth::new()),
        Box::new(AprioriMiner::new(CandidateStrategy::Apriori)),
        Box::new(AprioriMiner::new(CandidateStrategy::Closure)),
    ];
    for miner in &miners {
        let mut sink = NullSink::default();
        let start = Instant::now();
        let stats = miner.find_frequent_itemsets(&mut source, min_support, &mut sink).expect("mining failed");
        println!(
            "{} took {:?} ({} itemsets, {} passes)",
            miner.name(),
            start.elapsed(),
            stats.itemsets,
            stats.passes
        );
    }

    let store = FpGrowth::new().mine(&mut source, min_support).expect("mining failed");
    let start = Instant::now();
    let rules = AprioriRules::new().generate(&store, 0.5).expect("rule generation failed");
    println!("apriori rules took {:?} ({} rules)", start.elapsed(), rules.len());
    let start = Instant::now();
    let cover = CoverRulesOpt::new().generate(&store, 0.5).expect("rule generation failed");
    println!("cover_opt rules took {:?} ({} rules)", start.elapsed(), cover.len());

    let config = MiningConfig {
        min_support,
        partition_count: 8,
        sampling_policy: SamplingPolicy::Bernoulli,
        sample_size: Some(5_000),
        seed: Some(17),
        ..MiningConfig::default()
    };
    let start = Instant::now();
    let result = PartitionedMiner::new(config)
        .expect("valid config")
        .run(&mut source)
        .into_result()
        .expect("partitioned mining failed");
    println!(
        "partitioned mining took {:?} ({} global itemsets over {} partitions)",
        start.elapsed(),
        result.itemsets.len(),
        result.partitions.len()
    );
}
