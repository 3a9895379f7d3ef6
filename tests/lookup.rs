use kmer_exact_lookup::*;

fn kmer(s: &str) -> u64 {
    encode_kmer(s.as_bytes()).unwrap()
}

fn four_mers() -> Vec<(u64, u64)> {
    vec![
        (kmer("AAAA"), 1),
        (kmer("CCCC"), 3),
        (kmer("GGGG"), 10),
        (kmer("TTTT"), 100),
    ]
}

#[test]
fn two_shard_scenario() {
    let src = MemoryCounts::new(4, 1, four_mers()).unwrap();
    assert_eq!(src.num_shards(), 2);

    let idx = ExactLookup::build(&src, BuildConfig::default().min_value(2).max_value(50)).unwrap();

    assert!(!idx.exists(kmer("AAAA")));
    assert!(idx.exists(kmer("CCCC")));
    assert_eq!(idx.value(kmer("CCCC")), Some(3));
    assert!(idx.exists(kmer("GGGG")));
    assert_eq!(idx.value(kmer("GGGG")), Some(10));
    assert!(!idx.exists(kmer("TTTT")));
    assert_eq!(idx.value(kmer("TTTT")), None);
    assert_eq!(idx.n_kmers(), 2);
}

#[test]
fn one_bit_budget_is_infeasible() {
    let counts: Vec<(u64, u64)> = (0..1000u64).map(|k| (k * 17, 4)).collect();
    let src = MemoryCounts::new(12, 2, counts).unwrap();
    let err = LookupBuilder::configure(&src, BuildConfig::default().memory_bits(1))
        .err()
        .unwrap();
    match err {
        LookupError::InsufficientMemory { n_kmers, .. } => assert_eq!(n_kmers, 1000),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn range_boundaries_are_inclusive() {
    let counts: Vec<(u64, u64)> = (1..=12u64).map(|c| (c * 11, c)).collect();
    let src = MemoryCounts::new(5, 1, counts).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default().min_value(4).max_value(9)).unwrap();

    assert!(!idx.exists(3 * 11));
    assert_eq!(idx.value(4 * 11), Some(4));
    assert_eq!(idx.value(9 * 11), Some(9));
    assert!(!idx.exists(10 * 11));
    assert_eq!(idx.n_kmers(), 6);
}

#[test]
fn single_value_range() {
    let counts: Vec<(u64, u64)> = (0..50u64).map(|k| (k * 3, k % 4 + 1)).collect();
    let src = MemoryCounts::new(6, 0, counts.clone()).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default().min_value(2).max_value(2)).unwrap();
    assert_eq!(idx.plan().value_bits, 1);
    for (k, c) in counts {
        assert_eq!(idx.value(k), (c == 2).then_some(2));
    }
}

#[test]
fn empty_range_builds_an_empty_table() {
    let src = MemoryCounts::new(4, 1, four_mers()).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default().min_value(500)).unwrap();
    assert_eq!(idx.n_kmers(), 0);
    assert!(four_mers().iter().all(|&(k, _)| !idx.exists(k)));
}

#[test]
fn full_width_kmers() {
    let counts = vec![(0u64, 1), (u64::MAX, 2), (1 << 63, 3), (12345, 4)];
    let src = MemoryCounts::new(32, 3, counts.clone()).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default()).unwrap();
    for (k, c) in counts {
        assert_eq!(idx.value(k), Some(c));
    }
    assert!(!idx.exists(u64::MAX - 1));
}

#[test]
fn bucket_table_invariants() {
    let counts: Vec<(u64, u64)> = (0..4000u64).map(|k| ((k * 7_368_787) % (1 << 22), k % 20 + 1)).collect();
    let mut dedup = counts.clone();
    dedup.sort_unstable_by_key(|p| p.0);
    dedup.dedup_by_key(|p| p.0);

    let src = MemoryCounts::new(11, 3, dedup.clone()).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default().min_value(5).max_value(15)).unwrap();
    let expected = dedup.iter().filter(|&&(_, c)| (5..=15).contains(&c)).count() as u64;

    let table = idx.buckets().as_slice();
    assert_eq!(table[0], 0);
    assert!(table.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*table.last().unwrap(), expected);
    assert_eq!(idx.n_kmers(), expected);

    for prefix in 0..idx.buckets().bucket_count() as u64 {
        let r = idx.bucket_range(prefix).unwrap();
        let suffixes: Vec<u64> = r.map(|i| idx.suffix_at(i)).collect();
        assert!(suffixes.windows(2).all(|w| w[0] < w[1]), "bucket {prefix} not strictly increasing");
    }

    let loaded: Vec<(u64, u64)> = idx.iter().collect();
    let want: Vec<(u64, u64)> = dedup.into_iter().filter(|&(_, c)| (5..=15).contains(&c)).collect();
    assert_eq!(loaded, want);
}

#[test]
fn budget_is_respected_and_widens_prefix() {
    let counts: Vec<(u64, u64)> = (0..20_000u64).map(|k| (k * 977, 1 + k % 3)).collect();
    let src = MemoryCounts::new(16, 2, counts).unwrap();

    let smallest = LookupBuilder::configure(&src, BuildConfig::default()).unwrap();
    let min_bits = smallest.plan().min_total_bits;

    let budget = (min_bits * 3) as u64;
    let roomy = LookupBuilder::configure(&src, BuildConfig::default().memory_bits(budget)).unwrap();
    assert!(roomy.plan().total_bits <= budget as u128);
    assert!(roomy.plan().prefix_bits >= smallest.plan().prefix_bits);

    let idx = roomy.build().unwrap();
    assert_eq!(idx.value(977 * 5), Some(3));
}

#[test]
fn on_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut counts: Vec<(u64, u64)> = (0..3000u64).map(|k| ((k * 40_503) % (1 << 18), k % 9 + 1)).collect();
    counts.sort_unstable_by_key(|p| p.0);
    counts.dedup_by_key(|p| p.0);

    CountFileWriter::new(3)
        .block_bits(3)
        .write(dir.path(), 9, &mut counts.clone())
        .unwrap();

    let files = ShardedCountFiles::open(dir.path()).unwrap();
    let idx = ExactLookup::build(&files, BuildConfig::default().min_value(2).threads(3)).unwrap();
    for &(k, c) in &counts {
        assert_eq!(idx.value(k), (c >= 2).then_some(c));
    }
}

#[test]
fn missing_count_directory_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let err = ShardedCountFiles::open(&missing).unwrap_err();
    assert!(matches!(err, LookupError::Io { .. }));
    assert!(err.to_string().contains("nope"));
}

#[test]
fn concurrent_readers() {
    let counts: Vec<(u64, u64)> = (0..10_000u64).map(|k| (k * 13, k % 50 + 1)).collect();
    let src = MemoryCounts::new(12, 2, counts.clone()).unwrap();
    let idx = ExactLookup::build(&src, BuildConfig::default()).unwrap();

    std::thread::scope(|s| {
        for t in 0..4 {
            let idx = &idx;
            let counts = &counts;
            s.spawn(move || {
                for &(k, c) in counts.iter().skip(t).step_by(4) {
                    assert_eq!(idx.value(k), Some(c));
                }
            });
        }
    });
}
