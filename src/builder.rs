//! Two-pass parallel construction of an [`ExactLookup`].
//!
//! `count` streams every shard once to size the buckets, `allocate` reserves
//! exactly `N` packed entries, and `load` streams the shards again and
//! writes each retained k-mer at its bucket cursor. `build` chains the three. Shards run as rayon tasks;
//! every task owns the slice of the bucket table covering its prefix range, so
//! no entry of the table is shared between tasks.

use rayon::prelude::*;

use crate::buckets::{BucketCounts, BucketCursors};
use crate::encode::low_mask;
use crate::error::{LookupError, Result};
use crate::index::ExactLookup;
use crate::packed::{BitPackedArray, DEFAULT_BLOCK_BYTES};
use crate::planner::{IndexPlan, PlanRequest, configure};
use crate::radix::radix_sort_pairs;
use crate::source::{CountBlock, CountSource, ShardReader, check_layout};

/// Build-time configuration.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    min_value: Option<u64>,
    max_value: Option<u64>,
    memory_bits: Option<u64>,
    threads: Option<usize>,
    block_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            min_value: None,
            max_value: None,
            memory_bits: None,
            threads: None,
            block_bytes: DEFAULT_BLOCK_BYTES,
        }
    }
}

impl BuildConfig {
    /// Ignore k-mers with a count below `v` (default 1).
    pub fn min_value(mut self, v: u64) -> Self {
        self.min_value = Some(v);
        self
    }
    /// Ignore k-mers with a count above `v` (default: largest count).
    pub fn max_value(mut self, v: u64) -> Self {
        self.max_value = Some(v);
        self
    }
    /// Memory ceiling for the table, in bits.
    pub fn memory_bits(mut self, bits: u64) -> Self {
        self.memory_bits = Some(bits);
        self
    }
    /// Memory ceiling in GiB.
    pub fn memory_gb(self, gb: f64) -> Self {
        self.memory_bits((gb * 8.0 * 1024.0 * 1024.0 * 1024.0) as u64)
    }
    /// Build on a dedicated pool of `n` threads.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }
    /// Storage block size of the packed arrays; at least [`DEFAULT_BLOCK_BYTES`].
    pub fn block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes.max(DEFAULT_BLOCK_BYTES);
        self
    }
}

/// K-mer tallies of one shard (or a merge of several).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub too_low: u64,
    pub too_high: u64,
    pub retained: u64,
}

impl ShardStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            too_low: self.too_low + other.too_low,
            too_high: self.too_high + other.too_high,
            retained: self.retained + other.retained,
        }
    }

    pub fn total(&self) -> u64 {
        self.too_low + self.too_high + self.retained
    }
}

fn merge_all(stats: &[ShardStats]) -> ShardStats {
    stats.iter().fold(ShardStats::default(), |a, &b| a.merge(b))
}

/// Result of the counting pass, consumed by [`LookupBuilder::load`].
#[derive(Debug)]
pub struct ShardCounts {
    buckets: BucketCounts,
    stats: Vec<ShardStats>,
}

impl ShardCounts {
    pub fn buckets(&self) -> &BucketCounts {
        &self.buckets
    }

    /// Tallies of each shard, in shard order.
    pub fn shard_stats(&self) -> &[ShardStats] {
        &self.stats
    }

    /// Tallies over all shards.
    pub fn total(&self) -> ShardStats {
        merge_all(&self.stats)
    }

    /// Entries the table will hold.
    pub fn retained(&self) -> u64 {
        self.total().retained
    }
}

/// Packed suffix and value arrays sized for one table.
#[derive(Debug)]
pub struct TableStorage {
    suffixes: BitPackedArray,
    values: Option<BitPackedArray>,
}

impl TableStorage {
    pub fn len(&self) -> u64 {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    pub fn suffixes(&self) -> &BitPackedArray {
        &self.suffixes
    }

    /// `None` when every retained count is the same and needs no bits.
    pub fn values(&self) -> Option<&BitPackedArray> {
        self.values.as_ref()
    }
}

enum Class {
    TooLow,
    TooHigh,
    Keep(u64),
}

/// A configured build over one count source.
pub struct LookupBuilder<'a, S: CountSource> {
    source: &'a S,
    config: BuildConfig,
    plan: IndexPlan,
}

impl<'a, S: CountSource> LookupBuilder<'a, S> {
    /// Plan the table layout for `source` under `config`.
    ///
    /// Fails with [`LookupError::InsufficientMemory`] when no layout fits the
    /// memory budget.
    pub fn configure(source: &'a S, config: BuildConfig) -> Result<Self> {
        let kmer_bits = check_layout(source.mer_size(), source.shard_bits())?;
        let request = PlanRequest {
            kmer_bits,
            min_value: config.min_value,
            max_value: config.max_value,
            memory_bits: config.memory_bits,
            min_prefix_bits: source.shard_bits(),
        };
        let plan = configure(&request, source.histogram())?;
        Ok(Self {
            source,
            config,
            plan,
        })
    }

    pub fn plan(&self) -> &IndexPlan {
        &self.plan
    }

    /// First pass: per-bucket sizes plus per-shard statistics.
    pub fn count(&self) -> Result<ShardCounts> {
        self.in_pool(|| self.count_pass())?
    }

    /// Exact storage for `n` entries: suffixes, and values when they need bits.
    pub fn allocate(&self, n: u64) -> Result<TableStorage> {
        let mut suffixes =
            BitPackedArray::with_block_bytes(self.plan.suffix_bits, self.config.block_bytes)?;
        suffixes.allocate(n)?;

        let values = if self.plan.value_bits > 0 {
            let mut v =
                BitPackedArray::with_block_bytes(self.plan.value_bits, self.config.block_bytes)?;
            v.allocate(n)?;
            Some(v)
        } else {
            None
        };

        log::debug!(
            "allocated {} entries: {} suffix bits, {} value bits",
            n,
            suffixes.size_in_bits(),
            values.as_ref().map_or(0, |v| v.size_in_bits())
        );
        Ok(TableStorage { suffixes, values })
    }

    /// Second pass: fill `storage` using the bucket sizes from [`count`](Self::count).
    ///
    /// `storage` must come from [`allocate`](Self::allocate) with
    /// `counted.retained()` entries.
    pub fn load(self, counted: ShardCounts, storage: TableStorage) -> Result<ExactLookup> {
        self.in_pool(|| self.fill(counted, storage))?
    }

    /// Count, allocate and load in one go.
    pub fn build(self) -> Result<ExactLookup> {
        self.in_pool(|| {
            let counted = self.count_pass()?;
            let storage = self.allocate(counted.retained())?;
            self.fill(counted, storage)
        })?
    }

    fn fill(&self, counted: ShardCounts, storage: TableStorage) -> Result<ExactLookup> {
        let ShardCounts { buckets, stats } = counted;
        if buckets.bucket_count() != self.plan.bucket_count()
            || stats.len() != self.source.num_shards()
        {
            return Err(LookupError::Config(format!(
                "counts cover {} buckets in {} shards, the plan has {} buckets in {} shards",
                buckets.bucket_count(),
                stats.len(),
                self.plan.bucket_count(),
                self.source.num_shards()
            )));
        }

        let mut cursors = buckets.into_cursors();
        let n = cursors.total();
        if n != self.plan.n_kmers {
            log::warn!(
                "histogram predicted {} k-mers in range, shards hold {}",
                self.plan.n_kmers,
                n
            );
        }

        let TableStorage { suffixes, values } = storage;
        let value_width = values.as_ref().map_or(0, |v| v.width());
        if suffixes.len() != n
            || suffixes.width() != self.plan.suffix_bits
            || value_width != self.plan.value_bits
            || values.as_ref().is_some_and(|v| v.len() != n)
        {
            return Err(LookupError::Config(format!(
                "storage for {} entries of {}+{} bits does not fit {n} entries of {}+{} bits",
                suffixes.len(),
                suffixes.width(),
                value_width,
                self.plan.suffix_bits,
                self.plan.value_bits
            )));
        }

        let repaired = self.fill_pass(&mut cursors, &stats, &suffixes, values.as_ref())?;
        if repaired > 0 {
            log::warn!("{repaired} buckets arrived unsorted and were sorted after loading");
        }

        let buckets = cursors.into_offsets();
        debug_assert_eq!(buckets.total(), n);
        log::info!("loaded {} k-mers into {} buckets", n, buckets.bucket_count());

        Ok(ExactLookup::from_parts(
            self.source.mer_size(),
            self.plan,
            buckets,
            suffixes,
            values,
        ))
    }

    fn count_pass(&self) -> Result<ShardCounts> {
        let shards = self.source.num_shards();
        let mut buckets = BucketCounts::new(self.plan.bucket_count())?;

        let stats: Vec<ShardStats> = buckets
            .par_shard_slices_mut(shards)
            .enumerate()
            .map(|(shard, slice)| {
                let first = (shard * slice.len()) as u64;
                let stats = self.scan_shard(shard, |kmer, _| {
                    let b = self.local_bucket(shard, first, slice.len(), kmer)?;
                    slice[b] += 1;
                    Ok(())
                })?;
                log::debug!(
                    "shard {shard}: {} retained, {} below, {} above",
                    stats.retained,
                    stats.too_low,
                    stats.too_high
                );
                Ok(stats)
            })
            .collect::<Result<_>>()?;

        let counted = ShardCounts { buckets, stats };
        let total = counted.total();
        log::info!(
            "counted {} k-mers: {} retained, {} below {}, {} above {}",
            total.total(),
            total.retained,
            total.too_low,
            self.plan.min_value,
            total.too_high,
            self.plan.max_value
        );
        Ok(counted)
    }

    /// Second pass; returns how many buckets had to be sorted.
    fn fill_pass(
        &self,
        cursors: &mut BucketCursors,
        counted: &[ShardStats],
        suffixes: &BitPackedArray,
        values: Option<&BitPackedArray>,
    ) -> Result<u64> {
        let shards = self.source.num_shards();
        let suffix_mask = low_mask(self.plan.suffix_bits);

        let repaired: Vec<u64> = cursors
            .par_shard_slices_mut(shards)
            .enumerate()
            .map(|(shard, slice)| {
                let first = (shard * slice.len()) as u64;
                let expected = counted[shard].retained;
                let begin = slice[0];
                // Bucket `b` ends where bucket `b + 1` begins.
                let ends: Vec<u64> = slice[1..]
                    .iter()
                    .copied()
                    .chain(std::iter::once(begin + expected))
                    .collect();

                let stats = self.scan_shard(shard, |kmer, stored| {
                    let b = self.local_bucket(shard, first, slice.len(), kmer)?;
                    let slot = slice[b];
                    if slot >= ends[b] {
                        let bucket_begin = if b == 0 { begin } else { ends[b - 1] };
                        return Err(LookupError::BucketOverflow {
                            shard,
                            prefix: first + b as u64,
                            counted: ends[b] - bucket_begin,
                        });
                    }
                    slice[b] += 1;
                    suffixes.set(slot, kmer & suffix_mask);
                    if let Some(v) = values {
                        v.set(slot, stored);
                    }
                    Ok(())
                })?;

                if stats.retained != expected {
                    return Err(LookupError::Inconsistent {
                        shard,
                        counted: expected,
                        loaded: stats.retained,
                    });
                }
                self.sort_buckets(shard, first, begin, &ends, suffixes, values)
            })
            .collect::<Result<_>>()?;

        Ok(repaired.iter().sum())
    }

    /// Stream one shard, calling `keep(kmer, stored_value)` for retained k-mers.
    fn scan_shard(
        &self,
        shard: usize,
        mut keep: impl FnMut(u64, u64) -> Result<()>,
    ) -> Result<ShardStats> {
        let mut reader = self.source.open_shard(shard)?;
        let mut block = CountBlock::default();
        let mut stats = ShardStats::default();

        while reader.load_block(&mut block)? {
            reader.decode_block(&mut block)?;
            for i in 0..block.n_kmers() {
                match self.classify(block.values[i]) {
                    Class::TooLow => stats.too_low += 1,
                    Class::TooHigh => stats.too_high += 1,
                    Class::Keep(stored) => {
                        keep(block.kmer(i), stored)?;
                        stats.retained += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    #[inline]
    fn classify(&self, value: u64) -> Class {
        let plan = &self.plan;
        if value < plan.min_value {
            Class::TooLow
        } else if value > plan.max_value {
            Class::TooHigh
        } else {
            let stored = plan.encode_value(value);
            debug_assert!(stored <= low_mask(plan.value_bits));
            Class::Keep(stored)
        }
    }

    /// Index of `kmer`'s bucket within the shard's slice.
    #[inline]
    fn local_bucket(&self, shard: usize, first: u64, len: usize, kmer: u64) -> Result<usize> {
        let prefix = kmer >> self.plan.suffix_bits;
        match prefix.checked_sub(first) {
            Some(b) if b < len as u64 => Ok(b as usize),
            _ => Err(LookupError::ShardPartition { shard, kmer }),
        }
    }

    /// Make every bucket of a filled shard strictly increasing.
    ///
    /// `ends` holds the end offset of each bucket of the shard; the first
    /// bucket starts at `begin`.
    fn sort_buckets(
        &self,
        shard: usize,
        first: u64,
        begin: u64,
        ends: &[u64],
        suffixes: &BitPackedArray,
        values: Option<&BitPackedArray>,
    ) -> Result<u64> {
        let suffix_bits = self.plan.suffix_bits;
        let duplicate = |b: usize, suffix: u64| LookupError::DuplicateKmer {
            shard,
            kmer: ((first + b as u64) << suffix_bits) | suffix,
        };

        let mut repaired = 0;
        let mut bgn = begin;
        for (b, &end) in ends.iter().enumerate() {
            let mut sorted = true;
            for i in bgn + 1..end {
                let (prev, cur) = (suffixes.get(i - 1), suffixes.get(i));
                if prev == cur {
                    return Err(duplicate(b, cur));
                }
                if prev > cur {
                    sorted = false;
                    break;
                }
            }

            if !sorted {
                let mut keys: Vec<u64> = (bgn..end).map(|i| suffixes.get(i)).collect();
                let mut vals: Vec<u64> = match values {
                    Some(v) => (bgn..end).map(|i| v.get(i)).collect(),
                    None => vec![0; keys.len()],
                };
                radix_sort_pairs(&mut keys, &mut vals, suffix_bits);
                if let Some(w) = keys.windows(2).find(|w| w[0] == w[1]) {
                    return Err(duplicate(b, w[0]));
                }
                for (j, i) in (bgn..end).enumerate() {
                    suffixes.set(i, keys[j]);
                    if let Some(v) = values {
                        v.set(i, vals[j]);
                    }
                }
                repaired += 1;
            }
            bgn = end;
        }
        Ok(repaired)
    }

    fn in_pool<R: Send>(&self, f: impl FnOnce() -> R + Send) -> Result<R> {
        match self.config.threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| LookupError::Config(format!("cannot start {n} threads: {e}")))?;
                Ok(pool.install(f))
            }
            None => Ok(f()),
        }
    }
}
