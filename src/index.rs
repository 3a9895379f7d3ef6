//! ExactLookup: read-only k-mer → count table.
//!
//! A k-mer is split into `prefix` (top `P` bits, selects a bucket) and
//! `suffix` (low `S` bits, stored). Each bucket is a sorted run of suffixes in
//! one shared bit-packed array, with the offset-encoded counts in a parallel
//! array. Queries never mutate anything and can run from any number of threads.

use std::ops::Range;

use crate::buckets::BucketOffsets;
use crate::builder::{BuildConfig, LookupBuilder};
use crate::encode::low_mask;
use crate::error::Result;
use crate::packed::BitPackedArray;
use crate::planner::IndexPlan;
use crate::source::CountSource;

/// Buckets at or below this size are scanned linearly.
pub const LINEAR_SCAN_SPAN: u64 = 8;

#[derive(Debug)]
pub struct ExactLookup {
    mer_size: usize,
    plan: IndexPlan,
    kmer_mask: u64,
    suffix_mask: u64,
    buckets: BucketOffsets,
    suffixes: BitPackedArray,
    values: Option<BitPackedArray>,
}

impl ExactLookup {
    /// Configure and load in one step.
    pub fn build<S: CountSource>(source: &S, config: BuildConfig) -> Result<Self> {
        LookupBuilder::configure(source, config)?.build()
    }

    pub(crate) fn from_parts(
        mer_size: usize,
        plan: IndexPlan,
        buckets: BucketOffsets,
        suffixes: BitPackedArray,
        values: Option<BitPackedArray>,
    ) -> Self {
        debug_assert_eq!(buckets.total(), suffixes.len());
        Self {
            mer_size,
            kmer_mask: low_mask(plan.kmer_bits),
            suffix_mask: low_mask(plan.suffix_bits),
            plan,
            buckets,
            suffixes,
            values,
        }
    }

    /// Whether `kmer` was loaded (its count lies within the configured range).
    #[inline]
    pub fn exists(&self, kmer: u64) -> bool {
        self.find(kmer).is_some()
    }

    /// Count of `kmer`, or `None` if it was not loaded.
    #[inline]
    pub fn value(&self, kmer: u64) -> Option<u64> {
        self.find(kmer).map(|i| self.value_at(i))
    }

    /// Number of k-mers in the table.
    pub fn n_kmers(&self) -> u64 {
        self.suffixes.len()
    }

    pub fn mer_size(&self) -> usize {
        self.mer_size
    }

    pub fn plan(&self) -> &IndexPlan {
        &self.plan
    }

    pub fn buckets(&self) -> &BucketOffsets {
        &self.buckets
    }

    /// Entry range of bucket `prefix`, or `None` past the last bucket.
    pub fn bucket_range(&self, prefix: u64) -> Option<Range<u64>> {
        usize::try_from(prefix)
            .ok()
            .filter(|&p| p < self.buckets.bucket_count())
            .map(|p| self.buckets.range(p))
    }

    /// Stored suffix of entry `i`.
    pub fn suffix_at(&self, i: u64) -> u64 {
        self.suffixes.get(i)
    }

    /// Memory held by the table (bucket offsets plus packed arrays).
    pub fn size_in_bits(&self) -> u64 {
        self.buckets.as_slice().len() as u64 * 64
            + self.suffixes.size_in_bits()
            + self.values.as_ref().map_or(0, |v| v.size_in_bits())
    }

    /// All `(kmer, count)` pairs in ascending k-mer order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.buckets.bucket_count()).flat_map(move |prefix| {
            self.buckets.range(prefix).map(move |i| {
                (
                    ((prefix as u64) << self.plan.suffix_bits) | self.suffixes.get(i),
                    self.value_at(i),
                )
            })
        })
    }

    #[inline]
    fn value_at(&self, i: u64) -> u64 {
        match &self.values {
            Some(v) => self.plan.decode_value(v.get(i)),
            None => self.plan.min_value,
        }
    }

    #[inline]
    fn find(&self, kmer: u64) -> Option<u64> {
        if kmer & !self.kmer_mask != 0 {
            return None;
        }
        // In range: the k-mer fits `kmer_bits`, so the prefix fits `prefix_bits`.
        let prefix = (kmer >> self.plan.suffix_bits) as usize;
        let suffix = kmer & self.suffix_mask;
        let r = self.buckets.range(prefix);
        search(&self.suffixes, r.start, r.end, suffix)
    }
}

/// Position of `suffix` in the sorted run `[bgn, end)` of `suffixes`.
///
/// Binary search narrows the run until at most [`LINEAR_SCAN_SPAN`] entries
/// remain, which are then scanned.
pub(crate) fn search(suffixes: &BitPackedArray, mut bgn: u64, mut end: u64, suffix: u64) -> Option<u64> {
    while end - bgn > LINEAR_SCAN_SPAN {
        let mid = bgn + (end - bgn) / 2;
        let m = suffixes.get(mid);
        if m == suffix {
            return Some(mid);
        }
        if m < suffix {
            bgn = mid + 1;
        } else {
            end = mid;
        }
    }
    linear_search(suffixes, bgn, end, suffix)
}

pub(crate) fn linear_search(suffixes: &BitPackedArray, bgn: u64, end: u64, suffix: u64) -> Option<u64> {
    (bgn..end).find(|&i| suffixes.get(i) == suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryCounts;
    use proptest::prelude::*;

    fn packed(sorted: &[u64], width: u32) -> BitPackedArray {
        let mut a = BitPackedArray::new(width).unwrap();
        a.allocate(sorted.len() as u64).unwrap();
        for (i, &v) in sorted.iter().enumerate() {
            a.set(i as u64, v);
        }
        a
    }

    #[test]
    fn search_hits_every_position() {
        let sorted: Vec<u64> = (0..100).map(|i| i * 3 + 1).collect();
        let a = packed(&sorted, 9);
        for (i, &v) in sorted.iter().enumerate() {
            assert_eq!(search(&a, 0, 100, v), Some(i as u64));
            assert_eq!(search(&a, 0, 100, v + 1), None);
        }
        assert_eq!(search(&a, 0, 100, 0), None);
        assert_eq!(search(&a, 10, 10, 31), None);
    }

    #[test]
    fn wide_and_foreign_kmers_are_absent() {
        let src = MemoryCounts::new(4, 0, [(0xAB, 2)]).unwrap();
        let idx = ExactLookup::build(&src, BuildConfig::default()).unwrap();
        assert_eq!(idx.value(0xAB), Some(2));
        assert!(!idx.exists(0x1AB));
        assert!(!idx.exists(0xAC));
    }

    #[test]
    fn bucket_range_past_the_table_is_none() {
        let src = MemoryCounts::new(6, 1, (0..40u64).map(|k| (k * 97, 1))).unwrap();
        let idx = ExactLookup::build(&src, BuildConfig::default()).unwrap();
        let buckets = idx.buckets().bucket_count() as u64;
        assert_eq!(idx.bucket_range(0).map(|r| r.start), Some(0));
        assert_eq!(idx.bucket_range(buckets - 1).map(|r| r.end), Some(40));
        assert_eq!(idx.bucket_range(buckets), None);
        assert_eq!(idx.bucket_range(u64::MAX), None);
    }

    #[test]
    fn size_accounts_for_all_parts() {
        let src = MemoryCounts::new(8, 0, (0..1000u64).map(|k| (k * 61, k % 5 + 1))).unwrap();
        let idx = ExactLookup::build(&src, BuildConfig::default()).unwrap();
        let p = idx.plan();
        let packed_bits = idx.n_kmers() * (p.suffix_bits + p.value_bits) as u64;
        assert!(idx.size_in_bits() >= packed_bits + (idx.buckets().bucket_count() as u64 + 1) * 64);
    }

    proptest! {
        #[test]
        fn binary_and_linear_search_agree(
            mut vals in prop::collection::vec(0u64..(1 << 12), 0..200),
            queries in prop::collection::vec(0u64..(1 << 12), 1..50),
        ) {
            vals.sort_unstable();
            vals.dedup();
            let a = packed(&vals, 12);
            let n = vals.len() as u64;
            for p in queries.into_iter().chain(vals.iter().copied()) {
                for bgn in [0, n / 3] {
                    prop_assert_eq!(search(&a, bgn, n, p), linear_search(&a, bgn, n, p));
                }
            }
        }
    }
}
