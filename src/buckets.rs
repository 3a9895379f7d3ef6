//! The bucket table and the three roles it plays during a build.
//!
//! One `Vec<u64>` of `2^P + 1` entries is reused throughout:
//!
//! 1. [`BucketCounts`]: entry `i` counts the k-mers with prefix `i`.
//! 2. [`BucketCursors`]: after an exclusive prefix sum, entry `i` is the next
//!    free slot of bucket `i`; the fill pass post-increments it. When the fill
//!    finishes, entry `i` holds the end of bucket `i`.
//! 3. [`BucketOffsets`]: shifting right by one turns those ends back into begin
//!    offsets. The last entry is the total `N` in every stage after 1.
//!
//! Both mutable stages hand out one disjoint slice per shard, so shard tasks
//! never share an entry.

use std::ops::Range;

use rayon::prelude::*;

use crate::error::{LookupError, Result};

/// Per-bucket k-mer counts (stage 1).
#[derive(Debug)]
pub struct BucketCounts {
    slots: Vec<u64>,
}

impl BucketCounts {
    /// Zeroed counts for `buckets` buckets plus the sentinel.
    pub fn new(buckets: usize) -> Result<Self> {
        let len = buckets + 1;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| LookupError::Allocation {
                bits: len as u128 * 64,
            })?;
        slots.resize(len, 0);
        Ok(Self { slots })
    }

    pub fn bucket_count(&self) -> usize {
        self.slots.len() - 1
    }

    /// One exclusive slice of counts per shard, in shard order.
    pub fn par_shard_slices_mut(
        &mut self,
        shards: usize,
    ) -> rayon::slice::ChunksMut<'_, u64> {
        let per_shard = self.bucket_count() / shards;
        let buckets = self.bucket_count();
        self.slots[..buckets].par_chunks_mut(per_shard)
    }

    /// Exclusive prefix sum: counts become begin offsets and write cursors.
    pub fn into_cursors(mut self) -> BucketCursors {
        let mut sum = 0u64;
        for c in self.slots.iter_mut() {
            let n = *c;
            *c = sum;
            sum += n;
        }
        #[cfg(debug_assertions)]
        let begins = self.slots.clone();
        BucketCursors {
            slots: self.slots,
            #[cfg(debug_assertions)]
            begins,
        }
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.slots
    }
}

/// Write cursors for the fill pass (stage 2).
#[derive(Debug)]
pub struct BucketCursors {
    slots: Vec<u64>,
    #[cfg(debug_assertions)]
    begins: Vec<u64>,
}

impl BucketCursors {
    pub fn bucket_count(&self) -> usize {
        self.slots.len() - 1
    }

    /// Total number of entries (the sentinel).
    pub fn total(&self) -> u64 {
        self.slots[self.slots.len() - 1]
    }

    /// One exclusive slice of cursors per shard, in shard order.
    pub fn par_shard_slices_mut(
        &mut self,
        shards: usize,
    ) -> rayon::slice::ChunksMut<'_, u64> {
        let per_shard = self.bucket_count() / shards;
        let buckets = self.bucket_count();
        self.slots[..buckets].par_chunks_mut(per_shard)
    }

    /// Shift the bucket ends right by one so they become begin offsets again.
    pub fn into_offsets(mut self) -> BucketOffsets {
        let last = self.slots.len() - 1;
        debug_assert_eq!(
            self.slots[last - 1],
            self.slots[last],
            "last bucket does not end at the total"
        );
        for i in (1..=last).rev() {
            self.slots[i] = self.slots[i - 1];
        }
        self.slots[0] = 0;

        #[cfg(debug_assertions)]
        debug_assert!(
            self.slots == self.begins,
            "restored bucket table differs from the counted one"
        );

        BucketOffsets { slots: self.slots }
    }
}

/// Read-only begin offsets, with `N` as the final entry (stage 3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketOffsets {
    slots: Vec<u64>,
}

impl BucketOffsets {
    pub fn bucket_count(&self) -> usize {
        self.slots.len() - 1
    }

    /// Entry range of bucket `prefix`.
    #[inline]
    pub fn range(&self, prefix: usize) -> Range<u64> {
        self.slots[prefix]..self.slots[prefix + 1]
    }

    /// Total entries.
    pub fn total(&self) -> u64 {
        self.slots[self.slots.len() - 1]
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_stages() {
        let mut counts = BucketCounts::new(4).unwrap();
        let sizes = [2u64, 0, 3, 1];
        counts
            .par_shard_slices_mut(2)
            .enumerate()
            .for_each(|(s, slice)| {
                for (j, c) in slice.iter_mut().enumerate() {
                    *c = sizes[s * 2 + j];
                }
            });

        let mut cursors = counts.into_cursors();
        assert_eq!(cursors.total(), 6);

        // Fill every bucket completely.
        cursors
            .par_shard_slices_mut(2)
            .enumerate()
            .for_each(|(s, slice)| {
                for (j, c) in slice.iter_mut().enumerate() {
                    *c += sizes[s * 2 + j];
                }
            });

        let offsets = cursors.into_offsets();
        assert_eq!(offsets.as_slice(), &[0, 2, 2, 5, 6]);
        assert_eq!(offsets.range(2), 2..5);
        assert_eq!(offsets.range(1), 2..2);
        assert_eq!(offsets.total(), 6);
    }

    #[test]
    fn single_shard_owns_everything() {
        let mut counts = BucketCounts::new(8).unwrap();
        assert_eq!(counts.par_shard_slices_mut(1).count(), 1);
        assert_eq!(counts.par_shard_slices_mut(8).count(), 8);
    }
}
