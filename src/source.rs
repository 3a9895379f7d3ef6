//! Sharded k-mer count input.
//!
//! The builder reads counts through [`CountSource`]: a fixed number of shards
//! (`2^shard_bits`), each streamed as [`CountBlock`]s of k-mers that share a
//! prefix. Shard `s` may only contain k-mers whose top `shard_bits` bits equal
//! `s`; the builder relies on that to give every shard exclusive buckets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::encode::{MAX_MER_SIZE, low_mask};
use crate::error::{LookupError, Result};

/// Most shards a source may declare (`2^MAX_SHARD_BITS`).
pub const MAX_SHARD_BITS: u32 = 16;

/// Decoded block of k-mers sharing `prefix`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountBlock {
    /// Shared high bits of every k-mer in the block.
    pub prefix: u64,
    /// Bits carried per entry in `suffixes`.
    pub suffix_bits: u32,
    pub suffixes: Vec<u64>,
    /// Count for each suffix (parallel to `suffixes`).
    pub values: Vec<u64>,
    /// Undecoded payload, filled by readers that decode lazily.
    pub(crate) raw: Vec<u8>,
}

impl CountBlock {
    #[inline]
    pub fn n_kmers(&self) -> usize {
        self.suffixes.len()
    }

    /// Full k-mer of entry `i`.
    #[inline]
    pub fn kmer(&self, i: usize) -> u64 {
        self.prefix.checked_shl(self.suffix_bits).unwrap_or(0) | self.suffixes[i]
    }

    pub(crate) fn clear(&mut self) {
        self.suffixes.clear();
        self.values.clear();
        self.raw.clear();
    }
}

/// Streams the blocks of one shard.
pub trait ShardReader {
    /// Load the next block into `block`; `false` at end of shard.
    fn load_block(&mut self, block: &mut CountBlock) -> Result<bool>;

    /// Finish decoding a block returned by [`load_block`](Self::load_block).
    fn decode_block(&mut self, _block: &mut CountBlock) -> Result<()> {
        Ok(())
    }
}

/// A sharded, already-counted k-mer dataset.
pub trait CountSource: Sync {
    type Reader: ShardReader + Send;

    /// Bases per k-mer.
    fn mer_size(&self) -> usize;

    /// log2 of the shard count.
    fn shard_bits(&self) -> u32;

    fn num_shards(&self) -> usize {
        1usize << self.shard_bits()
    }

    /// Open shard `shard` (0-based) for streaming.
    fn open_shard(&self, shard: usize) -> Result<Self::Reader>;

    /// Value histogram over the whole, unfiltered dataset.
    fn histogram(&self) -> &Histogram;
}

/// Count value → number of distinct k-mers with that count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Histogram {
    entries: Vec<(u64, u64)>,
}

impl Histogram {
    /// Build from `(value, occurrences)` pairs; duplicate values are summed.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut m = BTreeMap::new();
        for (value, occ) in pairs {
            *m.entry(value).or_insert(0u64) += occ;
        }
        Self {
            entries: m.into_iter().filter(|&(_, occ)| occ > 0).collect(),
        }
    }

    /// Tally a histogram from per-k-mer count values.
    pub fn from_counts(values: impl IntoIterator<Item = u64>) -> Self {
        Self::from_pairs(values.into_iter().map(|v| (v, 1)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn value(&self, i: usize) -> u64 {
        self.entries[i].0
    }

    pub fn occurrences(&self, i: usize) -> u64 {
        self.entries[i].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries.iter().copied()
    }

    /// Largest count value present, if any.
    pub fn max_value(&self) -> Option<u64> {
        self.entries.last().map(|&(v, _)| v)
    }

    /// Distinct k-mers with a value in `[min, max]`.
    pub fn distinct_in(&self, min: u64, max: u64) -> u64 {
        self.entries
            .iter()
            .filter(|&&(v, _)| min <= v && v <= max)
            .map(|&(_, occ)| occ)
            .sum()
    }

    /// Total distinct k-mers.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|&(_, occ)| occ).sum()
    }
}

/// Check a mer size and shard width, returning the k-mer width in bits.
pub(crate) fn check_layout(mer_size: usize, shard_bits: u32) -> Result<u32> {
    if mer_size == 0 || mer_size > MAX_MER_SIZE {
        return Err(LookupError::Config(format!(
            "mer size must be 1..={MAX_MER_SIZE}, got {mer_size}"
        )));
    }
    let kmer_bits = 2 * mer_size as u32;
    if shard_bits > MAX_SHARD_BITS || shard_bits >= kmer_bits {
        return Err(LookupError::Config(format!(
            "{shard_bits} shard bits is too many for {kmer_bits}-bit k-mers"
        )));
    }
    Ok(kmer_bits)
}

/// Sort `counts` and cut them into per-shard blocks.
///
/// Blocks share the top `shard_bits + block_bits` bits of their k-mers (capped
/// at the k-mer width).
pub(crate) fn partition_counts(
    mer_size: usize,
    shard_bits: u32,
    block_bits: u32,
    counts: &mut [(u64, u64)],
) -> Result<Vec<Vec<CountBlock>>> {
    let kmer_bits = check_layout(mer_size, shard_bits)?;
    let kmer_mask = low_mask(kmer_bits);
    if let Some(&(kmer, _)) = counts.iter().find(|&&(kmer, _)| kmer > kmer_mask) {
        return Err(LookupError::Config(format!(
            "k-mer {kmer:#x} is wider than {kmer_bits} bits"
        )));
    }

    counts.sort_unstable_by_key(|&(kmer, _)| kmer);

    let block_prefix_bits = (shard_bits + block_bits).min(kmer_bits);
    let suffix_bits = kmer_bits - block_prefix_bits;
    let suffix_mask = low_mask(suffix_bits);
    let to_shard = |prefix: u64| (prefix >> (block_prefix_bits - shard_bits)) as usize;

    let mut shards: Vec<Vec<CountBlock>> = (0..1usize << shard_bits).map(|_| Vec::new()).collect();
    let mut current: Option<CountBlock> = None;

    for &(kmer, value) in counts.iter() {
        let prefix = kmer.checked_shr(suffix_bits).unwrap_or(0);
        match current.as_mut() {
            Some(b) if b.prefix == prefix => {}
            _ => {
                if let Some(done) = current.take() {
                    shards[to_shard(done.prefix)].push(done);
                }
                current = Some(CountBlock {
                    prefix,
                    suffix_bits,
                    ..CountBlock::default()
                });
            }
        }
        if let Some(b) = current.as_mut() {
            b.suffixes.push(kmer & suffix_mask);
            b.values.push(value);
        }
    }
    if let Some(done) = current.take() {
        shards[to_shard(done.prefix)].push(done);
    }

    Ok(shards)
}

/// In-memory count source, partitioned like the on-disk format.
#[derive(Clone, Debug)]
pub struct MemoryCounts {
    mer_size: usize,
    shard_bits: u32,
    shards: Vec<Arc<Vec<CountBlock>>>,
    histogram: Histogram,
}

/// Extra prefix bits per block beyond the shard bits.
pub const DEFAULT_BLOCK_BITS: u32 = 4;

impl MemoryCounts {
    /// Partition `(kmer, count)` pairs into `2^shard_bits` shards.
    pub fn new(
        mer_size: usize,
        shard_bits: u32,
        counts: impl IntoIterator<Item = (u64, u64)>,
    ) -> Result<Self> {
        let mut counts: Vec<(u64, u64)> = counts.into_iter().collect();
        let histogram = Histogram::from_counts(counts.iter().map(|&(_, v)| v));
        let shards = partition_counts(mer_size, shard_bits, DEFAULT_BLOCK_BITS, &mut counts)?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(Self {
            mer_size,
            shard_bits,
            shards,
            histogram,
        })
    }

    /// Same data with a different histogram, e.g. one read from elsewhere.
    pub fn with_histogram(mut self, histogram: Histogram) -> Self {
        self.histogram = histogram;
        self
    }

    /// Blocks of shard `shard`.
    pub fn shard_blocks(&self, shard: usize) -> &[CountBlock] {
        &self.shards[shard]
    }
}

/// Reader over one in-memory shard.
pub struct MemoryShard {
    blocks: Arc<Vec<CountBlock>>,
    next: usize,
}

impl ShardReader for MemoryShard {
    fn load_block(&mut self, block: &mut CountBlock) -> Result<bool> {
        match self.blocks.get(self.next) {
            Some(b) => {
                block.clone_from(b);
                self.next += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl CountSource for MemoryCounts {
    type Reader = MemoryShard;

    fn mer_size(&self) -> usize {
        self.mer_size
    }

    fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    fn open_shard(&self, shard: usize) -> Result<MemoryShard> {
        let blocks = self.shards.get(shard).cloned().ok_or_else(|| {
            LookupError::Config(format!("shard {shard} out of range ({} shards)", self.shards.len()))
        })?;
        Ok(MemoryShard { blocks, next: 0 })
    }

    fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}
