//! Fixed-width bit-packed integer array.
//!
//! Elements of `width` bits are laid out back to back with no padding, so an
//! element may straddle two 64-bit words. Words live in blocks of
//! `block_bytes` (32 MiB by default); large arrays therefore need only a few
//! allocations and never a doubling copy.
//!
//! Words are `AtomicU64` and writes touch only the bits of the target element
//! (`fetch_and` to clear, `fetch_or` to set). Threads writing **different**
//! indices may share a word without locking. Writing the same index from two
//! threads at once is a race on the value and must be avoided by the caller.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::encode::low_mask;
use crate::error::{LookupError, Result};

/// Default storage block: 32 MiB.
pub const DEFAULT_BLOCK_BYTES: usize = 32 * 1024 * 1024;

const WORD_BITS: u64 = 64;

pub struct BitPackedArray {
    width: u32,
    mask: u64,
    len: u64,
    block_words: usize,
    blocks: Vec<Box<[AtomicU64]>>,
}

impl BitPackedArray {
    /// Empty array of `width`-bit elements (1..=64) with the default block size.
    pub fn new(width: u32) -> Result<Self> {
        Self::with_block_bytes(width, DEFAULT_BLOCK_BYTES)
    }

    /// Empty array with an explicit block size (rounded up to whole words).
    ///
    /// Public callers go through [`BuildConfig::block_bytes`](crate::BuildConfig::block_bytes),
    /// which keeps blocks at [`DEFAULT_BLOCK_BYTES`] or more.
    pub(crate) fn with_block_bytes(width: u32, block_bytes: usize) -> Result<Self> {
        if width == 0 || width > 64 {
            return Err(LookupError::Config(format!(
                "packed width must be 1..=64 bits, got {width}"
            )));
        }
        let block_words = block_bytes.div_ceil(std::mem::size_of::<u64>()).max(1);
        Ok(Self {
            width,
            mask: low_mask(width),
            len: 0,
            block_words,
            blocks: Vec::new(),
        })
    }

    /// Grow storage to hold exactly `n` elements. New elements read as zero.
    ///
    /// Only the last block may be shorter than the block size; growing past it
    /// replaces that block and appends new ones.
    pub fn allocate(&mut self, n: u64) -> Result<()> {
        if n <= self.len {
            return Ok(());
        }
        let bits = n as u128 * self.width as u128;
        let words = usize::try_from(bits.div_ceil(WORD_BITS as u128))
            .ok()
            .filter(|&w| w <= isize::MAX as usize / std::mem::size_of::<u64>())
            .ok_or(LookupError::Allocation { bits })?;

        let mut have = self.word_count();
        let tail = self.blocks.last().map_or(self.block_words, |b| b.len());
        if tail < self.block_words {
            // Widen the short tail block in place of appending a sliver.
            let want = (words - (have - tail)).min(self.block_words);
            let grown = alloc_block(want, bits)?;
            if let Some(slot) = self.blocks.last_mut() {
                for (dst, src) in grown.iter().zip(slot.iter()) {
                    dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
                }
                *slot = grown;
            }
            have += want - tail;
        }

        while have < words {
            let want = (words - have).min(self.block_words);
            self.blocks.push(alloc_block(want, bits)?);
            have += want;
        }

        self.len = n;
        Ok(())
    }

    /// Number of addressable elements.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits per element.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of storage blocks currently allocated.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Allocated storage in bits (whole words).
    pub fn size_in_bits(&self) -> u64 {
        self.word_count() as u64 * WORD_BITS
    }

    /// Value at `i`. `i` must be `< len()`.
    #[inline]
    pub fn get(&self, i: u64) -> u64 {
        debug_assert!(i < self.len, "index {i} out of range (len {})", self.len);
        let bit = i * self.width as u64;
        let w = (bit / WORD_BITS) as usize;
        let off = (bit % WORD_BITS) as u32;

        let lo = self.word(w).load(Ordering::Relaxed) >> off;
        if off + self.width <= 64 {
            lo & self.mask
        } else {
            let hi = self.word(w + 1).load(Ordering::Relaxed) << (64 - off);
            (lo | hi) & self.mask
        }
    }

    /// Store `v` at `i`. `v` must fit in `width()` bits and `i` must be `< len()`.
    #[inline]
    pub fn set(&self, i: u64, v: u64) {
        debug_assert!(i < self.len, "index {i} out of range (len {})", self.len);
        debug_assert!(v <= self.mask, "value {v:#x} wider than {} bits", self.width);
        let v = v & self.mask;
        let bit = i * self.width as u64;
        let w = (bit / WORD_BITS) as usize;
        let off = (bit % WORD_BITS) as u32;

        let word = self.word(w);
        word.fetch_and(!(self.mask << off), Ordering::Relaxed);
        word.fetch_or(v << off, Ordering::Relaxed);

        let spill = (off + self.width).saturating_sub(64);
        if spill > 0 {
            let next = self.word(w + 1);
            next.fetch_and(!low_mask(spill), Ordering::Relaxed);
            next.fetch_or(v >> (64 - off), Ordering::Relaxed);
        }
    }

    #[inline]
    fn word(&self, w: usize) -> &AtomicU64 {
        &self.blocks[w / self.block_words][w % self.block_words]
    }

    fn word_count(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }
}

fn alloc_block(words: usize, bits: u128) -> Result<Box<[AtomicU64]>> {
    let mut v: Vec<AtomicU64> = Vec::new();
    v.try_reserve_exact(words)
        .map_err(|_| LookupError::Allocation { bits })?;
    v.extend((0..words).map(|_| AtomicU64::new(0)));
    Ok(v.into_boxed_slice())
}

impl fmt::Debug for BitPackedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitPackedArray")
            .field("width", &self.width)
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
